use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::errors::ServiceResult;
use crate::provider::{Backend, Provider};

pub fn init_tracing(debug: bool) {
    let default = if debug { "unitgen=debug,tower_http=debug" } else { "unitgen=info,tower_http=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// One model round trip as written to the reply journal.
#[derive(Debug, Serialize)]
pub struct Exchange {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub backend: &'static str,
    pub system: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn save_exchange(dir: &Path, exchange: &Exchange) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", exchange.id));
    fs::write(&path, serde_json::to_string_pretty(exchange)?)?;
    Ok(path)
}

/// Wraps a provider and journals every exchange, successful or not.
/// Journal write failures are logged and never fail the request.
pub struct Journaled<P> {
    inner: P,
    dir: PathBuf,
}

impl<P> Journaled<P> {
    pub fn new(inner: P, dir: PathBuf) -> Self {
        Self { inner, dir }
    }
}

#[async_trait]
impl<P: Provider> Provider for Journaled<P> {
    async fn generate(&self, system: &str, user: &str, backend: &Backend) -> ServiceResult<String> {
        let result = self.inner.generate(system, user, backend).await;
        let exchange = Exchange {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            backend: backend.id,
            system: system.to_string(),
            user: user.to_string(),
            reply: result.as_ref().ok().cloned(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        let dir = self.dir.clone();
        match tokio::task::spawn_blocking(move || save_exchange(&dir, &exchange)).await {
            Ok(Ok(path)) => tracing::debug!(path = %path.display(), "model exchange saved"),
            Ok(Err(e)) => tracing::warn!(error = %e, "could not save model exchange"),
            Err(e) => tracing::warn!(error = %e, "journal task failed"),
        }
        result
    }
}
