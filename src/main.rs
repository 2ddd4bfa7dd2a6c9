use clap::Parser;
use std::sync::Arc;

mod cli;
mod config;
mod errors;
mod exec;
mod extract;
mod log;
mod prompt;
mod provider;
mod server;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already carry everything.
    let _ = dotenvy::dotenv();

    let args = cli::Args::parse();
    let cfg = config::Config::from_args(&args);
    log::init_tracing(cfg.debug);

    if cfg.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; model requests will fail");
    }

    let templates = prompt::TemplateStore::load(&cfg.prompt_config);
    match &templates {
        Ok(_) => tracing::info!(path = %cfg.prompt_config.display(), "prompt templates loaded"),
        Err(e) => tracing::warn!(path = %cfg.prompt_config.display(), error = %e, "prompt templates unavailable"),
    }

    let pages = store::DirStore::new(cfg.pages_dir.clone());
    tracing::info!(dir = %pages.dir().display(), "storing generated pages");

    let state = server::AppState {
        templates,
        provider: provider::make_provider(&cfg)?,
        store: Arc::new(pages),
        pages_route: cfg.pages_route.clone(),
        exec_budget: exec::DEFAULT_BUDGET,
    };

    server::run_server(Arc::new(state), &cfg.bind).await
}
