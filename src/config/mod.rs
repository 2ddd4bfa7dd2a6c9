use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cli::Args;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind: String,
    /// JSON document with the prompt templates and the model list.
    pub prompt_config: PathBuf,
    pub pages_dir: PathBuf,
    /// Path segment the frontend serves generated pages under.
    pub pages_route: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub replies_dir: Option<PathBuf>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".into(),
            prompt_config: "prompt.json".into(),
            pages_dir: "nextjs/src/pages/convert_pages".into(),
            pages_route: "convert_pages".into(),
            api_base: "https://api.openai.com".into(),
            api_key: None,
            timeout_secs: 120,
            replies_dir: None,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_args(args: &Args) -> Self {
        let mut cfg = Config::default();
        if let Some(bind) = &args.bind {
            cfg.bind = bind.clone();
        }
        if let Some(path) = &args.config {
            cfg.prompt_config = path.clone();
        }
        if let Some(dir) = &args.pages_dir {
            cfg.pages_dir = dir.clone();
        }
        if let Some(base) = &args.api_base {
            cfg.api_base = base.clone();
        }
        cfg.api_key = args.api_key.clone().filter(|k| !k.trim().is_empty());
        cfg.timeout_secs = args.timeout_secs;
        if args.save_replies {
            cfg.replies_dir = Some(PathBuf::from(".unitgen").join("replies"));
        }
        cfg.debug = args.debug;
        cfg
    }
}
