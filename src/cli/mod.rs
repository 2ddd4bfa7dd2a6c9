use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "unitgen", version, about = "Generates unit conversion code and pages from prompts")]
pub struct Args {
    /// Address the HTTP server listens on (host:port).
    #[arg(long, env = "UNITGEN_BIND")]
    pub bind: Option<String>,

    /// Prompt configuration file (templates + model list).
    #[arg(long, env = "UNITGEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory generated pages are written to.
    #[arg(long, env = "UNITGEN_PAGES_DIR")]
    pub pages_dir: Option<PathBuf>,

    #[arg(long, env = "OPENAI_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Upper bound for a single model call.
    #[arg(long, env = "UNITGEN_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,

    /// Keep a JSON journal of every model exchange.
    #[arg(long, default_value_t = false)]
    pub save_replies: bool,

    #[arg(long, default_value_t = false)]
    pub debug: bool,
}
