use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

pub const LOG_FILE: &str = "cronned.log";

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log dir {}", dir.display()))?;
            let path = dir.join(LOG_FILE);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
