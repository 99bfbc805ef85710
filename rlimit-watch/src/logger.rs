use crate::config::LogFormat;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(&env_filter_str)
        .map_err(|e| format!("Failed to parse RUST_LOG value '{}': {}", env_filter_str, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stdout);

    match format {
        LogFormat::Text => builder
            .with_ansi(std::io::stdout().is_terminal())
            .try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| format!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::debug!("Log level configured via RUST_LOG='{}'", env_filter_str);
    Ok(())
}
