use clap::Parser;
use exam_assistant::cli::{run, Cli};
use exam_assistant::config::{get_config, init_config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();
    init_config()?;
    let config = get_config();

    if let Err(e) = run(cli, config).await {
        tracing::error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
