use anyhow::Result;
use clap::Parser;
use tracing::info;

use kvrepl::{Cli, Config, Server};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::try_from(Cli::parse())?;
    let role = config.role();
    let server = Server::bind(config).await?;
    info!(%role, "listening on {}", server.local_addr()?);

    server.run_until_ctrl_c().await
}
