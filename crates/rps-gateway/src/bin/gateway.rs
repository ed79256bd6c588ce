//! Prediction gateway
//!
//! Accepts `POST /predict` with an image URL, prepares the image and
//! forwards it to the serving endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rps_core::{setup_cli_logging, ImageDimensions};
use rps_gateway::{gateway_router, GatewayConfig, GatewayState, DEFAULT_SERVING_URL};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "HTTP gateway for the rock/paper/scissors classifier")]
struct Cli {
    /// Address to bind to
    #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0:9696")]
    bind: SocketAddr,

    /// Predict URL of the serving endpoint
    #[arg(long, env = "SERVING_URL", default_value = DEFAULT_SERVING_URL)]
    serving_url: String,

    /// Side length images are resized to
    #[arg(long, default_value = "160")]
    image_size: u32,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_cli_logging(cli.verbose)?;

    let config = GatewayConfig {
        serving_url: cli.serving_url,
        target_size: ImageDimensions::square(cli.image_size),
    };
    info!("Rock/paper/scissors gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Serving URL: {}", config.serving_url);
    info!("  Image size:  {}", config.target_size);

    let app = gateway_router(Arc::new(GatewayState::new(config)));

    info!("Starting gateway on http://{}", cli.bind);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
