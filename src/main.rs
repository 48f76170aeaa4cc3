use crate::config::{DEFAULT_CONFIG_PATH, load_config};
use crate::review::ReviewProcessor;
use anyhow::{Context, anyhow};
use axum_server::tls_rustls::RustlsConfig;
use std::env;
use std::sync::Arc;
use tracing::info;

mod admission;
mod config;
mod docker;
mod image_reference;
mod mirror;
mod patch;
mod review;
mod secret_string;
mod transfer;
mod webserver;
mod workload;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting kube-image-mirror {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;

    let target = config.mirror_target()?;
    info!(
        "Mirroring images to registry '{}' namespace '{}'",
        target.registry(),
        target.namespace()
    );

    let docker_client = docker::create_client(&config)?;
    let processor = ReviewProcessor::new(
        target,
        Arc::new(docker_client),
        config.request_timeout(),
    );
    let app = webserver::create_app(Arc::new(processor));

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;
    let tls_config =
        RustlsConfig::from_pem_file(&config.webserver.tls.cert_file, &config.webserver.tls.key_file)
            .await
            .with_context(|| {
                format!(
                    "Failed to load TLS certificate {} and key {}",
                    config.webserver.tls.cert_file.display(),
                    config.webserver.tls.key_file.display()
                )
            })?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    axum_server::bind_rustls(addr, tls_config)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
