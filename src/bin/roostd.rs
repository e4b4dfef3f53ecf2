//! The roost server binary.
//!
//! Configuration comes from `ROOST_*` environment variables; the hosting
//! runtime (container, systemd) owns the CLI surface. Exits non-zero on
//! bind or permission errors.

use roost::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ROOST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    tracing::info!(
        "roost starting (storage: {})",
        settings.storage_dir.display()
    );

    roost::server::run(settings).await.map_err(|e| {
        tracing::error!(error = %e, "roost exited with error");
        anyhow::anyhow!("roost failed: {e}")
    })?;

    tracing::info!("roost shut down cleanly");
    Ok(())
}
