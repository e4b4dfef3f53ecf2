//! Server assembly: shared state, background tasks, router, listener.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;

use crate::assets::AssetStore;
use crate::connmgr::ConnMgr;
use crate::endpoints::{CommandEndpoint, init_command_endpoint};
use crate::error::{Result, RoostError};
use crate::notify::NotifyQueue;
use crate::releases::ReleaseCache;
use crate::settings::Settings;
use crate::store::ConfigStore;
use crate::tz::TzCatalog;
use crate::wake::WakeArbiter;

/// Shared state behind every HTTP handler and session task.
pub struct ServerState {
    pub settings: Settings,
    pub store: ConfigStore,
    pub connmgr: Arc<ConnMgr>,
    pub notify: Arc<NotifyQueue>,
    pub wake: WakeArbiter,
    pub releases: ReleaseCache,
    pub assets: AssetStore,
    pub tz: TzCatalog,
    /// Active command endpoint; replaced wholesale on config change.
    endpoint: tokio::sync::Mutex<Option<Arc<dyn CommandEndpoint>>>,
    /// Client for one-off fetches (default configs, TTS warm-up).
    pub http: reqwest::Client,
}

impl ServerState {
    /// Build all components, run the legacy migration, and start the
    /// background tasks.
    pub async fn init(settings: Settings) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&settings.storage_dir)?;

        let store = ConfigStore::open(&settings.db_path())?;
        store.migrate_legacy(&settings.storage_dir)?;

        let connmgr = Arc::new(ConnMgr::new());
        let notify = NotifyQueue::new(Arc::clone(&connmgr));
        notify.start();
        let wake = WakeArbiter::spawn(Arc::clone(&connmgr));
        let releases = ReleaseCache::new(settings.ota_dir(), settings.releases_url.clone())?;
        let assets = AssetStore::new(settings.asset_dir())?;
        let tz = TzCatalog::new(settings.tz_url.clone(), settings.tz_cache_path())?;

        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(1))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| RoostError::Upstream(e.to_string()))?;

        let state = Arc::new(Self {
            settings,
            store,
            connmgr,
            notify,
            wake,
            releases,
            assets,
            tz,
            endpoint: tokio::sync::Mutex::new(None),
            http,
        });

        // Warm the tz cache and build the configured endpoint; neither
        // failure prevents startup.
        let _ = state.tz.get(true).await;
        state.reinit_endpoint().await;

        Ok(state)
    }

    /// The active command endpoint, if one is configured.
    pub async fn endpoint(&self) -> Option<Arc<dyn CommandEndpoint>> {
        self.endpoint.lock().await.clone()
    }

    /// Rebuild the command endpoint from the stored config.
    ///
    /// The previous instance's background task is stopped before the
    /// replacement goes live; configuration problems leave the slot empty.
    pub async fn reinit_endpoint(&self) {
        let mut slot = self.endpoint.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        match init_command_endpoint(&self.store, &self.connmgr).await {
            Ok(endpoint) => *slot = endpoint,
            Err(e) => {
                tracing::error!("failed to initialize command endpoint: {e}");
                *slot = None;
            }
        }
    }
}

/// Build the full router (HTTP API + satellite WebSocket endpoint).
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/asset", get(crate::api::asset::get_asset))
        .route("/api/client", get(crate::api::client::get_clients))
        .route("/api/client", post(crate::api::client::post_client))
        .route("/api/config", get(crate::api::config::get_config))
        .route("/api/config", post(crate::api::config::post_config))
        .route("/api/ota", get(crate::api::ota::get_ota))
        .route("/api/release", get(crate::api::release::get_release))
        .route("/api/release", post(crate::api::release::post_release))
        .route("/api/status", get(crate::api::status::get_status))
        .route("/ws", get(crate::session::ws_handler))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
///
/// Bind failures are fatal — the caller maps them to a non-zero exit code.
pub async fn run(settings: Settings) -> Result<()> {
    let bind_addr = format!("{}:{}", settings.bind_host, settings.bind_port);
    let state = ServerState::init(settings).await?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| RoostError::Transport(format!("bind {bind_addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| RoostError::Transport(e.to_string()))?;
    tracing::info!("roost listening on http://{local_addr}");

    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| RoostError::Transport(e.to_string()))?;
    Ok(())
}
