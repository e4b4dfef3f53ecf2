//! Shared helpers for integration tests: spin up a full server on an
//! ephemeral port backed by a temp storage dir.

use std::sync::Arc;

use roost::{ServerState, Settings};

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub state: Arc<ServerState>,
    _storage: tempfile::TempDir,
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Start a server whose upstream release catalog points at `releases_url`.
///
/// The default-config and tz upstreams point at a closed port, exercising
/// the degrade-gracefully paths.
pub async fn spawn(releases_url: String) -> TestServer {
    let storage = tempfile::tempdir().expect("tempdir");
    let settings = Settings {
        bind_host: "127.0.0.1".to_owned(),
        bind_port: 0,
        storage_dir: storage.path().to_path_buf(),
        releases_url,
        default_config_url: "http://127.0.0.1:1/api/config".to_owned(),
        tz_url: "http://127.0.0.1:1/api/asset?type=tz".to_owned(),
    };

    let state = ServerState::init(settings).await.expect("server state");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");

    let app = roost::server::router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .expect("serve");
    });

    TestServer {
        addr,
        state,
        _storage: storage,
    }
}
