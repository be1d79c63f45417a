use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, response::Html, routing::get};

use super::{DashboardSnapshot, DashboardState};
use crate::render::SKELETON_CONNECTIONS;

const INDEX_TEMPLATE: &str = include_str!("index.html");
const CONNECTIONS_PLACEHOLDER: &str = "__HAND_CONNECTIONS__";

pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/state", get(current_state))
        .with_state(state)
}

async fn current_state(State(state): State<Arc<DashboardState>>) -> Json<DashboardSnapshot> {
    Json(state.get())
}

async fn index() -> Html<String> {
    Html(index_page())
}

fn index_page() -> String {
    let connections =
        serde_json::to_string(SKELETON_CONNECTIONS).unwrap_or_else(|_| "[]".to_string());
    INDEX_TEMPLATE.replace(CONNECTIONS_PLACEHOLDER, &connections)
}

/// Binds the dashboard socket and serves it from a detached thread with its
/// own runtime. The thread never holds up process exit.
pub fn spawn_dashboard_server(
    state: Arc<DashboardState>,
    host: &str,
    port: u16,
) -> Result<SocketAddr> {
    let listener = TcpListener::bind((host, port))
        .with_context(|| format!("failed to bind dashboard on {host}:{port}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make dashboard socket non-blocking")?;
    let addr = listener
        .local_addr()
        .context("dashboard socket has no local address")?;

    let app = router(state);
    thread::Builder::new()
        .name("dashboard".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("failed to start dashboard runtime: {err:?}");
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        log::error!("failed to adopt dashboard socket: {err:?}");
                        return;
                    }
                };
                if let Err(err) = axum::serve(listener, app).await {
                    log::error!("dashboard server stopped: {err:?}");
                }
            });
        })
        .context("failed to spawn dashboard thread")?;

    log::info!("dashboard listening on http://{addr}");
    Ok(addr)
}
