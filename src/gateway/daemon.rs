use std::{
    fs,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    sync::atomic::AtomicBool,
};

use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::action_queue::ActionQueue;
use crate::config::ConfigStore;
use crate::event_bus::EventBus;
use crate::memory::Memory;
use crate::message_bus::MessageBus;
use crate::skill_registry::SkillsRegistry;

use super::{
    auth::{auth_middleware, load_or_create_token},
    routes::{
        cancel_action, chat_history, clear_queue, execute_skill, get_action, get_config, health,
        list_actions, list_skills, loop_start, loop_stop, memory_recent, memory_search,
        push_action, send_chat, set_config,
    },
    ws::ws_handler,
};

const DEFAULT_PORT: u16 = 18790;
const MAX_PORT_ATTEMPTS: u16 = 10;

/// Shared state handed to every gateway route handler (§6): the same
/// component handles the daemon runtime wires together, so a gateway
/// request and a heartbeat tick act on one shared Action Queue / Memory /
/// Skills Registry rather than parallel copies.
#[derive(Clone)]
pub struct GatewayState {
    pub bus: Arc<dyn EventBus>,
    pub queue: Arc<dyn ActionQueue>,
    pub memory: Arc<dyn Memory>,
    pub skills: Arc<SkillsRegistry>,
    pub config: Arc<ConfigStore>,
    pub message_bus: Arc<MessageBus>,
    pub loop_running: Arc<AtomicBool>,
}

/// Path to the PID file written on daemon start.
pub fn pid_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".mesoclaw")
        .join("daemon.pid")
}

/// Start the HTTP + WebSocket gateway (§6), binding to `127.0.0.1` starting
/// at port [`DEFAULT_PORT`]. If that port is taken, increments up to
/// [`MAX_PORT_ATTEMPTS`] times before returning an error.
///
/// Writes `daemon.pid` on successful bind. Blocks until the server shuts down.
pub async fn start_gateway(state: GatewayState) -> Result<(), String> {
    // Ensure the token exists before accepting connections.
    load_or_create_token()?;

    let loop_running = state.loop_running.clone();

    let protected = Router::new()
        .route("/api/v1/actions", post(push_action).get(list_actions))
        .route("/api/v1/actions/clear", post(clear_queue))
        .route("/api/v1/actions/{id}", get(get_action).delete(cancel_action))
        .route("/api/v1/skills", get(list_skills))
        .route("/api/v1/skills/{name}", post(execute_skill))
        .route("/api/v1/memory/recent", get(memory_recent))
        .route("/api/v1/memory/search", get(memory_search))
        .route("/api/v1/config/{key}", get(get_config))
        .route("/api/v1/config", post(set_config))
        .route("/api/v1/loop/start", post(loop_start))
        .route("/api/v1/loop/stop", post(loop_stop))
        .route("/api/v1/chat", get(chat_history).post(send_chat))
        .route("/api/v1/ws", get(ws_handler))
        .layer(middleware::from_fn(auth_middleware))
        .with_state(state.clone());

    let public = Router::new()
        .route("/api/v1/health", get(health))
        .with_state(state);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive()); // restricted to loopback by the bind below

    let listener = bind_with_fallback(DEFAULT_PORT).await?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;

    write_pid_file(addr.port())?;
    tracing::info!(%addr, "mesoclaw daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(loop_running))
        .await
        .map_err(|e| format!("daemon error: {e}"))
}

/// Resolves on SIGTERM or Ctrl-C, flipping `loop_running` off first so the
/// reasoning-loop tick stops claiming new work while axum drains in-flight
/// requests.
async fn shutdown_signal(loop_running: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    loop_running.store(false, std::sync::atomic::Ordering::Relaxed);
    tracing::info!("received shutdown signal, draining gateway");
}

async fn bind_with_fallback(start_port: u16) -> Result<TcpListener, String> {
    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port + offset;
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid addr");
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < MAX_PORT_ATTEMPTS => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {start_port}–{}: {e}",
                    start_port + MAX_PORT_ATTEMPTS - 1
                ));
            }
        }
    }
    unreachable!()
}

fn write_pid_file(port: u16) -> Result<(), String> {
    let path = pid_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create .mesoclaw dir: {e}"))?;
    }
    let content = format!("{}\n{}\n", std::process::id(), port);
    fs::write(&path, content).map_err(|e| format!("failed to write PID file: {e}"))
}
