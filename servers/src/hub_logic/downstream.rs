use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::{SinkExt, StreamExt};
use lib_hub::core::Incoming;
use lib_hub::{ChannelTransport, MessageRouter, Outbound};

use crate::hub_logic::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub router: MessageRouter,
    pub transport: Arc<ChannelTransport>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Serves the WebSocket endpoint until `shutdown` resolves. Open
/// connections are closed through the hub before the listener stops.
pub async fn run<F>(config: &ServerConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = state.router.hub().clone();
    let app = app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let shutdown = async move {
        shutdown.await;
        log::info!("Downstream server shutting down.");
        hub.shutdown();
    };

    if let Some((cert_path, key_path)) = &config.tls {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("Failed to load TLS configuration")?;

        let handle = axum_server::Handle::new();
        let signal = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            signal.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        log::info!("Downstream server listening on wss://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("TLS server failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        log::info!("Downstream server listening on ws://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server failed")?;
    }
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Bridges one socket to the hub: inbound frames go to the router, the
/// connection's outbound queue is drained into the socket.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = state.router.accept();
    let mut outbound = state.transport.attach(id);
    state.router.open(id);

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            item = outbound.recv() => match item {
                Some(Outbound::Text(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.router.on_message(id, Incoming::Text(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    state.router.on_message(id, Incoming::Binary(&bytes));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    log::debug!("Connection {} read error: {}", id, e);
                    break;
                }
                // Ping/pong are answered by the websocket layer.
                Some(Ok(_)) => {}
            },
        }
    }

    state.transport.detach(id);
    state.router.on_close(id);
}
