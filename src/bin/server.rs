use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zcatch_rust_server::config::{ConfigError, ModeConfig};
use zcatch_rust_server::constants::{TICK_MS, TICK_RATE};
use zcatch_rust_server::host::{HostMatch, MatchController};
use zcatch_rust_server::messaging::{Outbound, Target};
use zcatch_rust_server::server_protocol::{parse_client_message, ParsedClientMessage};
use zcatch_rust_server::server_utils::{
    normalize_players_to_start, normalize_time_limit_minutes, sanitize_name,
};
use zcatch_rust_server::types::{PlayerId, Team, Weapon};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    player_id: Option<PlayerId>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

/// Who a rendered outbound message goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Recipient {
    Everyone,
    Player(PlayerId),
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    client_by_player_id: HashMap<PlayerId, String>,
    host: HostMatch,
    announced_round: u32,
}

impl ServerState {
    fn new(config: ModeConfig) -> Self {
        Self {
            clients: HashMap::new(),
            client_by_player_id: HashMap::new(),
            host: HostMatch::new(config),
            announced_round: 0,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load mode config: {err}");
            std::process::exit(2);
        }
    };
    info!(
        players_to_start_round = config.players_to_start_round,
        time_limit_minutes = config.time_limit_minutes,
        "mode config loaded"
    );

    let state = Arc::new(Mutex::new(ServerState::new(config)));
    start_tick_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/round", get(round_handler))
        .route("/api/summary", get(summary_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {bind_addr}: {err}");
            std::process::exit(1);
        }
    };

    info!("listening on :{port}");
    if let Err(err) = axum::serve(listener, app).await {
        error!("server runtime failed: {err}");
        std::process::exit(1);
    }
}

fn load_config() -> Result<ModeConfig, ConfigError> {
    let mut config = match std::env::var("ZCATCH_CONFIG") {
        Ok(path) => ModeConfig::load(&PathBuf::from(path))?,
        Err(_) => ModeConfig::default(),
    };
    config.players_to_start_round = normalize_players_to_start(
        parse_env_i64("ZCATCH_PLAYERS_TO_START"),
        config.players_to_start_round,
    );
    config.time_limit_minutes = normalize_time_limit_minutes(
        parse_env_i64("ZCATCH_TIME_LIMIT_MINUTES"),
        config.time_limit_minutes,
    );
    Ok(config)
}

fn parse_env_i64(key: &str) -> Option<i64> {
    parse_i64(std::env::var(key).ok().as_deref())
}

fn parse_i64(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn round_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(guard.host.view())
}

async fn summary_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(json!({ "summary": guard.host.controller().last_summary() }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                player_id: None,
            },
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &client_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &client_id, text).await;
                } else {
                    send_error_to_client(&state, &client_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &client_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, client_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error_to_client(&state, client_id, "invalid message").await;
        return;
    };

    let mut guard = state.lock().await;
    let bound_player_id = guard
        .clients
        .get(client_id)
        .and_then(|client| client.player_id);

    match (message, bound_player_id) {
        (ParsedClientMessage::Hello { name, spectator }, None) => {
            handle_hello(&mut guard, client_id, &name, spectator);
        }
        (ParsedClientMessage::Hello { .. }, Some(_)) => {
            send_error(&mut guard, client_id, "already joined");
        }
        (ParsedClientMessage::Ping { t }, _) => {
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "pong",
                    "t": t,
                    "serverTime": now_ms(),
                }),
                QueuePolicy::DropOnFull,
            );
        }
        (_, None) => send_error(&mut guard, client_id, "send hello first"),
        (ParsedClientMessage::Attack { target, weapon }, Some(player_id)) => {
            if guard
                .host
                .eliminate(Some(player_id), target, weapon)
                .is_none()
            {
                send_error(&mut guard, client_id, "attack had no effect");
            }
        }
        (ParsedClientMessage::Die { cause }, Some(player_id)) => {
            if cause == Weapon::SelfKill {
                if let Some(resolution) = guard.host.self_kill(player_id) {
                    send_to_client(
                        &mut guard,
                        client_id,
                        &json!({
                            "type": "self_kill",
                            "resolution": format!("{resolution:?}"),
                        }),
                        QueuePolicy::DropOnFull,
                    );
                }
            } else {
                guard.host.eliminate(Some(player_id), player_id, cause);
            }
        }
        (ParsedClientMessage::DeadSpec { enabled }, Some(player_id)) => {
            guard.host.set_dead_spec_mode(player_id, enabled);
        }
        (ParsedClientMessage::Team { spectator }, Some(player_id)) => {
            let team = if spectator {
                Team::Spectators
            } else {
                Team::Game
            };
            guard.host.set_team(player_id, team);
        }
    }

    flush_outbox(&mut guard);
}

fn handle_hello(state: &mut ServerState, client_id: &str, name: &str, spectator: bool) {
    let name = sanitize_name(name);
    let Some(player_id) = state.host.connect(&name) else {
        warn!(client_id, "rejected client: no free slot");
        close_client(state, client_id, 1013, "server full");
        return;
    };

    if let Some(client) = state.clients.get_mut(client_id) {
        client.player_id = Some(player_id);
    }
    state
        .client_by_player_id
        .insert(player_id, client_id.to_string());
    if spectator {
        state.host.set_team(player_id, Team::Spectators);
    }
    info!(client_id, %player_id, name = name.as_str(), "player joined");

    let view = state.host.view();
    send_to_client(
        state,
        client_id,
        &json!({
            "type": "welcome",
            "playerId": player_id,
            "round": view,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

async fn handle_disconnect(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, client_id);
    flush_outbox(&mut guard);
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    let Some(context) = state.clients.remove(client_id) else {
        return;
    };
    let Some(player_id) = context.player_id else {
        return;
    };
    if state.client_by_player_id.get(&player_id).map(String::as_str) != Some(client_id) {
        return;
    }
    state.client_by_player_id.remove(&player_id);
    state.host.disconnect(player_id);
    info!(client_id, %player_id, "player left");
}

fn start_tick_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            tick_game(&mut guard);
        }
    });
}

fn tick_game(state: &mut ServerState) {
    let tick = state.host.step();
    flush_outbox(state);

    if tick % TICK_RATE as u64 == 0 {
        let view = state.host.view();
        broadcast(
            state,
            &json!({
                "type": "state",
                "round": view,
            }),
            QueuePolicy::DropOnFull,
        );
    }

    let finished = state
        .host
        .controller()
        .last_summary()
        .filter(|summary| summary.round != state.announced_round)
        .cloned();
    if let Some(summary) = finished {
        state.announced_round = summary.round;
        info!(
            round = summary.round,
            duration_ticks = summary.duration_ticks(),
            "round finished"
        );
        broadcast(
            state,
            &json!({
                "type": "round_over",
                "summary": summary,
            }),
            QueuePolicy::DisconnectOnFull,
        );
    }
}

/// Delivers everything the controller produced since the last flush.
fn flush_outbox(state: &mut ServerState) {
    for outbound in state.host.drain_outbox() {
        let (recipient, payload) = render_outbound(&outbound, state.host.controller());
        match recipient {
            Recipient::Everyone => broadcast(state, &payload, QueuePolicy::DropOnFull),
            Recipient::Player(player_id) => {
                let Some(client_id) = state.client_by_player_id.get(&player_id).cloned() else {
                    continue;
                };
                send_to_client(state, &client_id, &payload, QueuePolicy::DropOnFull);
            }
        }
    }
}

fn render_outbound(outbound: &Outbound, controller: &MatchController) -> (Recipient, Value) {
    match outbound {
        Outbound::ServerMessage { target, text } => {
            let recipient = match target {
                Target::All => Recipient::Everyone,
                Target::Player(player_id) => Recipient::Player(*player_id),
            };
            (recipient, json!({ "type": "chat", "text": text }))
        }
        Outbound::BroadcastLine { target, text } => (
            Recipient::Player(*target),
            json!({ "type": "broadcast", "text": text }),
        ),
        Outbound::SkinChange { observer, subject } => (
            Recipient::Player(*observer),
            json!({
                "type": "skin",
                "subject": subject,
                "state": controller.state(*subject),
                "caughtBy": controller.ledger().captor_of(*subject),
            }),
        ),
    }
}

fn send_to_client(state: &mut ServerState, client_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id);
    }
}

fn broadcast(state: &mut ServerState, message: &Value, policy: QueuePolicy) {
    let payload = message.to_string();
    let mut failed_clients = Vec::new();
    for (client_id, client) in &state.clients {
        if client.player_id.is_none() {
            continue;
        }
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed_clients.push(client_id.clone());
        }
    }
    for client_id in failed_clients {
        disconnect_client_internal(state, &client_id);
    }
}

fn close_client(state: &mut ServerState, client_id: &str, code: u16, reason: &str) {
    if let Some(client) = state.clients.get(client_id) {
        let _ = client.tx.try_send(OutboundMessage::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

fn send_error(state: &mut ServerState, client_id: &str, message: &str) {
    send_to_client(
        state,
        client_id,
        &json!({
            "type": "error",
            "message": message,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

async fn send_error_to_client(state: &SharedState, client_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_error(&mut guard, client_id, message);
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
