use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::any,
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::{
    select,
    sync::{broadcast::Sender, mpsc, RwLock},
};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::{state::StateEvent, AppCommandEvent, AppEvent};

struct ServerState {
    app_tx: Sender<AppEvent>,
    cmd_tx: mpsc::Sender<AppCommandEvent>,
    app_state: Arc<RwLock<crate::state::State>>,
}

type SharedServerState = Arc<ServerState>;

pub async fn start(
    address: String,
    app_state: Arc<RwLock<crate::state::State>>,
    app_tx: Sender<AppEvent>,
    cmd_tx: mpsc::Sender<AppCommandEvent>,
) -> Result<()> {
    let state = Arc::from(ServerState {
        app_tx,
        cmd_tx,
        app_state,
    });

    let app = Router::new()
        .route("/ws", any(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("listening on {}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<SharedServerState>,
) -> impl IntoResponse {
    info!("dashboard connected from {}", addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Events a freshly connected client needs to draw the current session.
async fn initial_events(state: &ServerState) -> Vec<AppEvent> {
    let app_state = state.app_state.read().await;
    let mut events = vec![AppEvent::State(StateEvent::Positions(
        app_state.portfolio.list(),
    ))];
    if let Some(snapshot) = &app_state.last_snapshot {
        events.push(AppEvent::State(StateEvent::Refreshed {
            snapshot: snapshot.clone(),
            history: app_state.history.as_sequence(),
        }));
    }
    events
}

fn to_message(event: &AppEvent) -> Option<Message> {
    match serde_json::ser::to_string(event) {
        Ok(msg) => Some(Message::Text(msg.into())),
        Err(err) => {
            error!("Failed to serialize event : {}", err);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: SharedServerState) {
    // subscribe before the initial read so no refresh slips in between
    let app_rx = BroadcastStream::new(state.app_tx.subscribe());
    let (mut sender, mut receiver) = socket.split();

    for event in initial_events(&state).await {
        if let Some(msg) = to_message(&event) {
            if sender.send(msg).await.is_err() {
                return;
            }
        }
    }

    let mut send_task = tokio::task::spawn(async move {
        let mut app_rx = app_rx;
        while let Some(event) = app_rx.next().await {
            match event {
                Ok(event) => {
                    let Some(msg) = to_message(&event) else {
                        continue;
                    };
                    if sender.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(err) => warn!("dashboard lagging : {}", err),
            }
        }
    });

    let cmd_tx = state.cmd_tx.clone();
    let mut recv_task = tokio::task::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::de::from_str::<AppCommandEvent>(text.as_str()) {
                        Ok(cmd) => {
                            if cmd_tx.send(cmd).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => warn!("Invalid command {:?} : {}", text.as_str(), err),
                    }
                }
                Message::Close(frame) => {
                    debug!("Connection closed : {:?}", frame);
                    return;
                }
                _ => {}
            }
        }
    });

    select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }
    info!("dashboard disconnected");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::{state::State, valuation::PortfolioSnapshot};

    use super::*;

    fn server_state(state: State) -> ServerState {
        let (app_tx, _) = tokio::sync::broadcast::channel(4);
        let (cmd_tx, _) = mpsc::channel(4);
        ServerState {
            app_tx,
            cmd_tx,
            app_state: Arc::new(RwLock::new(state)),
        }
    }

    #[tokio::test]
    async fn test_initial_events_before_first_refresh() {
        let mut state = State::new();
        state.portfolio.add("AAPL", dec!(1), dec!(100)).unwrap();

        let events = initial_events(&server_state(state)).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AppEvent::State(StateEvent::Positions(positions)) if positions.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_initial_events_after_refresh() {
        let mut state = State::new();
        state.record_snapshot(PortfolioSnapshot {
            rows: vec![],
            total_value: dec!(0),
            as_of: Utc::now(),
        });

        let events = initial_events(&server_state(state)).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            AppEvent::State(StateEvent::Refreshed { history, .. }) if history.len() == 1
        ));
    }

    #[test]
    fn test_command_json() {
        let cmd: AppCommandEvent = serde_json::from_str(
            r#"{"AddPosition":{"ticker":"AAPL","shares":"10","buy_price":"150.5"}}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            AppCommandEvent::AddPosition { ref ticker, shares, .. } if ticker == "AAPL" && shares == dec!(10)
        ));
        assert!(to_message(&AppEvent::CommandRejected {
            reason: String::from("nope")
        })
        .is_some());
    }
}
