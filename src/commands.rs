use std::sync::Arc;

use tokio::sync::{broadcast::Sender, mpsc::Receiver, RwLock};
use tracing::{info, warn};

use crate::{
    error::PortfolioError,
    portfolio::PositionSelector,
    scheduler::RefreshTrigger,
    state::{State, StateEvent},
    AppCommandEvent, AppEvent,
};

/// Applies one command to the store. Successful mutations publish the new
/// position list and request an immediate refresh.
pub async fn process_command(
    state: &Arc<RwLock<State>>,
    trigger: &RefreshTrigger,
    tx_app: &Sender<AppEvent>,
    command: AppCommandEvent,
) -> Result<(), PortfolioError> {
    info!("Got command {:?}", command);

    let positions = match command {
        AppCommandEvent::Refresh => {
            trigger.trigger();
            return Ok(());
        }
        AppCommandEvent::AddPosition {
            ticker,
            shares,
            buy_price,
        } => {
            let mut state = state.write().await;
            let position = state.portfolio.add(&ticker, shares, buy_price)?;
            info!("added {}", position);
            state.portfolio.list()
        }
        AppCommandEvent::RemovePositions { indices } => {
            let mut state = state.write().await;
            let removed = state
                .portfolio
                .remove(&PositionSelector::Indices(indices))?;
            for position in removed {
                info!("removed {}", position);
            }
            state.portfolio.list()
        }
    };

    let _ = tx_app.send(AppEvent::State(StateEvent::Positions(positions)));
    trigger.trigger();
    Ok(())
}

/// Drains `rx_cmd`, reporting rejected commands back to subscribers.
pub async fn run_commands(
    state: Arc<RwLock<State>>,
    trigger: RefreshTrigger,
    tx_app: Sender<AppEvent>,
    mut rx_cmd: Receiver<AppCommandEvent>,
) {
    while let Some(command) = rx_cmd.recv().await {
        if let Err(err) = process_command(&state, &trigger, &tx_app, command).await {
            warn!("command rejected : {}", err);
            let _ = tx_app.send(AppEvent::CommandRejected {
                reason: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use tokio::sync::broadcast;

    use super::*;

    fn setup() -> (Arc<RwLock<State>>, RefreshTrigger, Sender<AppEvent>) {
        let mut state = State::new();
        state.portfolio.add("AAPL", dec!(10), dec!(150)).unwrap();
        let (tx_app, _) = broadcast::channel(16);
        (
            Arc::new(RwLock::new(state)),
            RefreshTrigger::default(),
            tx_app,
        )
    }

    #[tokio::test]
    async fn test_add_publishes_positions() {
        let (state, trigger, tx_app) = setup();
        let mut rx = tx_app.subscribe();

        let res = process_command(
            &state,
            &trigger,
            &tx_app,
            AppCommandEvent::AddPosition {
                ticker: String::from("msft"),
                shares: dec!(2),
                buy_price: dec!(300),
            },
        )
        .await;

        assert!(res.is_ok());
        match rx.recv().await.unwrap() {
            AppEvent::State(StateEvent::Positions(positions)) => {
                assert_eq!(positions.len(), 2);
                assert_eq!(positions[1].ticker.as_str(), "MSFT");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_add_is_rejected() {
        let (state, trigger, tx_app) = setup();

        let res = process_command(
            &state,
            &trigger,
            &tx_app,
            AppCommandEvent::AddPosition {
                ticker: String::new(),
                shares: dec!(10),
                buy_price: dec!(100),
            },
        )
        .await;

        assert!(matches!(res, Err(PortfolioError::Validation(_))));
        assert_eq!(state.read().await.portfolio.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_row_is_reported() {
        let (state, trigger, tx_app) = setup();
        let mut rx = tx_app.subscribe();
        let (tx_cmd, rx_cmd) = tokio::sync::mpsc::channel(4);

        let runner = tokio::task::spawn(run_commands(
            state.clone(),
            trigger,
            tx_app.clone(),
            rx_cmd,
        ));
        tx_cmd
            .send(AppCommandEvent::RemovePositions { indices: vec![5] })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            AppEvent::CommandRejected { reason } => assert!(reason.contains("not found")),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(state.read().await.portfolio.len(), 1);

        drop(tx_cmd);
        runner.await.unwrap();
    }
}
