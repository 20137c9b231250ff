use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use state::StateEvent;

pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod portfolio;
pub mod price;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod ticker;
pub mod tui;
pub mod valuation;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum AppEvent {
    State(StateEvent),
    CommandRejected { reason: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum AppCommandEvent {
    AddPosition {
        ticker: String,
        shares: Decimal,
        buy_price: Decimal,
    },
    RemovePositions {
        indices: Vec<usize>,
    },
    Refresh,
}
