use serde::{Deserialize, Serialize};

use crate::{
    config::PositionSeed,
    error::PortfolioError,
    history::{HistoryPoint, HistorySeries},
    portfolio::{PortfolioStore, Position},
    valuation::PortfolioSnapshot,
};

/// Session state shared by the command surface and the refresh cycle.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct State {
    pub portfolio: PortfolioStore,
    pub history: HistorySeries,
    pub last_snapshot: Option<PortfolioSnapshot>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum StateEvent {
    Positions(Vec<Position>),
    Refreshed {
        snapshot: PortfolioSnapshot,
        history: Vec<HistoryPoint>,
    },
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seeds(seeds: &[PositionSeed]) -> Result<Self, PortfolioError> {
        let mut state = Self::new();
        for seed in seeds {
            state
                .portfolio
                .add(&seed.ticker, seed.shares, seed.buy_price)?;
        }
        Ok(state)
    }

    /// Keeps `snapshot` as the latest one and appends its total to history.
    pub fn record_snapshot(&mut self, snapshot: PortfolioSnapshot) {
        self.history.record(snapshot.as_of, snapshot.total_value);
        self.last_snapshot = Some(snapshot);
    }
}
