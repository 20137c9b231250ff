use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;

use crate::ticker::Ticker;

/// Failures of portfolio mutations. Both variants leave the store untouched.
#[derive(Error, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum PortfolioError {
    #[error("invalid position: {0}")]
    Validation(String),
    #[error("position not found: {0}")]
    NotFound(String),
}

#[derive(Display, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum UnavailableReason {
    Request,
    NotListed,
    InvalidPrice,
    Timeout,
}

/// A single ticker's price could not be resolved this cycle.
#[derive(Error, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[error("price unavailable for {ticker} ({reason}): {message}")]
pub struct PriceUnavailable {
    pub ticker: Ticker,
    pub reason: UnavailableReason,
    pub message: String,
}

impl PriceUnavailable {
    pub fn new(ticker: &Ticker, reason: UnavailableReason, message: impl Into<String>) -> Self {
        Self {
            ticker: ticker.clone(),
            reason,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("position seed {0:?} must look like TICKER:SHARES:BUY_PRICE")]
    SeedFormat(String),
    #[error("position seed {seed:?} has an invalid number: {message}")]
    SeedNumber { seed: String, message: String },
}
