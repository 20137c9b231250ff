use std::{str::FromStr, time::Duration};

use rust_decimal::Decimal;

use crate::error::ConfigError;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A position given at startup, as `TICKER:SHARES:BUY_PRICE`.
///
/// Only the syntax is checked here; the values go through the same
/// validation as interactive adds when the store is seeded.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionSeed {
    pub ticker: String,
    pub shares: Decimal,
    pub buy_price: Decimal,
}

impl FromStr for PositionSeed {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let [ticker, shares, buy_price] = parts.as_slice() else {
            return Err(ConfigError::SeedFormat(s.to_string()));
        };
        let number = |value: &str| {
            Decimal::from_str(value).map_err(|e| ConfigError::SeedNumber {
                seed: s.to_string(),
                message: e.to_string(),
            })
        };
        Ok(Self {
            ticker: ticker.to_string(),
            shares: number(shares)?,
            buy_price: number(buy_price)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub seed_positions: Vec<PositionSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            seed_positions: vec![],
        }
    }
}

impl Config {
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn seed_positions(mut self, seeds: Vec<PositionSeed>) -> Self {
        self.seed_positions = seeds;
        self
    }
}
