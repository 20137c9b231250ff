use std::future::Future;

use rust_decimal::Decimal;

use crate::{error::PriceUnavailable, ticker::Ticker};

pub mod exchange;
pub mod simulation;

pub use exchange::ExchangePriceProvider;
pub use simulation::SimulatedPriceProvider;

/// Source of current prices. Calls for different tickers fail independently.
pub trait PriceProvider {
    fn fetch(
        &self,
        ticker: &Ticker,
    ) -> impl Future<Output = Result<Decimal, PriceUnavailable>> + Send;
}
