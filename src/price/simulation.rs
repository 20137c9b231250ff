use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::{prelude::FromPrimitive, Decimal};
use rust_decimal_macros::dec;

use crate::{
    error::{PriceUnavailable, UnavailableReason},
    ticker::Ticker,
};

use super::PriceProvider;

#[derive(Debug)]
struct Market {
    prices: HashMap<Ticker, Decimal>,
    rng: StdRng,
}

/// Offline provider: every fetch moves the ticker's price by a bounded
/// random step. Can be told to fail a share of fetches.
#[derive(Debug, Clone)]
pub struct SimulatedPriceProvider {
    market: Arc<Mutex<Market>>,
    default_price: Decimal,
    volatility: f64,
    failure_rate: f64,
    latency: Duration,
}

impl Default for SimulatedPriceProvider {
    fn default() -> Self {
        Self::new(rand::random())
    }
}

impl SimulatedPriceProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            market: Arc::new(Mutex::new(Market {
                prices: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
            })),
            default_price: dec!(100),
            volatility: 0.01,
            failure_rate: 0.0,
            latency: Duration::ZERO,
        }
    }

    pub fn with_price(self, ticker: Ticker, price: Decimal) -> Self {
        if let Ok(mut market) = self.market.lock() {
            market.prices.insert(ticker, price);
        }
        self
    }

    pub fn with_default_price(mut self, price: Decimal) -> Self {
        self.default_price = price;
        self
    }

    /// Maximum relative move per fetch, clamped to `[0, 0.5]`.
    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility.clamp(0.0, 0.5);
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn next_price(&self, ticker: &Ticker) -> Result<Decimal, PriceUnavailable> {
        let mut market = self.market.lock().map_err(|_| {
            PriceUnavailable::new(ticker, UnavailableReason::Request, "market poisoned")
        })?;
        let Market { prices, rng } = &mut *market;

        if self.failure_rate > 0.0 && rng.random::<f64>() < self.failure_rate {
            return Err(PriceUnavailable::new(
                ticker,
                UnavailableReason::Request,
                "simulated outage",
            ));
        }

        let step = if self.volatility > 0.0 {
            rng.random_range(-self.volatility..=self.volatility)
        } else {
            0.0
        };
        let factor = Decimal::from_f64(1.0 + step).unwrap_or(Decimal::ONE);

        let price = prices.entry(ticker.clone()).or_insert(self.default_price);
        *price = (*price * factor).round_dp(4).max(dec!(0.0001));
        Ok(*price)
    }
}

impl PriceProvider for SimulatedPriceProvider {
    async fn fetch(&self, ticker: &Ticker) -> Result<Decimal, PriceUnavailable> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_price(ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(s: &str) -> Ticker {
        Ticker::try_from(s).unwrap()
    }

    #[tokio::test]
    async fn test_flat_market() {
        let provider = SimulatedPriceProvider::new(7)
            .with_volatility(0.0)
            .with_price(ticker("AAPL"), dec!(180));

        assert_eq!(provider.fetch(&ticker("AAPL")).await, Ok(dec!(180)));
        assert_eq!(provider.fetch(&ticker("AAPL")).await, Ok(dec!(180)));
        assert_eq!(provider.fetch(&ticker("UNKNOWN")).await, Ok(dec!(100)));
    }

    #[tokio::test]
    async fn test_random_walk_is_bounded() {
        let provider = SimulatedPriceProvider::new(42)
            .with_volatility(0.05)
            .with_price(ticker("BTC"), dec!(1000));

        let mut last = dec!(1000);
        for _ in 0..50 {
            let price = provider.fetch(&ticker("BTC")).await.unwrap();
            assert!(price > Decimal::ZERO);
            assert!((price - last).abs() <= last * dec!(0.0501));
            last = price;
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_prices() {
        let a = SimulatedPriceProvider::new(3);
        let b = SimulatedPriceProvider::new(3);
        for _ in 0..5 {
            assert_eq!(
                a.fetch(&ticker("ETH")).await,
                b.fetch(&ticker("ETH")).await
            );
        }
    }

    #[tokio::test]
    async fn test_always_failing() {
        let provider = SimulatedPriceProvider::new(1).with_failure_rate(1.0);
        let res = provider.fetch(&ticker("AAPL")).await;
        assert!(matches!(
            res,
            Err(PriceUnavailable {
                reason: UnavailableReason::Request,
                ..
            })
        ));
    }
}
