use std::{collections::BTreeSet, fmt::Display};

use colored::Colorize;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{error::PortfolioError, ticker::Ticker};

/// One lot: a number of shares bought at a single price.
///
/// Shares and buy price are positive and their product fits in a `Decimal`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "RawPosition")]
pub struct Position {
    pub ticker: Ticker,
    pub shares: Decimal,
    pub buy_price: Decimal,
}

#[derive(Deserialize)]
struct RawPosition {
    ticker: String,
    shares: Decimal,
    buy_price: Decimal,
}

impl TryFrom<RawPosition> for Position {
    type Error = PortfolioError;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        Self::new(&raw.ticker, raw.shares, raw.buy_price)
    }
}

impl Position {
    pub fn new(ticker: &str, shares: Decimal, buy_price: Decimal) -> Result<Self, PortfolioError> {
        let ticker = Ticker::try_from(ticker)?;
        if shares <= Decimal::ZERO {
            return Err(PortfolioError::Validation(format!(
                "shares must be positive, got {}",
                shares
            )));
        }
        if buy_price <= Decimal::ZERO {
            return Err(PortfolioError::Validation(format!(
                "buy price must be positive, got {}",
                buy_price
            )));
        }
        if shares.checked_mul(buy_price).is_none() {
            return Err(PortfolioError::Validation(format!(
                "cost basis of {} @ {} is out of range",
                shares, buy_price
            )));
        }
        Ok(Self {
            ticker,
            shares,
            buy_price,
        })
    }

    pub fn cost_basis(&self) -> Decimal {
        self.shares.saturating_mul(self.buy_price)
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} @ {}", self.ticker, self.shares, self.buy_price)
    }
}

/// Rows to remove from a [`PortfolioStore`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum PositionSelector {
    /// Row indices in display order.
    Indices(Vec<usize>),
    /// First row matching ticker, shares and buy price.
    Exact(Position),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PortfolioStore {
    positions: Vec<Position>,
}

impl PortfolioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a validated position at the end of the list.
    pub fn add(
        &mut self,
        ticker: &str,
        shares: Decimal,
        buy_price: Decimal,
    ) -> Result<Position, PortfolioError> {
        let position = Position::new(ticker, shares, buy_price)?;
        let total_cost = self
            .positions
            .iter()
            .try_fold(position.cost_basis(), |total, p| total.checked_add(p.cost_basis()));
        if total_cost.is_none() {
            return Err(PortfolioError::Validation(format!(
                "adding {} would put the portfolio cost basis out of range",
                position
            )));
        }
        self.positions.push(position.clone());
        Ok(position)
    }

    /// Removes every selected row or none of them.
    pub fn remove(&mut self, selector: &PositionSelector) -> Result<Vec<Position>, PortfolioError> {
        let indices: BTreeSet<usize> = match selector {
            PositionSelector::Indices(indices) => {
                if indices.is_empty() {
                    return Err(PortfolioError::NotFound(String::from("empty selection")));
                }
                if let Some(missing) = indices.iter().find(|i| **i >= self.positions.len()) {
                    return Err(PortfolioError::NotFound(format!(
                        "row {} (portfolio has {} rows)",
                        missing,
                        self.positions.len()
                    )));
                }
                indices.iter().copied().collect()
            }
            PositionSelector::Exact(position) => {
                let index = self
                    .positions
                    .iter()
                    .position(|p| p == position)
                    .ok_or_else(|| PortfolioError::NotFound(position.to_string()))?;
                BTreeSet::from([index])
            }
        };

        // highest index first so earlier indices stay valid
        let mut removed: Vec<Position> = indices
            .iter()
            .rev()
            .map(|i| self.positions.remove(*i))
            .collect();
        removed.reverse();
        Ok(removed)
    }

    pub fn list(&self) -> Vec<Position> {
        self.positions.clone()
    }

    /// Distinct tickers in first-appearance order.
    pub fn tickers(&self) -> Vec<Ticker> {
        self.positions
            .iter()
            .map(|p| p.ticker.clone())
            .unique()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl Display for PortfolioStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self
            .positions
            .iter()
            .map(|p| {
                format!(
                    "{}: {} (@{})",
                    p.ticker,
                    p.shares.to_string().purple(),
                    p.buy_price
                )
            })
            .join(" / ");
        write!(f, "{} lots : {}", self.positions.len().to_string().yellow(), s)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn store() -> PortfolioStore {
        let mut store = PortfolioStore::new();
        store.add("AAPL", dec!(10), dec!(150)).unwrap();
        store.add("MSFT", dec!(2), dec!(300)).unwrap();
        store.add("aapl", dec!(5), dec!(120)).unwrap();
        store
    }

    #[test]
    fn test_add_appends_at_end() {
        let mut store = store();
        let before = store.list();

        let added = store.add("nvda", dec!(1.5), dec!(420.10)).unwrap();
        let after = store.list();

        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after.last(), Some(&added));
        assert_eq!(added.ticker.as_str(), "NVDA");
        assert_eq!(added.shares, dec!(1.5));
        assert_eq!(added.buy_price, dec!(420.10));
    }

    #[test]
    fn test_add_rejects_invalid_input() {
        let mut store = store();
        let size = store.len();

        assert!(matches!(
            store.add("", dec!(10), dec!(100)),
            Err(PortfolioError::Validation(_))
        ));
        assert!(matches!(
            store.add("AAPL", dec!(0), dec!(100)),
            Err(PortfolioError::Validation(_))
        ));
        assert!(matches!(
            store.add("AAPL", dec!(10), dec!(-1)),
            Err(PortfolioError::Validation(_))
        ));
        assert_eq!(store.len(), size);
    }

    #[test]
    fn test_add_rejects_out_of_range_cost() {
        let mut store = PortfolioStore::new();

        assert!(matches!(
            store.add("AAPL", dec!(50000000000000000000000000000), dec!(2)),
            Err(PortfolioError::Validation(_))
        ));
        assert!(store.is_empty());

        // each lot fits but their sum does not
        store
            .add("AAPL", dec!(30000000000000000000000000000), dec!(1))
            .unwrap();
        store
            .add("MSFT", dec!(30000000000000000000000000000), dec!(1))
            .unwrap();
        assert!(matches!(
            store.add("NVDA", dec!(30000000000000000000000000000), dec!(1)),
            Err(PortfolioError::Validation(_))
        ));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_deserialize_validates_position() {
        let position: Position =
            serde_json::from_str(r#"{"ticker":"aapl","shares":"10","buy_price":"150"}"#).unwrap();
        assert_eq!(position, Position::new("AAPL", dec!(10), dec!(150)).unwrap());

        assert!(
            serde_json::from_str::<Position>(r#"{"ticker":"AAPL","shares":"0","buy_price":"150"}"#)
                .is_err()
        );
        assert!(
            serde_json::from_str::<Position>(r#"{"ticker":" ","shares":"1","buy_price":"150"}"#)
                .is_err()
        );
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut store = store();

        let removed = store.remove(&PositionSelector::Indices(vec![1])).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].ticker.as_str(), "MSFT");
        let shares: Vec<_> = store.list().into_iter().map(|p| p.shares).collect();
        assert_eq!(shares, vec![dec!(10), dec!(5)]);
    }

    #[test]
    fn test_remove_multiple_rows() {
        let mut store = store();

        let removed = store
            .remove(&PositionSelector::Indices(vec![2, 0]))
            .unwrap();

        assert_eq!(removed[0].shares, dec!(10));
        assert_eq!(removed[1].shares, dec!(5));
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].ticker.as_str(), "MSFT");
    }

    #[test]
    fn test_remove_missing_leaves_store_unchanged() {
        let mut store = store();
        let before = store.list();

        assert!(matches!(
            store.remove(&PositionSelector::Indices(vec![0, 3])),
            Err(PortfolioError::NotFound(_))
        ));
        assert_eq!(store.list(), before);

        let gone = Position::new("TSLA", dec!(1), dec!(200)).unwrap();
        assert!(matches!(
            store.remove(&PositionSelector::Exact(gone)),
            Err(PortfolioError::NotFound(_))
        ));
        assert_eq!(store.list(), before);
    }

    #[test]
    fn test_remove_twice_fails() {
        let mut store = store();
        let lot = store.list()[2].clone();

        assert!(store.remove(&PositionSelector::Exact(lot.clone())).is_ok());
        assert!(matches!(
            store.remove(&PositionSelector::Exact(lot)),
            Err(PortfolioError::NotFound(_))
        ));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_list_is_a_copy() {
        let store = store();
        let mut listed = store.list();
        listed.clear();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_tickers_are_distinct() {
        let store = store();
        let tickers: Vec<String> = store.tickers().into_iter().map(String::from).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }
}
