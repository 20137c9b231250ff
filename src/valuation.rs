//! Pure valuation of a list of positions against resolved prices.
//!
//! When a price cannot be resolved the row keeps its cost basis as value
//! (unrealized result treated as flat) and is flagged `stale`. Stale rows
//! still count towards the portfolio total. A row whose market value is out
//! of `Decimal` range, alone or added to the rows before it, is handled the
//! same way.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PriceUnavailable, UnavailableReason},
    portfolio::Position,
    ticker::Ticker,
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnrichedRow {
    pub position: Position,
    pub current_price: Option<Decimal>,
    pub position_value: Decimal,
    pub cost_basis: Decimal,
    pub gain_loss: Decimal,
    pub return_pct: Decimal,
    pub stale: bool,
}

impl EnrichedRow {
    pub fn new(position: Position, price: Result<Decimal, PriceUnavailable>) -> Self {
        let cost_basis = position.cost_basis();
        let value = price.and_then(|price| match position.shares.checked_mul(price) {
            Some(value) => Ok((price, value)),
            None => Err(PriceUnavailable::new(
                &position.ticker,
                UnavailableReason::InvalidPrice,
                format!("value of {} shares at {} is out of range", position.shares, price),
            )),
        });
        let (current_price, position_value, stale) = match value {
            Ok((price, value)) => (Some(price), value, false),
            Err(_) => (None, cost_basis, true),
        };
        let gain_loss = position_value.saturating_sub(cost_basis);
        Self {
            position,
            current_price,
            position_value,
            cost_basis,
            gain_loss,
            return_pct: percent_of(gain_loss, cost_basis),
            stale,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Allocation {
    pub ticker: Ticker,
    pub value: Decimal,
    pub weight_pct: Decimal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PortfolioSnapshot {
    pub rows: Vec<EnrichedRow>,
    pub total_value: Decimal,
    pub as_of: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn total_cost(&self) -> Decimal {
        self.rows
            .iter()
            .fold(Decimal::ZERO, |total, row| total.saturating_add(row.cost_basis))
    }

    pub fn total_gain_loss(&self) -> Decimal {
        self.total_value.saturating_sub(self.total_cost())
    }

    pub fn total_return_pct(&self) -> Decimal {
        percent_of(self.total_gain_loss(), self.total_cost())
    }

    pub fn stale_count(&self) -> usize {
        self.rows.iter().filter(|row| row.stale).count()
    }

    /// Value share of each ticker, lots merged, in first-appearance order.
    pub fn allocations(&self) -> Vec<Allocation> {
        value_by_ticker(&self.rows)
            .into_iter()
            .map(|(ticker, value)| Allocation {
                weight_pct: percent_of(value, self.total_value),
                ticker,
                value,
            })
            .collect()
    }
}

fn value_by_ticker(rows: &[EnrichedRow]) -> Vec<(Ticker, Decimal)> {
    rows.iter()
        .map(|row| &row.position.ticker)
        .unique()
        .map(|ticker| {
            let value = rows
                .iter()
                .filter(|row| &row.position.ticker == ticker)
                .fold(Decimal::ZERO, |total, row| {
                    total.saturating_add(row.position_value)
                });
            (ticker.clone(), value)
        })
        .collect_vec()
}

/// `part` as a percentage of `whole`, zero for an empty whole and saturated
/// when out of range.
fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .unwrap_or(if part.is_sign_negative() == whole.is_sign_negative() {
            Decimal::MAX
        } else {
            Decimal::MIN
        })
}

/// Values every position with `lookup`, keeping input order.
///
/// A priced row that would push the running total out of range falls back to
/// its cost basis. The total saturates if even that does not fit.
pub fn value_portfolio<F>(positions: &[Position], lookup: F, as_of: DateTime<Utc>) -> PortfolioSnapshot
where
    F: Fn(&Ticker) -> Result<Decimal, PriceUnavailable>,
{
    let mut total_value = Decimal::ZERO;
    let rows: Vec<EnrichedRow> = positions
        .iter()
        .map(|position| {
            let mut row = EnrichedRow::new(position.clone(), lookup(&position.ticker));
            if !row.stale && total_value.checked_add(row.position_value).is_none() {
                row = EnrichedRow::new(
                    position.clone(),
                    Err(PriceUnavailable::new(
                        &position.ticker,
                        UnavailableReason::InvalidPrice,
                        "portfolio value out of range",
                    )),
                );
            }
            total_value = total_value.saturating_add(row.position_value);
            row
        })
        .collect_vec();

    PortfolioSnapshot {
        rows,
        total_value,
        as_of,
    }
}
