use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub total_value: Decimal,
}

/// Total portfolio value over the session, oldest first. Never evicts.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HistorySeries {
    points: Vec<HistoryPoint>,
}

impl HistorySeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, timestamp: DateTime<Utc>, total_value: Decimal) {
        let timestamp = match self.points.last() {
            Some(last) if timestamp < last.timestamp => {
                warn!(
                    "history timestamp {} is before {}, clamping",
                    timestamp, last.timestamp
                );
                last.timestamp
            }
            _ => timestamp,
        };
        self.points.push(HistoryPoint {
            timestamp,
            total_value,
        });
    }

    pub fn as_sequence(&self) -> Vec<HistoryPoint> {
        self.points.clone()
    }

    pub fn last(&self) -> Option<&HistoryPoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_record_appends_in_order() {
        let start = Utc::now();
        let mut history = HistorySeries::new();

        history.record(start, dec!(100));
        history.record(start + Duration::seconds(10), dec!(110));
        history.record(start + Duration::seconds(10), dec!(90));

        let points = history.as_sequence();
        assert_eq!(points.len(), 3);
        assert_eq!(
            points.iter().map(|p| p.total_value).collect::<Vec<_>>(),
            vec![dec!(100), dec!(110), dec!(90)]
        );
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_earlier_timestamp_is_clamped() {
        let start = Utc::now();
        let mut history = HistorySeries::new();

        history.record(start, dec!(100));
        history.record(start - Duration::seconds(30), dec!(120));

        assert_eq!(history.len(), 2);
        let last = history.last().unwrap();
        assert_eq!(last.timestamp, start);
        assert_eq!(last.total_value, dec!(120));
    }

    #[test]
    fn test_sequence_is_a_copy() {
        let mut history = HistorySeries::new();
        history.record(Utc::now(), dec!(1));

        let mut points = history.as_sequence();
        points.clear();

        assert_eq!(history.len(), 1);
    }
}
