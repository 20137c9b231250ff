use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::PortfolioError;

/// Instrument symbol of a holding, always trimmed and uppercased.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Ticker {
    type Error = PortfolioError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err(PortfolioError::Validation(String::from(
                "ticker must not be empty",
            )));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(PortfolioError::Validation(format!(
                "ticker {:?} must not contain whitespace",
                value
            )));
        }
        Ok(Self(value.to_uppercase()))
    }
}

impl TryFrom<&String> for Ticker {
    type Error = PortfolioError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl TryFrom<String> for Ticker {
    type Error = PortfolioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

impl From<Ticker> for String {
    fn from(value: Ticker) -> Self {
        value.0
    }
}

impl Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        let ticker = Ticker::try_from(" aapl ");
        assert!(ticker.is_ok());
        let ticker = ticker.unwrap();
        assert_eq!(ticker.as_str(), "AAPL");
        assert_eq!(ticker.to_string(), String::from("AAPL"));
    }

    #[test]
    fn test_rejects_empty_and_spaced() {
        assert!(matches!(
            Ticker::try_from("   "),
            Err(PortfolioError::Validation(_))
        ));
        assert!(matches!(
            Ticker::try_from("BRK B"),
            Err(PortfolioError::Validation(_))
        ));
    }

    #[test]
    fn test_serde_validates() {
        let ticker: Ticker = serde_json::from_str("\"msft\"").unwrap();
        assert_eq!(ticker.as_str(), "MSFT");
        assert!(serde_json::from_str::<Ticker>("\"\"").is_err());
    }
}
