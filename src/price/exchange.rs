use anyhow::Result;
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{PriceUnavailable, UnavailableReason},
    ticker::Ticker,
};

use super::PriceProvider;

pub const ENDPOINT: &str = "https://data-api.binance.vision";

#[derive(Deserialize, Debug, Clone)]
#[allow(dead_code)]
struct TickerPrice {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

/// Last traded price from a spot exchange's public ticker endpoint.
///
/// Holdings are quoted against `quote`, so `BTC` is looked up as `BTCUSDT`
/// when the quote is `USDT`. An empty quote sends the ticker as-is.
#[derive(Debug, Clone)]
pub struct ExchangePriceProvider {
    client: Client,
    endpoint: String,
    quote: String,
}

impl ExchangePriceProvider {
    pub fn new(endpoint: &str, quote: &str) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            quote: quote.to_uppercase(),
        })
    }

    pub fn symbol(&self, ticker: &Ticker) -> String {
        format!("{}{}", ticker, self.quote)
    }

    fn url(&self, ticker: &Ticker) -> Result<Url, PriceUnavailable> {
        Url::parse_with_params(
            format!("{}/api/v3/ticker/price", self.endpoint).as_str(),
            &[("symbol", self.symbol(ticker))],
        )
        .map_err(|e| PriceUnavailable::new(ticker, UnavailableReason::Request, e.to_string()))
    }
}

impl PriceProvider for ExchangePriceProvider {
    async fn fetch(&self, ticker: &Ticker) -> Result<Decimal, PriceUnavailable> {
        let request_error =
            |e: reqwest::Error| PriceUnavailable::new(ticker, UnavailableReason::Request, e.to_string());

        let url = self.url(ticker)?;
        debug!("{}", url);

        let response = self.client.get(url).send().await.map_err(request_error)?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(PriceUnavailable::new(
                ticker,
                UnavailableReason::NotListed,
                format!("{} is not listed", self.symbol(ticker)),
            ));
        }
        let body = response
            .error_for_status()
            .map_err(request_error)?
            .text()
            .await
            .map_err(request_error)?;

        parse_ticker_price(ticker, &body)
    }
}

pub fn parse_ticker_price(ticker: &Ticker, body: &str) -> Result<Decimal, PriceUnavailable> {
    let price: TickerPrice = serde_json::de::from_str(body).map_err(|e| {
        PriceUnavailable::new(ticker, UnavailableReason::InvalidPrice, e.to_string())
    })?;
    if price.price <= Decimal::ZERO {
        return Err(PriceUnavailable::new(
            ticker,
            UnavailableReason::InvalidPrice,
            format!("non positive price {}", price.price),
        ));
    }
    Ok(price.price)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_ticker_price_from_json() {
        let ticker = Ticker::try_from("BTC").unwrap();
        let res = parse_ticker_price(&ticker, r#"{"symbol":"BTCUSDT","price":"67012.34000000"}"#);
        assert_eq!(res, Ok(dec!(67012.34)));
    }

    #[test]
    fn test_ticker_price_invalid() {
        let ticker = Ticker::try_from("BTC").unwrap();

        let res = parse_ticker_price(&ticker, r#"{"symbol":"BTCUSDT","price":"0.00000000"}"#);
        assert!(matches!(
            res,
            Err(PriceUnavailable {
                reason: UnavailableReason::InvalidPrice,
                ..
            })
        ));

        let res = parse_ticker_price(&ticker, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_symbol_and_url() {
        let provider = ExchangePriceProvider::new("http://localhost:8080/", "usdt").unwrap();
        let ticker = Ticker::try_from("eth").unwrap();

        assert_eq!(provider.symbol(&ticker), "ETHUSDT");
        assert_eq!(
            provider.url(&ticker).unwrap().as_str(),
            "http://localhost:8080/api/v3/ticker/price?symbol=ETHUSDT"
        );
    }
}
