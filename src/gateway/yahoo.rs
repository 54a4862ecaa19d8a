// src/gateway/yahoo.rs
use super::{MarketDataGateway, Quote};
use crate::db::postgres::models::daily_bar::DailyBar;
use crate::env_config::models::app_config::GatewayConfig;
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) stock-monitor";

/// Market data from the public Yahoo Finance quote and chart endpoints
pub struct YahooFinanceGateway {
    client: Client,
    base_url: String,
}

impl YahooFinanceGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_body(&self, ticker: &str, url: &str, query: &[(&str, String)]) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status, ticker, &body));
        }

        Ok(body)
    }

    async fn get_chart(&self, ticker: &str, query: &[(&str, String)]) -> Result<ChartResult, GatewayError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let body = self.get_body(ticker, &url, query).await?;
        parse_chart(ticker, &body)
    }

    async fn get_quote(&self, ticker: &str) -> Result<Quote, GatewayError> {
        let url = format!("{}/v7/finance/quote", self.base_url);
        let body = self
            .get_body(ticker, &url, &[("symbols", ticker.to_string())])
            .await?;
        parse_quote(ticker, &body)
    }
}

#[async_trait]
impl MarketDataGateway for YahooFinanceGateway {
    async fn fetch_latest(&self, ticker: &str) -> Result<Quote, GatewayError> {
        let quote = match self.get_quote(ticker).await {
            Ok(quote) => quote,
            // The quote endpoint may refuse anonymous clients; the chart still has the price
            Err(GatewayError::Permanent(detail)) => {
                warn!("Quote endpoint failed for {}, using chart price: {}", ticker, detail);
                let query = [
                    ("range", "1d".to_string()),
                    ("interval", "1d".to_string()),
                ];
                let chart = self.get_chart(ticker, &query).await?;
                quote_from_chart(ticker, &chart)?
            }
            Err(e) => return Err(e),
        };

        debug!("Fetched quote for {}: {} at {}", ticker, quote.price, quote.quote_time);
        Ok(quote)
    }

    async fn fetch_history(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, GatewayError> {
        // period2 is exclusive on the provider side
        let end = to.checked_add_days(Days::new(1)).unwrap_or(to);
        let query = [
            ("period1", day_start_epoch(from).to_string()),
            ("period2", day_start_epoch(end).to_string()),
            ("interval", "1d".to_string()),
            ("includeAdjustedClose", "true".to_string()),
        ];

        let chart = self.get_chart(ticker, &query).await?;
        let bars: Vec<DailyBar> = bars_from_chart(ticker, &chart)
            .into_iter()
            .filter(|bar| bar.date >= from && bar.date <= to)
            .collect();

        debug!("Fetched {} daily bars for {} ({}..={})", bars.len(), ticker, from, to);
        Ok(bars)
    }
}

fn day_start_epoch(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn classify_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_decode() || e.is_builder() {
        GatewayError::Permanent(e.to_string())
    } else {
        GatewayError::Transient(e.to_string())
    }
}

fn classify_status(status: StatusCode, ticker: &str, body: &str) -> GatewayError {
    let detail = format!("{} returned HTTP {}: {}", ticker, status.as_u16(), truncate(body, 200));

    if status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::RateLimited(detail)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        GatewayError::Transient(detail)
    } else {
        GatewayError::Permanent(detail)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Provider number parsed from its JSON text, never through a float
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(transparent)]
struct Price(#[serde(deserialize_with = "rust_decimal::serde::arbitrary_precision::deserialize")] Decimal);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteEnvelope {
    quote_response: QuoteBody,
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    result: Option<Vec<QuoteResult>>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResult {
    symbol: String,
    regular_market_price: Option<Price>,
    regular_market_time: Option<i64>,
    bid: Option<Price>,
    ask: Option<Price>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Option<ChartIndicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<Price>,
    regular_market_time: Option<i64>,
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
    #[serde(default)]
    adjclose: Vec<AdjCloseSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<Price>>,
    #[serde(default)]
    high: Vec<Option<Price>>,
    #[serde(default)]
    low: Vec<Option<Price>>,
    #[serde(default)]
    close: Vec<Option<Price>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseSeries {
    #[serde(default)]
    adjclose: Vec<Option<Price>>,
}

fn parse_chart(ticker: &str, body: &str) -> Result<ChartResult, GatewayError> {
    let envelope: ChartEnvelope = serde_json::from_str(body)
        .map_err(|e| GatewayError::Permanent(format!("{}: malformed chart response: {}", ticker, e)))?;

    if let Some(err) = envelope.chart.error {
        return Err(provider_error(ticker, err));
    }

    envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| GatewayError::Permanent(format!("{}: empty chart result", ticker)))
}

fn provider_error(ticker: &str, err: ProviderError) -> GatewayError {
    GatewayError::Permanent(format!(
        "{}: {} ({})",
        ticker,
        err.code,
        err.description.unwrap_or_default()
    ))
}

// Stored prices carry 6 decimal places
fn to_price(value: Option<Price>) -> Option<Decimal> {
    value.map(|Price(d)| d.round_dp(6))
}

fn quote_time_from(ts: Option<i64>) -> DateTime<Utc> {
    ts.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now)
}

fn parse_quote(ticker: &str, body: &str) -> Result<Quote, GatewayError> {
    let envelope: QuoteEnvelope = serde_json::from_str(body)
        .map_err(|e| GatewayError::Permanent(format!("{}: malformed quote response: {}", ticker, e)))?;

    if let Some(err) = envelope.quote_response.error {
        return Err(provider_error(ticker, err));
    }

    let result = envelope
        .quote_response
        .result
        .unwrap_or_default()
        .into_iter()
        .find(|q| q.symbol.eq_ignore_ascii_case(ticker))
        .ok_or_else(|| GatewayError::Permanent(format!("{}: no quote in response", ticker)))?;

    let price = to_price(result.regular_market_price)
        .ok_or_else(|| GatewayError::Permanent(format!("{}: no market price in response", ticker)))?;

    // An empty book is reported as zero
    let book_side = |side: Option<Price>| {
        to_price(side).filter(|p| p.is_sign_positive() && !p.is_zero())
    };

    Ok(Quote {
        price,
        bid: book_side(result.bid),
        ask: book_side(result.ask),
        quote_time: quote_time_from(result.regular_market_time),
    })
}

fn quote_from_chart(ticker: &str, chart: &ChartResult) -> Result<Quote, GatewayError> {
    let price = to_price(chart.meta.regular_market_price)
        .ok_or_else(|| GatewayError::Permanent(format!("{}: no market price in response", ticker)))?;

    // The chart carries no order book
    Ok(Quote {
        price,
        bid: None,
        ask: None,
        quote_time: quote_time_from(chart.meta.regular_market_time),
    })
}

fn at<T: Copy>(series: &[Option<T>], i: usize) -> Option<T> {
    series.get(i).copied().flatten()
}

fn bars_from_chart(ticker: &str, chart: &ChartResult) -> Vec<DailyBar> {
    let Some(indicators) = &chart.indicators else {
        return Vec::new();
    };
    let empty = QuoteSeries::default();
    let quote = indicators.quote.first().unwrap_or(&empty);
    let adjclose = indicators.adjclose.first().map(|a| a.adjclose.as_slice()).unwrap_or(&[]);

    let mut bars = Vec::with_capacity(chart.timestamp.len());
    for (i, ts) in chart.timestamp.iter().enumerate() {
        // Bars are dated in the exchange's local calendar
        let Some(date) = DateTime::<Utc>::from_timestamp(ts + chart.meta.gmtoffset, 0)
            .map(|dt| dt.date_naive())
        else {
            continue;
        };

        let Some(close) = to_price(at(&quote.close, i)) else {
            warn!("Skipping {} bar on {}: no close price", ticker, date);
            continue;
        };

        bars.push(DailyBar {
            ticker: ticker.to_string(),
            date,
            open: to_price(at(&quote.open, i)),
            high: to_price(at(&quote.high, i)),
            low: to_price(at(&quote.low, i)),
            close,
            adj_close: to_price(at(adjclose, i)).or(Some(close)),
            volume: at(&quote.volume, i).filter(|v| v.is_finite()).map(|v| v as i64),
        });
    }

    // A repeated timestamp for the current session keeps the last value
    bars.dedup_by(|later, earlier| {
        if later.date == earlier.date {
            *earlier = later.clone();
            true
        } else {
            false
        }
    });

    bars
}
