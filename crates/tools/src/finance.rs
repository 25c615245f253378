//! Stock market tools backed by Yahoo Finance.

use std::sync::Arc;

use async_trait::async_trait;
use mcp::{Arguments, ParamType, RegistryBuilder, ReturnType, ToolFailure, ToolHandler, ToolSpec};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Hands out the session cookie the crumb endpoint requires.
pub const YAHOO_COOKIE_URL: &str = "https://fc.yahoo.com";
pub const YAHOO_CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
pub const YAHOO_QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";
pub const YAHOO_SEARCH_URL: &str = "https://query2.finance.yahoo.com/v1/finance/search";

/// Number of articles returned by the news tools.
const NEWS_LIMIT: usize = 5;

/// Stand-in for a field the provider did not report.
const NOT_AVAILABLE: &str = "N/A";

const USER_AGENT: &str = concat!("toolwire/", env!("CARGO_PKG_VERSION"));

/// Raw field map for one instrument, keyed as the provider names them.
pub type QuoteFields = Map<String, Value>;

/// Source of quotes and news.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// All fields the provider reports for `ticker`.
    async fn quote(&self, ticker: &str) -> Result<QuoteFields, ProviderError>;

    /// Recent articles matching `query`, newest first.
    async fn news(&self, query: &str) -> Result<Vec<Map<String, Value>>, ProviderError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteEnvelope {
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    result: Vec<QuoteFields>,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    news: Vec<Map<String, Value>>,
}

/// Where [`YahooFinance`] sends its requests.
#[derive(Debug, Clone)]
pub struct YahooEndpoints {
    pub cookie_url: String,
    pub crumb_url: String,
    pub quote_url: String,
    pub search_url: String,
}

impl Default for YahooEndpoints {
    fn default() -> Self {
        Self {
            cookie_url: YAHOO_COOKIE_URL.to_string(),
            crumb_url: YAHOO_CRUMB_URL.to_string(),
            quote_url: YAHOO_QUOTE_URL.to_string(),
            search_url: YAHOO_SEARCH_URL.to_string(),
        }
    }
}

/// Yahoo Finance public JSON endpoints.
///
/// The quote endpoint only answers requests that carry a session cookie and
/// the matching `crumb` parameter. Both are fetched on the first quote and
/// reused until Yahoo rejects them.
#[derive(Debug)]
pub struct YahooFinance {
    client: reqwest::Client,
    endpoints: YahooEndpoints,
    crumb: Mutex<Option<String>>,
}

impl YahooFinance {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_endpoints(YahooEndpoints::default())
    }

    pub fn with_endpoints(endpoints: YahooEndpoints) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            endpoints,
            crumb: Mutex::new(None),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        debug!(%url, "Fetching market data");
        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await?;
        let response = ProviderError::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    /// The cached crumb, or a fresh cookie and crumb pair.
    async fn crumb(&self) -> Result<String, ProviderError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        // Only the Set-Cookie header matters; the status is usually 404.
        debug!(url = %self.endpoints.cookie_url, "Fetching Yahoo session cookie");
        self.client.get(&self.endpoints.cookie_url).send().await?;

        let response = self.client.get(&self.endpoints.crumb_url).send().await?;
        let crumb = ProviderError::check(response).await?.text().await?;
        let crumb = crumb.trim();
        if crumb.is_empty() || crumb.contains(char::is_whitespace) {
            return Err(ProviderError::InvalidResponse(format!("bad crumb: {crumb:?}")));
        }
        debug!("Obtained Yahoo crumb");
        Ok(cached.insert(crumb.to_string()).clone())
    }

    async fn forget_crumb(&self) {
        self.crumb.lock().await.take();
    }
}

fn is_rejected(status: u16) -> bool {
    status == StatusCode::UNAUTHORIZED.as_u16() || status == StatusCode::FORBIDDEN.as_u16()
}

fn endpoint(base: &str, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
    Url::parse_with_params(base, params)
        .map_err(|e| ProviderError::Config(format!("invalid endpoint {base}: {e}")))
}

#[async_trait]
impl MarketData for YahooFinance {
    async fn quote(&self, ticker: &str) -> Result<QuoteFields, ProviderError> {
        let mut refreshed = false;
        let envelope: QuoteEnvelope = loop {
            let crumb = self.crumb().await?;
            let url = endpoint(
                &self.endpoints.quote_url,
                &[("symbols", ticker), ("crumb", &crumb)],
            )?;
            match self.get(url).await {
                Err(ProviderError::Api { status, .. }) if !refreshed && is_rejected(status) => {
                    warn!(status, "Yahoo rejected the crumb, refreshing");
                    self.forget_crumb().await;
                    refreshed = true;
                }
                result => break result?,
            }
        };
        envelope
            .quote_response
            .result
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("no quote for {ticker}")))
    }

    async fn news(&self, query: &str) -> Result<Vec<Map<String, Value>>, ProviderError> {
        let count = NEWS_LIMIT.to_string();
        let url = endpoint(
            &self.endpoints.search_url,
            &[("q", query), ("newsCount", &count), ("quotesCount", "0")],
        )?;
        let envelope: SearchEnvelope = self.get(url).await?;
        Ok(envelope.news)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool output shapes (field order is the order printed)
// ─────────────────────────────────────────────────────────────────────────────

fn field(fields: &Map<String, Value>, key: &str) -> Value {
    match fields.get(key) {
        Some(Value::Null) | None => Value::String(NOT_AVAILABLE.to_string()),
        Some(value) => value.clone(),
    }
}

#[derive(Debug, Serialize)]
struct Article {
    title: Value,
    publisher: Value,
    link: Value,
    #[serde(rename = "providerPublishTime")]
    provider_publish_time: Value,
}

impl Article {
    fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            title: field(fields, "title"),
            publisher: field(fields, "publisher"),
            link: field(fields, "link"),
            provider_publish_time: field(fields, "providerPublishTime"),
        }
    }
}

#[derive(Debug, Serialize)]
struct PriceQuote {
    ticker: String,
    price: Value,
}

#[derive(Debug, Serialize)]
struct Analysis {
    name: Value,
    price: Value,
    #[serde(rename = "trailingPE")]
    trailing_pe: Value,
    #[serde(rename = "EPS")]
    eps: Value,
    #[serde(rename = "marketCap")]
    market_cap: Value,
}

fn pretty<T: Serialize>(value: &T) -> Result<Value, ToolFailure> {
    Ok(Value::String(serde_json::to_string_pretty(value)?))
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Info,
    TickerNews,
    Quote,
    SearchNews,
    Analyze,
}

struct FinanceTool {
    market: Arc<dyn MarketData>,
    operation: Operation,
}

impl FinanceTool {
    async fn articles(&self, query: &str) -> Result<Value, ToolFailure> {
        let news = self.market.news(query).await?;
        let articles: Vec<Article> = news
            .iter()
            .take(NEWS_LIMIT)
            .map(Article::from_fields)
            .collect();
        pretty(&articles)
    }
}

#[async_trait]
impl ToolHandler for FinanceTool {
    async fn call(&self, args: Arguments) -> Result<Value, ToolFailure> {
        match self.operation {
            Operation::Info => {
                let ticker = args.string("ticker")?;
                let fields = self.market.quote(ticker).await?;
                Ok(Value::String(serde_json::to_string(&fields)?))
            }
            Operation::TickerNews => self.articles(args.string("ticker")?).await,
            Operation::SearchNews => {
                let keyword = args.string("keyword")?.to_uppercase();
                self.articles(&keyword).await
            }
            Operation::Quote => {
                let ticker = args.string("ticker")?;
                let fields = self.market.quote(ticker).await?;
                pretty(&PriceQuote {
                    ticker: ticker.to_uppercase(),
                    price: field(&fields, "regularMarketPrice"),
                })
            }
            Operation::Analyze => {
                let ticker = args.string("ticker")?;
                let fields = self.market.quote(ticker).await?;
                let name = match fields.get("longName") {
                    Some(Value::String(name)) => Value::String(name.clone()),
                    _ => Value::String(ticker.to_uppercase()),
                };
                pretty(&Analysis {
                    name,
                    price: field(&fields, "regularMarketPrice"),
                    trailing_pe: field(&fields, "trailingPE"),
                    eps: field(&fields, "epsTrailingTwelveMonths"),
                    market_cap: field(&fields, "marketCap"),
                })
            }
        }
    }
}

/// `get_ticker_info`, `get_ticker_news`, `search_quote`, `search_news`, `analyze_ticker`.
pub fn tools(market: Arc<dyn MarketData>) -> RegistryBuilder {
    let by_ticker = |name: &str, description: &str| {
        ToolSpec::new(name, description)
            .param("ticker", ParamType::String, "Stock ticker symbol, e.g. AAPL")
            .returns(ReturnType::String)
    };
    let tool = |operation| FinanceTool {
        market: Arc::clone(&market),
        operation,
    };

    mcp::ToolRegistry::builder()
        .tool(
            by_ticker("get_ticker_info", "Return every field reported for a ticker as JSON."),
            tool(Operation::Info),
        )
        .tool(
            by_ticker("get_ticker_news", "Return the top 5 news articles for a ticker."),
            tool(Operation::TickerNews),
        )
        .tool(
            by_ticker("search_quote", "Return the current stock price for a ticker."),
            tool(Operation::Quote),
        )
        .tool(
            ToolSpec::new("search_news", "Search news by keyword and return top articles.")
                .param("keyword", ParamType::String, "Ticker or keyword to search for")
                .returns(ReturnType::String),
            tool(Operation::SearchNews),
        )
        .tool(
            by_ticker(
                "analyze_ticker",
                "Summarize key financial metrics and analysis for a given ticker.",
            ),
            tool(Operation::Analyze),
        )
}
