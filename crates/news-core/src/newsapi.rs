//! Top-headlines source (newsapi.org `/v2/top-headlines`).

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// Per-request timeout for the headlines call.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TopHeadlinesResponse {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Headline>,
}

/// One headline as returned by the API. Any field may be null.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headline {
    #[serde(default)]
    pub source: Option<HeadlineSource>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeadlineSource {
    #[serde(default)]
    pub name: Option<String>,
}

impl Headline {
    pub fn source_name(&self) -> &str {
        self.source
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or("Unknown")
    }

    /// Publication time, or `fallback` when absent or unparseable.
    pub fn published(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.published_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(fallback)
    }
}

#[derive(Clone)]
pub struct NewsApiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl NewsApiClient {
    pub fn new(http: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            http,
            endpoint,
            api_key,
        }
    }

    /// Fetch up to `page_size` top headlines for a news-API country code.
    pub async fn top_headlines(&self, api_country: &str, page_size: u32) -> Result<Vec<Headline>> {
        info!(country = %api_country, page_size, "Fetching top headlines");

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("country", api_country),
                ("apiKey", self.api_key.as_str()),
                ("pageSize", page_size.to_string().as_str()),
            ])
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        // Error payloads come with a non-2xx status but the same JSON envelope.
        let body: TopHeadlinesResponse = response.json().await?;
        if body.status != "ok" {
            return Err(AppError::NewsApiError {
                code: body.code.unwrap_or_else(|| "unknown".into()),
                message: body.message.unwrap_or_else(|| "Unknown error".into()),
            });
        }

        let mut articles = body.articles;
        articles.truncate(page_size as usize);
        Ok(articles)
    }
}
