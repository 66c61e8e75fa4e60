use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use news_core::ai::{AiClient, ChatPrompt};
use news_core::config::Config;
use news_core::db::Db;
use news_core::models::{truncate_chars, ArticleListing};
use news_core::newsapi::NewsApiClient;
use news_core::pipeline::{self, BatchOutcome};
use news_core::stats::CountryStatistics;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_COUNTRY: &str = "RU";
const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Each request gets its own connection; no database means empty results.
    fn open_db(&self) -> Option<Db> {
        let path = self.config.database_path.as_deref()?;
        match Db::open(path) {
            Ok(db) => Some(db),
            Err(e) => {
                error!(error = %e, "Failed to open database");
                None
            }
        }
    }

    fn groq(&self) -> Option<AiClient> {
        let provider = self.config.groq.clone()?;
        Some(AiClient::new(self.http.clone(), provider))
    }

    fn openai(&self) -> Option<AiClient> {
        let provider = self.config.openai.clone()?;
        Some(AiClient::new(self.http.clone(), provider))
    }

    fn news_api(&self) -> Option<NewsApiClient> {
        let key = self.config.news_api_key.clone()?;
        Some(NewsApiClient::new(
            self.http.clone(),
            self.config.news_api_url.clone(),
            key,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/collector",
            get(list_news)
                .post(collect_news)
                .options(|| async { preflight("GET, POST, OPTIONS") })
                .fallback(method_not_allowed),
        )
        .route("/analyze", any(analyze))
        .route("/news-analysis", any(news_analysis))
        .route("/health", get(health))
        .with_state(state)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Json(body),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_response(status, json!({ "error": message.into() }))
}

fn preflight(methods: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, methods),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
        Body::empty(),
    )
        .into_response()
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

fn country_param(params: &HashMap<String, String>) -> String {
    params
        .get("country")
        .filter(|c| !c.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string())
}

fn limit_param(params: &HashMap<String, String>) -> Result<i64, std::num::ParseIntError> {
    let limit = match params.get("limit") {
        Some(raw) => raw.trim().parse::<i64>()?,
        None => DEFAULT_LIMIT,
    };
    Ok(limit.clamp(1, MAX_LIMIT))
}

#[derive(Serialize)]
struct ListingResponse {
    news: Vec<ArticleListing>,
    count: usize,
    country: String,
}

fn listing_response(db: Option<&Db>, country: String, limit: i64) -> Response {
    let news = match db.map(|db| db.list_articles(&country, limit)) {
        Some(Ok(news)) => news,
        Some(Err(e)) => {
            warn!(country = %country, error = %e, "Failed to list articles");
            Vec::new()
        }
        None => Vec::new(),
    };
    json_response(
        StatusCode::OK,
        ListingResponse {
            count: news.len(),
            news,
            country,
        },
    )
}

/// GET /collector?country=&limit=
pub async fn list_news(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let limit = match limit_param(&params) {
        Ok(limit) => limit,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let db = state.open_db();
    listing_response(db.as_ref(), country_param(&params), limit)
}

/// POST /collector?country=&limit=
///
/// Collects fresh headlines when a news API key is configured, then lists.
pub async fn collect_news(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let limit = match limit_param(&params) {
        Ok(limit) => limit,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let country = country_param(&params);
    let db = state.open_db();

    info!(
        country = %country,
        has_news_key = state.config.news_api_key.is_some(),
        has_groq_key = state.config.groq.is_some(),
        "Collector invoked"
    );

    if let (Some(news), Some(db)) = (state.news_api(), db.as_ref()) {
        let groq = state.groq();
        pipeline::collect_fresh(
            db,
            &news,
            groq.as_ref(),
            &state.config.countries,
            &country,
            &state.config.pipeline,
        )
        .await;
    }

    listing_response(db.as_ref(), country, limit)
}

/// /analyze?country= — POST re-analyzes pending articles and reports statistics.
pub async fn analyze(
    method: Method,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if method == Method::OPTIONS {
        return preflight("POST, OPTIONS");
    }
    let Some(ai) = state.groq() else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({
                "error": "GROQ_API_KEY not configured",
                "message": "Add GROQ_API_KEY to the project secrets"
            }),
        );
    };
    if method != Method::POST {
        return method_not_allowed().await;
    }

    let country = country_param(&params);
    let db = state.open_db();

    let outcome = match db.as_ref() {
        Some(db) => pipeline::analyze_pending(db, &ai, &country, &state.config.pipeline).await,
        None => BatchOutcome::default(),
    };

    let statistics = db
        .as_ref()
        .and_then(|db| match db.score_inputs(&country) {
            Ok(inputs) => Some(CountryStatistics::from(&inputs)),
            Err(e) => {
                warn!(country = %country, error = %e, "Statistics calculation failed");
                None
            }
        })
        .and_then(|stats| serde_json::to_value(stats).ok())
        .unwrap_or_else(|| json!({}));

    json_response(
        StatusCode::OK,
        json!({
            "analyzed": outcome.analyzed,
            "failed": outcome.failed,
            "statistics": statistics
        }),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsAnalysisRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

/// Verdict of the one-shot text analysis. `mock` marks a canned reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextVerdict {
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub bias: Option<f64>,
    #[serde(default)]
    pub credibility: Option<f64>,
    #[serde(default)]
    pub manipulation_detected: Option<bool>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mock: bool,
}

impl TextVerdict {
    fn canned(credibility: f64, summary: String, keywords: &[&str]) -> Self {
        Self {
            sentiment: Some("neutral".into()),
            bias: Some(50.0),
            credibility: Some(credibility),
            manipulation_detected: Some(false),
            summary: Some(summary),
            keywords: Some(keywords.iter().map(|k| k.to_string()).collect()),
            mock: true,
        }
    }
}

const TEXT_ANALYSIS_SYSTEM: &str = "You are an expert in political news analysis and media literacy.";

/// /news-analysis — POST `{text, sourceType?, countryCode?}`, analysed without storing.
pub async fn news_analysis(method: Method, State(state): State<AppState>, body: Bytes) -> Response {
    if method == Method::OPTIONS {
        return preflight("POST, OPTIONS");
    }
    if method != Method::POST {
        return method_not_allowed().await;
    }

    let request: NewsAnalysisRequest = if body.is_empty() {
        NewsAnalysisRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Server error: {e}"),
                )
            }
        }
    };

    let text = request.text.unwrap_or_default();
    if text.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "News text is required");
    }
    let source_type = request.source_type.unwrap_or_else(|| "unknown".into());
    let country = request.country_code.unwrap_or_else(|| DEFAULT_COUNTRY.into());

    let Some(ai) = state.openai() else {
        return json_response(
            StatusCode::OK,
            TextVerdict::canned(
                70.0,
                "Full analysis requires an OpenAI API key".into(),
                &["politics", "news"],
            ),
        );
    };

    let user = format!(
        "Analyse the following news item from {country} ({source_type} source):\n\n\"{text}\"\n\n\
         Reply with a JSON object:\n\
         1. sentiment: positive/negative/neutral\n\
         2. bias: 0-100 (political bias)\n\
         3. credibility: 0-100\n\
         4. manipulation_detected: true/false\n\
         5. summary: a short summary\n\
         6. keywords: array of keywords"
    );
    let prompt = ChatPrompt {
        system: TEXT_ANALYSIS_SYSTEM,
        user: &user,
        temperature: 0.3,
        max_tokens: 500,
    };

    match ai.complete_json::<TextVerdict>(&prompt).await {
        Ok(verdict) => json_response(StatusCode::OK, verdict),
        Err(e) => {
            warn!(error = %e, "Text analysis failed");
            let summary = format!("AI analysis error: {}", truncate_chars(&e.to_string(), 100));
            json_response(StatusCode::OK, TextVerdict::canned(65.0, summary, &["error"]))
        }
    }
}

/// GET /health
pub async fn health() -> Response {
    json_response(StatusCode::OK, json!({"status": "ok"}))
}
