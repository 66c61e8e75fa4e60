use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Field limits applied before an article is stored.
pub const TITLE_MAX_CHARS: usize = 500;
pub const CONTENT_MAX_CHARS: usize = 2000;
pub const SOURCE_MAX_CHARS: usize = 200;
pub const URL_MAX_CHARS: usize = 500;

/// Overall tone reported by the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// An article ready to be inserted; fields are already within their limits.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub country_code: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub source_type: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

impl NewArticle {
    /// Build an article, cutting every text field to its storage limit.
    pub fn truncated(
        country_code: &str,
        title: &str,
        content: &str,
        source: &str,
        source_type: &str,
        url: &str,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            country_code: country_code.to_string(),
            title: truncate_chars(title, TITLE_MAX_CHARS),
            content: truncate_chars(content, CONTENT_MAX_CHARS),
            source: truncate_chars(source, SOURCE_MAX_CHARS),
            source_type: source_type.to_string(),
            url: truncate_chars(url, URL_MAX_CHARS),
            published_at,
        }
    }
}

/// A stored article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub country_code: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub source_type: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub is_fake: Option<bool>,
    pub fake_check_reason: Option<String>,
}

/// Verdict of the fake-check step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCheck {
    pub is_fake: bool,
    pub reason: String,
}

/// Structured analysis as returned by the model. Every field is optional so a
/// partially filled reply still decodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisVerdict {
    #[serde(default, deserialize_with = "lenient_sentiment")]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub bias_score: Option<f64>,
    #[serde(default)]
    pub credibility_score: Option<f64>,
    #[serde(default)]
    pub manipulation_detected: Option<bool>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub keywords: Vec<String>,
}

/// One row of the `/collector` listing: an article joined with its analysis.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleListing {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub source_type: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub is_fake: Option<bool>,
    pub fake_check_reason: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub bias_score: Option<f64>,
    pub credibility_score: Option<f64>,
    pub manipulation_detected: Option<bool>,
    pub summary: Option<String>,
}

/// Unknown sentiment labels decode as `None` instead of failing the whole reply.
fn lenient_sentiment<'de, D>(deserializer: D) -> Result<Option<Sentiment>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Sentiment::from_str))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default())
}
