use crate::error::{AppError, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Embedded country mapping (compiled into binary).
const COUNTRIES_TOML: &str = include_str!("../../../countries.toml");

pub const NEWS_API_URL: &str = "https://newsapi.org/v2/top-headlines";
pub const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const GROQ_MODEL: &str = "llama-3.1-70b-versatile";
pub const OPENAI_MODEL: &str = "gpt-4o-mini";

/// When the ingestion loop commits its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// One transaction around the whole batch; an interrupted batch keeps nothing.
    #[default]
    PerBatch,
    /// Every article's writes commit on their own.
    PerArticle,
}

impl CommitMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "batch" | "per_batch" => Some(Self::PerBatch),
            "article" | "per_article" => Some(Self::PerArticle),
            _ => None,
        }
    }
}

/// How fresh collection treats an article whose URL was already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// Insert every fetched article, duplicates included.
    #[default]
    None,
    /// Skip articles whose normalized URL is already stored.
    ByUrl,
}

impl DedupPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "url" | "by_url" => Some(Self::ByUrl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub commit_mode: CommitMode,
    pub dedup_policy: DedupPolicy,
}

/// An OpenAI-compatible chat-completion endpoint and its credential.
#[derive(Clone)]
pub struct AiProvider {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

impl std::fmt::Debug for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Maps the map UI's country codes to the news API `country` parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct CountryMap {
    pub default: String,
    #[serde(default)]
    pub countries: HashMap<String, String>,
}

impl CountryMap {
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| AppError::ConfigError(e.to_string()))
    }

    pub fn embedded() -> Result<Self> {
        Self::from_toml(COUNTRIES_TOML)
    }

    pub fn news_api_country(&self, country_code: &str) -> &str {
        self.countries
            .get(&country_code.to_uppercase())
            .unwrap_or(&self.default)
    }
}

/// Process-wide configuration, built once and handed to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: Option<String>,
    pub news_api_key: Option<String>,
    pub news_api_url: String,
    pub groq: Option<AiProvider>,
    pub openai: Option<AiProvider>,
    pub countries: CountryMap,
    pub pipeline: PipelineOptions,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = get("DATABASE_URL").map(|url| {
            url.strip_prefix("sqlite://")
                .map(str::to_string)
                .unwrap_or(url)
        });

        let groq = get("GROQ_API_KEY").map(|api_key| AiProvider {
            endpoint: get("GROQ_API_URL").unwrap_or_else(|| GROQ_CHAT_URL.into()),
            api_key,
            model: get("GROQ_MODEL").unwrap_or_else(|| GROQ_MODEL.into()),
        });
        let openai = get("OPENAI_API_KEY").map(|api_key| AiProvider {
            endpoint: get("OPENAI_API_URL").unwrap_or_else(|| OPENAI_CHAT_URL.into()),
            api_key,
            model: get("OPENAI_MODEL").unwrap_or_else(|| OPENAI_MODEL.into()),
        });

        let commit_mode = match get("COMMIT_MODE") {
            Some(v) => CommitMode::from_str(&v)
                .ok_or_else(|| AppError::ConfigError(format!("Unknown COMMIT_MODE: {v}")))?,
            None => CommitMode::default(),
        };
        let dedup_policy = match get("DEDUP_POLICY") {
            Some(v) => DedupPolicy::from_str(&v)
                .ok_or_else(|| AppError::ConfigError(format!("Unknown DEDUP_POLICY: {v}")))?,
            None => DedupPolicy::default(),
        };

        Ok(Self {
            database_path,
            news_api_key: get("NEWS_API_KEY"),
            news_api_url: get("NEWS_API_URL").unwrap_or_else(|| NEWS_API_URL.into()),
            groq,
            openai,
            countries: CountryMap::embedded()?,
            pipeline: PipelineOptions {
                commit_mode,
                dedup_policy,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn embedded_country_map_parses() {
        let map = CountryMap::embedded().unwrap();
        assert_eq!(map.news_api_country("RU"), "ru");
        assert_eq!(map.news_api_country("BY"), "ru");
        assert_eq!(map.news_api_country("jp"), "jp");
        assert_eq!(map.news_api_country("ZZ"), "us");
    }

    #[test]
    fn invalid_country_toml_returns_error() {
        assert!(CountryMap::from_toml("default = ").is_err());
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert!(config.database_path.is_none());
        assert!(config.news_api_key.is_none());
        assert!(config.groq.is_none());
        assert!(config.openai.is_none());
        assert_eq!(config.news_api_url, NEWS_API_URL);
        assert_eq!(config.pipeline.commit_mode, CommitMode::PerBatch);
        assert_eq!(config.pipeline.dedup_policy, DedupPolicy::None);
    }

    #[test]
    fn keys_and_overrides_are_read() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite:///tmp/news.db"),
            ("GROQ_API_KEY", "gsk-test"),
            ("GROQ_MODEL", "llama-3.3-70b"),
            ("OPENAI_API_KEY", "  "),
            ("COMMIT_MODE", "article"),
            ("DEDUP_POLICY", "url"),
        ]))
        .unwrap();

        assert_eq!(config.database_path.as_deref(), Some("/tmp/news.db"));
        let groq = config.groq.unwrap();
        assert_eq!(groq.api_key, "gsk-test");
        assert_eq!(groq.model, "llama-3.3-70b");
        assert_eq!(groq.endpoint, GROQ_CHAT_URL);
        assert!(config.openai.is_none(), "blank key counts as unset");
        assert_eq!(config.pipeline.commit_mode, CommitMode::PerArticle);
        assert_eq!(config.pipeline.dedup_policy, DedupPolicy::ByUrl);
    }

    #[test]
    fn unknown_commit_mode_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[("COMMIT_MODE", "sometimes")]));
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn provider_debug_hides_key() {
        let provider = AiProvider {
            endpoint: GROQ_CHAT_URL.into(),
            api_key: "secret-key".into(),
            model: GROQ_MODEL.into(),
        };
        assert!(!format!("{provider:?}").contains("secret-key"));
    }
}
