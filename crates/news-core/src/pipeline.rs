//! Ingestion and enrichment: fake-check, full analysis, and the two batch loops
//! that drive them (re-analysis of pending rows, fresh collection).

use crate::ai::{AiClient, ChatPrompt};
use crate::config::{CommitMode, CountryMap, DedupPolicy, PipelineOptions};
use crate::db::Db;
use crate::dedup::url_key;
use crate::error::{AppError, Result};
use crate::models::{truncate_chars, AnalysisVerdict, Article, FakeCheck, NewArticle};
use crate::newsapi::NewsApiClient;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Cap on pending articles re-analyzed per call.
pub const PENDING_BATCH_LIMIT: i64 = 50;
/// Headlines requested per fresh collection.
pub const COLLECT_PAGE_SIZE: u32 = 10;
pub const SOURCE_TYPE_INDEPENDENT: &str = "independent";

const FAKE_CHECK_MAX_CHARS: usize = 500;
const ANALYSIS_MAX_CHARS: usize = 800;

const FAKE_CHECK_SYSTEM: &str = "You are a professional fact-checker.";
const ANALYSIS_SYSTEM: &str =
    "You analyse news coverage for political bias, credibility and manipulation.";

#[derive(Debug, Deserialize)]
struct FakeCheckReply {
    #[serde(default)]
    is_fake: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

/// `"{title}. {content}"` cut to `max_chars` characters.
pub fn prompt_text(title: &str, content: Option<&str>, max_chars: usize) -> String {
    truncate_chars(&format!("{}. {}", title, content.unwrap_or("")), max_chars)
}

/// Ask the model whether an article is fabricated.
///
/// `None` means indeterminate: no client, no title, or the call failed.
pub async fn fake_check(
    ai: Option<&AiClient>,
    title: &str,
    content: Option<&str>,
) -> Option<FakeCheck> {
    let ai = ai?;
    if title.trim().is_empty() {
        return None;
    }

    let text = prompt_text(title, content, FAKE_CHECK_MAX_CHARS);
    let user = format!(
        "Check whether this news item is fake:\n\n{text}\n\n\
         Answer with a JSON object only:\n\
         {{\"is_fake\": true/false, \"reason\": \"short explanation\"}}"
    );
    let prompt = ChatPrompt {
        system: FAKE_CHECK_SYSTEM,
        user: &user,
        temperature: 0.2,
        max_tokens: 150,
    };

    match ai.complete_json::<FakeCheckReply>(&prompt).await {
        Ok(reply) => Some(FakeCheck {
            is_fake: reply.is_fake.unwrap_or(false),
            reason: reply.reason.unwrap_or_default(),
        }),
        Err(e) => {
            warn!(error = %e, "Fake check failed");
            None
        }
    }
}

/// Full bias / credibility / sentiment analysis. Errors propagate.
pub async fn analyze(ai: &AiClient, title: &str, content: Option<&str>) -> Result<AnalysisVerdict> {
    let text = prompt_text(title, content, ANALYSIS_MAX_CHARS);
    let user = format!(
        "Analyse this news item:\n\n{text}\n\n\
         Answer with a JSON object only:\n\
         {{\"sentiment\": \"positive/negative/neutral\", \"bias_score\": 0-100, \
         \"credibility_score\": 0-100, \"manipulation_detected\": true/false, \
         \"summary\": \"one or two sentences\", \"keywords\": [\"word1\", \"word2\"]}}"
    );
    let prompt = ChatPrompt {
        system: ANALYSIS_SYSTEM,
        user: &user,
        temperature: 0.3,
        max_tokens: 250,
    };
    ai.complete_json(&prompt).await
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub analyzed: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionOutcome {
    pub fetched: u32,
    pub stored: u32,
    pub analyzed: u32,
    pub failed: u32,
    pub skipped_duplicates: u32,
}

/// Wraps the batch loop in transactions according to the commit mode.
struct Commits<'a> {
    db: &'a Db,
    mode: CommitMode,
}

impl<'a> Commits<'a> {
    fn open_batch(db: &'a Db, mode: CommitMode) -> Result<Self> {
        if mode == CommitMode::PerBatch {
            db.begin()?;
        }
        Ok(Self { db, mode })
    }

    fn start_item(&self) -> Result<()> {
        if self.mode == CommitMode::PerArticle {
            self.db.begin()?;
        }
        Ok(())
    }

    fn finish_item(&self) -> Result<()> {
        if self.mode == CommitMode::PerArticle {
            self.db.commit()?;
        }
        Ok(())
    }

    fn finish_batch(&self) -> Result<()> {
        if self.mode == CommitMode::PerBatch {
            self.db.commit()?;
        }
        Ok(())
    }

    fn abandon(&self) {
        if let Err(e) = self.db.rollback() {
            warn!(error = %e, "Rollback after batch failure failed");
        }
    }
}

/// Re-analyze up to [`PENDING_BATCH_LIMIT`] articles of a country that have no
/// analysis yet. Batch-level failures are logged and reported as zero.
pub async fn analyze_pending(
    db: &Db,
    ai: &AiClient,
    country_code: &str,
    options: &PipelineOptions,
) -> BatchOutcome {
    match run_pending(db, ai, country_code, options).await {
        Ok(outcome) => {
            info!(
                country = %country_code,
                analyzed = outcome.analyzed,
                failed = outcome.failed,
                "Pending analysis complete"
            );
            outcome
        }
        Err(e) => {
            error!(country = %country_code, error = %e, "Pending analysis aborted");
            BatchOutcome::default()
        }
    }
}

async fn run_pending(
    db: &Db,
    ai: &AiClient,
    country_code: &str,
    options: &PipelineOptions,
) -> Result<BatchOutcome> {
    let articles = db.pending_articles(country_code, PENDING_BATCH_LIMIT)?;
    info!(country = %country_code, count = articles.len(), "Found articles to analyze");

    let commits = Commits::open_batch(db, options.commit_mode)?;
    let mut outcome = BatchOutcome::default();

    for article in &articles {
        let step = async {
            commits.start_item()?;
            let result = reanalyze_article(db, ai, article).await;
            commits.finish_item()?;
            Ok::<_, AppError>(result)
        };
        match step.await {
            Ok(Ok(())) => outcome.analyzed += 1,
            Ok(Err(e)) => {
                warn!(article_id = %article.id, error = %e, "Article analysis failed");
                outcome.failed += 1;
            }
            Err(e) => {
                commits.abandon();
                return Err(e);
            }
        }
    }

    if let Err(e) = commits.finish_batch() {
        commits.abandon();
        return Err(e);
    }
    Ok(outcome)
}

async fn reanalyze_article(db: &Db, ai: &AiClient, article: &Article) -> Result<()> {
    if let Some(verdict) = fake_check(Some(ai), &article.title, Some(&article.content)).await {
        db.update_fake_check(&article.id, &verdict)?;
    }
    let analysis = analyze(ai, &article.title, Some(&article.content)).await?;
    db.upsert_analysis(&article.id, &analysis)
}

/// Fetch fresh headlines for a country, fake-check and analyze each, and store
/// them. Without an AI client articles are stored unanalyzed.
pub async fn collect_fresh(
    db: &Db,
    news: &NewsApiClient,
    ai: Option<&AiClient>,
    countries: &CountryMap,
    country_code: &str,
    options: &PipelineOptions,
) -> CollectionOutcome {
    match run_collection(db, news, ai, countries, country_code, options).await {
        Ok(outcome) => {
            info!(
                country = %country_code,
                fetched = outcome.fetched,
                stored = outcome.stored,
                analyzed = outcome.analyzed,
                failed = outcome.failed,
                skipped = outcome.skipped_duplicates,
                "News collection complete"
            );
            outcome
        }
        Err(e) => {
            error!(country = %country_code, error = %e, "News collection aborted");
            CollectionOutcome::default()
        }
    }
}

async fn run_collection(
    db: &Db,
    news: &NewsApiClient,
    ai: Option<&AiClient>,
    countries: &CountryMap,
    country_code: &str,
    options: &PipelineOptions,
) -> Result<CollectionOutcome> {
    let api_country = countries.news_api_country(country_code);
    let headlines = news.top_headlines(api_country, COLLECT_PAGE_SIZE).await?;

    let mut outcome = CollectionOutcome {
        fetched: headlines.len() as u32,
        ..CollectionOutcome::default()
    };
    let commits = Commits::open_batch(db, options.commit_mode)?;
    let now = Utc::now();

    for headline in &headlines {
        let article = NewArticle::truncated(
            country_code,
            headline.title.as_deref().unwrap_or(""),
            headline.description.as_deref().unwrap_or(""),
            headline.source_name(),
            SOURCE_TYPE_INDEPENDENT,
            headline.url.as_deref().unwrap_or(""),
            headline.published(now),
        );

        let step = async {
            commits.start_item()?;
            let result = store_article(db, ai, &article, options.dedup_policy).await;
            commits.finish_item()?;
            Ok::<_, AppError>(result)
        };
        match step.await {
            Ok(Ok(Stored::Duplicate)) => outcome.skipped_duplicates += 1,
            Ok(Ok(Stored::Unanalyzed)) => outcome.stored += 1,
            Ok(Ok(Stored::Analyzed)) => {
                outcome.stored += 1;
                outcome.analyzed += 1;
            }
            Ok(Ok(Stored::AnalysisFailed)) => {
                outcome.stored += 1;
                outcome.failed += 1;
            }
            Ok(Err(e)) => {
                warn!(url = %article.url, error = %e, "Failed to store article");
                outcome.failed += 1;
            }
            Err(e) => {
                commits.abandon();
                return Err(e);
            }
        }
    }

    if let Err(e) = commits.finish_batch() {
        commits.abandon();
        return Err(e);
    }
    Ok(outcome)
}

enum Stored {
    Duplicate,
    Unanalyzed,
    Analyzed,
    AnalysisFailed,
}

async fn store_article(
    db: &Db,
    ai: Option<&AiClient>,
    article: &NewArticle,
    dedup: DedupPolicy,
) -> Result<Stored> {
    let key = match dedup {
        DedupPolicy::ByUrl if !article.url.is_empty() => Some(url_key(&article.url)),
        _ => None,
    };
    if let Some(ref key) = key {
        if db.url_key_exists(key)? {
            return Ok(Stored::Duplicate);
        }
    }

    let verdict = fake_check(ai, &article.title, Some(&article.content)).await;
    let Some(article_id) = db.insert_article(article, verdict.as_ref(), key.as_deref())? else {
        return Ok(Stored::Duplicate);
    };

    let Some(ai) = ai else {
        return Ok(Stored::Unanalyzed);
    };
    let analysis = analyze(ai, &article.title, Some(&article.content))
        .await
        .and_then(|analysis| db.insert_analysis(&article_id, &analysis));
    match analysis {
        Ok(()) => Ok(Stored::Analyzed),
        Err(e) => {
            warn!(article_id = %article_id, error = %e, "Analysis of collected article failed");
            Ok(Stored::AnalysisFailed)
        }
    }
}
