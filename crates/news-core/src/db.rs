use crate::error::{AppError, Result};
use crate::models::{AnalysisVerdict, Article, ArticleListing, FakeCheck, NewArticle, Sentiment};
use crate::stats::ScoreInputs;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// One SQLite connection; handlers open their own per invocation.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS news_articles (
                id TEXT PRIMARY KEY,
                country_code TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL,
                source_type TEXT NOT NULL,
                url TEXT NOT NULL,
                url_key TEXT,
                published_at TEXT NOT NULL,
                is_fake INTEGER,
                fake_check_reason TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_news_articles_country_pub
                ON news_articles(country_code, published_at DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_news_articles_url_key
                ON news_articles(url_key);

            CREATE TABLE IF NOT EXISTS news_analysis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id TEXT NOT NULL UNIQUE,
                sentiment TEXT,
                bias_score REAL,
                credibility_score REAL,
                manipulation_detected INTEGER,
                summary TEXT,
                keywords TEXT NOT NULL DEFAULT '[]',
                analyzed_at TEXT NOT NULL,
                FOREIGN KEY (article_id) REFERENCES news_articles(id) ON DELETE CASCADE
            );",
        )?;

        debug!(path, "SQLite database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| AppError::DbError(e.to_string()))
    }

    // --- Transactions ---

    pub fn begin(&self) -> Result<()> {
        self.conn()?.execute_batch("BEGIN")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    // --- Articles ---

    /// Insert an article and return its new id. With a `url_key`, an article
    /// whose key is already stored is skipped and `None` is returned.
    pub fn insert_article(
        &self,
        article: &NewArticle,
        fake_check: Option<&FakeCheck>,
        url_key: Option<&str>,
    ) -> Result<Option<String>> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let inserted = conn.execute(
            "INSERT INTO news_articles
                (id, country_code, title, content, source, source_type, url, url_key,
                 published_at, is_fake, fake_check_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(url_key) DO NOTHING",
            params![
                id,
                article.country_code,
                article.title,
                article.content,
                article.source,
                article.source_type,
                article.url,
                url_key,
                article.published_at.to_rfc3339(),
                fake_check.map(|f| f.is_fake),
                fake_check.map(|f| f.reason.as_str()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok((inserted > 0).then_some(id))
    }

    pub fn url_key_exists(&self, url_key: &str) -> Result<bool> {
        let exists = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM news_articles WHERE url_key = ?1)",
            params![url_key],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn update_fake_check(&self, article_id: &str, verdict: &FakeCheck) -> Result<()> {
        self.conn()?.execute(
            "UPDATE news_articles SET is_fake = ?1, fake_check_reason = ?2 WHERE id = ?3",
            params![verdict.is_fake, verdict.reason, article_id],
        )?;
        Ok(())
    }

    pub fn get_article(&self, article_id: &str) -> Result<Option<Article>> {
        let conn = self.conn()?;
        let article = conn
            .query_row(
                "SELECT id, country_code, title, content, source, source_type, url,
                        published_at, is_fake, fake_check_reason
                 FROM news_articles WHERE id = ?1",
                params![article_id],
                row_to_article,
            )
            .optional()?;
        Ok(article)
    }

    /// Articles of a country that have no analysis row yet.
    pub fn pending_articles(&self, country_code: &str, limit: i64) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT n.id, n.country_code, n.title, n.content, n.source, n.source_type, n.url,
                    n.published_at, n.is_fake, n.fake_check_reason
             FROM news_articles n
             LEFT JOIN news_analysis a ON a.article_id = n.id
             WHERE n.country_code = ?1 AND a.id IS NULL
             ORDER BY n.published_at DESC
             LIMIT ?2",
        )?;
        let articles = stmt
            .query_map(params![country_code, limit], row_to_article)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(articles)
    }

    /// Newest articles of a country joined with their analysis.
    pub fn list_articles(&self, country_code: &str, limit: i64) -> Result<Vec<ArticleListing>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT n.id, n.title, n.content, n.source, n.source_type, n.url,
                    n.published_at, n.is_fake, n.fake_check_reason,
                    a.sentiment, a.bias_score, a.credibility_score,
                    a.manipulation_detected, a.summary
             FROM news_articles n
             LEFT JOIN news_analysis a ON a.article_id = n.id
             WHERE n.country_code = ?1
             ORDER BY n.published_at DESC, n.created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![country_code, limit], |row| {
                let sentiment: Option<String> = row.get(9)?;
                Ok(ArticleListing {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    source: row.get(3)?,
                    source_type: row.get(4)?,
                    url: row.get(5)?,
                    published_at: parse_timestamp(&row.get::<_, String>(6)?),
                    is_fake: row.get(7)?,
                    fake_check_reason: row.get(8)?,
                    sentiment: sentiment.as_deref().and_then(Sentiment::from_str),
                    bias_score: row.get(10)?,
                    credibility_score: row.get(11)?,
                    manipulation_detected: row.get(12)?,
                    summary: row.get(13)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // --- Analyses ---

    /// Insert the analysis, or overwrite every field of the existing one.
    pub fn upsert_analysis(&self, article_id: &str, analysis: &AnalysisVerdict) -> Result<()> {
        self.write_analysis(
            article_id,
            analysis,
            "ON CONFLICT(article_id) DO UPDATE SET
                sentiment = excluded.sentiment,
                bias_score = excluded.bias_score,
                credibility_score = excluded.credibility_score,
                manipulation_detected = excluded.manipulation_detected,
                summary = excluded.summary,
                keywords = excluded.keywords,
                analyzed_at = excluded.analyzed_at",
        )
    }

    /// Plain insert; fails if the article already has an analysis.
    pub fn insert_analysis(&self, article_id: &str, analysis: &AnalysisVerdict) -> Result<()> {
        self.write_analysis(article_id, analysis, "")
    }

    fn write_analysis(
        &self,
        article_id: &str,
        analysis: &AnalysisVerdict,
        conflict_clause: &str,
    ) -> Result<()> {
        let keywords = serde_json::to_string(&analysis.keywords)?;
        let sql = format!(
            "INSERT INTO news_analysis
                (article_id, sentiment, bias_score, credibility_score,
                 manipulation_detected, summary, keywords, analyzed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             {conflict_clause}"
        );
        self.conn()?.execute(
            &sql,
            params![
                article_id,
                analysis.sentiment.map(|s| s.as_str()),
                analysis.bias_score,
                analysis.credibility_score,
                analysis.manipulation_detected,
                analysis.summary,
                keywords,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!(article_id, "Analysis stored");
        Ok(())
    }

    pub fn get_analysis(&self, article_id: &str) -> Result<Option<AnalysisVerdict>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT sentiment, bias_score, credibility_score, manipulation_detected,
                        summary, keywords
                 FROM news_analysis WHERE article_id = ?1",
                params![article_id],
                |row| {
                    let sentiment: Option<String> = row.get(0)?;
                    let keywords: String = row.get(5)?;
                    Ok(AnalysisVerdict {
                        sentiment: sentiment.as_deref().and_then(Sentiment::from_str),
                        bias_score: row.get(1)?,
                        credibility_score: row.get(2)?,
                        manipulation_detected: row.get(3)?,
                        summary: row.get(4)?,
                        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count_analyses(&self, article_id: &str) -> Result<i64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM news_analysis WHERE article_id = ?1",
            params![article_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_articles(&self, country_code: &str) -> Result<i64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM news_articles WHERE country_code = ?1",
            params![country_code],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- Aggregates ---

    /// Per-country totals and averages over all articles and their analyses.
    pub fn score_inputs(&self, country_code: &str) -> Result<ScoreInputs> {
        let conn = self.conn()?;
        let inputs = conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(CASE WHEN n.is_fake = 1 THEN 1 END),
                COUNT(CASE WHEN a.manipulation_detected = 1 THEN 1 END),
                AVG(a.bias_score),
                AVG(a.credibility_score),
                COUNT(CASE WHEN a.sentiment = 'positive' THEN 1 END),
                COUNT(CASE WHEN a.sentiment = 'negative' THEN 1 END),
                COUNT(CASE WHEN a.sentiment = 'neutral' THEN 1 END)
             FROM news_articles n
             LEFT JOIN news_analysis a ON a.article_id = n.id
             WHERE n.country_code = ?1",
            params![country_code],
            |row| {
                Ok(ScoreInputs {
                    total: row.get(0)?,
                    fake: row.get(1)?,
                    manipulation: row.get(2)?,
                    avg_bias: row.get(3)?,
                    avg_credibility: row.get(4)?,
                    positive: row.get(5)?,
                    negative: row.get(6)?,
                    neutral: row.get(7)?,
                })
            },
        )?;
        Ok(inputs)
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse().unwrap_or_default()
}

fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<Article> {
    let published: String = row.get(7)?;
    Ok(Article {
        id: row.get(0)?,
        country_code: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        source: row.get(4)?,
        source_type: row.get(5)?,
        url: row.get(6)?,
        published_at: parse_timestamp(&published),
        is_fake: row.get(8)?,
        fake_check_reason: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TITLE_MAX_CHARS;
    use chrono::Duration;

    fn temp_db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.db");
        let db = Db::open(path.to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn sample(country: &str, title: &str, published_at: DateTime<Utc>) -> NewArticle {
        NewArticle::truncated(
            country,
            title,
            "Body text",
            "Example Source",
            "independent",
            "https://example.org/a",
            published_at,
        )
    }

    fn verdict(bias: f64, credibility: f64, sentiment: Sentiment) -> AnalysisVerdict {
        AnalysisVerdict {
            sentiment: Some(sentiment),
            bias_score: Some(bias),
            credibility_score: Some(credibility),
            manipulation_detected: Some(false),
            summary: Some("summary".into()),
            keywords: vec!["one".into(), "two".into()],
        }
    }

    #[test]
    fn long_title_is_stored_at_limit() {
        let (_dir, db) = temp_db();
        let title = "t".repeat(600);
        let id = db
            .insert_article(&sample("RU", &title, Utc::now()), None, None)
            .unwrap()
            .unwrap();
        let stored = db.get_article(&id).unwrap().unwrap();
        assert_eq!(stored.title.chars().count(), TITLE_MAX_CHARS);
        assert_eq!(stored.is_fake, None);
        assert_eq!(stored.fake_check_reason, None);
    }

    #[test]
    fn upsert_keeps_one_row_with_latest_values() {
        let (_dir, db) = temp_db();
        let id = db
            .insert_article(&sample("RU", "Title", Utc::now()), None, None)
            .unwrap()
            .unwrap();

        db.upsert_analysis(&id, &verdict(10.0, 90.0, Sentiment::Positive)).unwrap();
        db.upsert_analysis(&id, &verdict(60.0, 40.0, Sentiment::Negative)).unwrap();

        assert_eq!(db.count_analyses(&id).unwrap(), 1);
        let stored = db.get_analysis(&id).unwrap().unwrap();
        assert_eq!(stored.sentiment, Some(Sentiment::Negative));
        assert_eq!(stored.bias_score, Some(60.0));
        assert_eq!(stored.credibility_score, Some(40.0));
        assert_eq!(stored.keywords, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn plain_insert_rejects_second_analysis() {
        let (_dir, db) = temp_db();
        let id = db
            .insert_article(&sample("RU", "Title", Utc::now()), None, None)
            .unwrap()
            .unwrap();
        db.insert_analysis(&id, &verdict(10.0, 90.0, Sentiment::Neutral)).unwrap();
        assert!(db.insert_analysis(&id, &verdict(10.0, 90.0, Sentiment::Neutral)).is_err());
    }

    #[test]
    fn analysis_requires_existing_article() {
        let (_dir, db) = temp_db();
        let result = db.upsert_analysis("missing", &verdict(1.0, 1.0, Sentiment::Neutral));
        assert!(matches!(result, Err(AppError::DbError(_))));
    }

    #[test]
    fn url_key_skips_duplicates_but_null_keys_do_not_collide() {
        let (_dir, db) = temp_db();
        let article = sample("US", "Same story", Utc::now());

        assert!(db.insert_article(&article, None, Some("k1")).unwrap().is_some());
        assert!(db.insert_article(&article, None, Some("k1")).unwrap().is_none());
        assert!(db.insert_article(&article, None, None).unwrap().is_some());
        assert!(db.insert_article(&article, None, None).unwrap().is_some());
        assert_eq!(db.count_articles("US").unwrap(), 3);
    }

    #[test]
    fn pending_excludes_analyzed_and_other_countries() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let done = db.insert_article(&sample("RU", "done", now), None, None).unwrap().unwrap();
        let open = db.insert_article(&sample("RU", "open", now), None, None).unwrap().unwrap();
        db.insert_article(&sample("DE", "elsewhere", now), None, None).unwrap();
        db.upsert_analysis(&done, &verdict(1.0, 1.0, Sentiment::Neutral)).unwrap();

        let pending = db.pending_articles("RU", 50).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, open);
    }

    #[test]
    fn listing_is_newest_first_with_analysis_joined() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let old = db
            .insert_article(&sample("RU", "old", now - Duration::hours(2)), None, None)
            .unwrap()
            .unwrap();
        db.insert_article(&sample("RU", "new", now), None, None).unwrap();
        db.upsert_analysis(&old, &verdict(30.0, 70.0, Sentiment::Negative)).unwrap();

        let listing = db.list_articles("RU", 10).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].title, "new");
        assert_eq!(listing[0].sentiment, None);
        assert_eq!(listing[1].title, "old");
        assert_eq!(listing[1].sentiment, Some(Sentiment::Negative));
        assert_eq!(listing[1].bias_score, Some(30.0));

        assert_eq!(db.list_articles("RU", 1).unwrap().len(), 1);
    }

    #[test]
    fn fake_check_update_and_score_inputs() {
        let (_dir, db) = temp_db();
        let now = Utc::now();
        let a = db.insert_article(&sample("FR", "a", now), None, None).unwrap().unwrap();
        let b = db.insert_article(&sample("FR", "b", now), None, None).unwrap().unwrap();
        db.insert_article(&sample("FR", "c", now), None, None).unwrap();

        db.update_fake_check(&a, &FakeCheck { is_fake: true, reason: "fabricated quote".into() })
            .unwrap();
        db.upsert_analysis(&a, &verdict(20.0, 60.0, Sentiment::Negative)).unwrap();
        let mut manipulated = verdict(40.0, 80.0, Sentiment::Neutral);
        manipulated.manipulation_detected = Some(true);
        db.upsert_analysis(&b, &manipulated).unwrap();

        let stored = db.get_article(&a).unwrap().unwrap();
        assert_eq!(stored.is_fake, Some(true));
        assert_eq!(stored.fake_check_reason.as_deref(), Some("fabricated quote"));

        let inputs = db.score_inputs("FR").unwrap();
        assert_eq!(inputs.total, 3);
        assert_eq!(inputs.fake, 1);
        assert_eq!(inputs.manipulation, 1);
        assert_eq!(inputs.avg_bias, Some(30.0));
        assert_eq!(inputs.avg_credibility, Some(70.0));
        assert_eq!((inputs.positive, inputs.negative, inputs.neutral), (0, 1, 1));

        let empty = db.score_inputs("JP").unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.avg_bias, None);
    }

    #[test]
    fn uncommitted_batch_is_lost_when_connection_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.db");
        let path = path.to_str().unwrap();

        let db = Db::open(path).unwrap();
        db.begin().unwrap();
        db.insert_article(&sample("RU", "lost", Utc::now()), None, None).unwrap();
        drop(db);

        let db = Db::open(path).unwrap();
        assert_eq!(db.count_articles("RU").unwrap(), 0);

        db.begin().unwrap();
        db.insert_article(&sample("RU", "kept", Utc::now()), None, None).unwrap();
        db.commit().unwrap();
        drop(db);

        assert_eq!(Db::open(path).unwrap().count_articles("RU").unwrap(), 1);
    }
}
