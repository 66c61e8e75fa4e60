pub mod ai;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod models;
pub mod newsapi;
pub mod pipeline;
pub mod stats;

pub use error::{AppError, Result};
pub use models::{AnalysisVerdict, Article, ArticleListing, FakeCheck, NewArticle, Sentiment};
