use std::sync::Arc;

use axum::extract::FromRef;

pub mod commands;
pub mod config;
pub mod controllers;
pub mod db;
pub mod delivery;
pub mod error;
pub mod lexers;
pub mod models;
pub mod ratelimit;
pub mod sizing;
pub mod slug;
pub mod types;

pub use error::{AppError, AppResult};

use config::Config;
use db::Database;
use lexers::{LexerCatalog, StaticCatalog};
use ratelimit::Ratelimiter;
use sizing::{MarkupEstimate, SizeEstimator};
use slug::{RandomSlugs, SlugSource};

/// Everything a request or command needs, built once at startup.
#[derive(Clone, FromRef)]
pub struct App {
    pub config: Config,
    pub database: Database,
    pub lexers: Arc<dyn LexerCatalog>,
    pub sizer: Arc<dyn SizeEstimator>,
    pub slugs: Arc<dyn SlugSource>,
    pub ratelimit: Ratelimiter,
}

impl App {
    /// Connect to the database, create the schema, and wire up the default
    /// capabilities.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let database = Database::connect(&config.database.url).await?;
        database.migrate().await?;
        Self::with_database(config, database)
    }

    pub fn with_database(config: Config, database: Database) -> anyhow::Result<Self> {
        let lexers = match &config.lexers {
            Some(names) => StaticCatalog::new(names.iter().cloned()),
            None => StaticCatalog::builtin(),
        };

        if !lexers.contains(&config.default_lexer) {
            anyhow::bail!(
                "default lexer '{}' is not an available lexer",
                config.default_lexer
            );
        }

        Ok(App {
            ratelimit: Ratelimiter::new(&config.ratelimit),
            lexers: Arc::new(lexers),
            sizer: Arc::new(MarkupEstimate),
            slugs: Arc::new(RandomSlugs),
            config,
            database,
        })
    }
}
