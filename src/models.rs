use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Paste {
    pub slug: String,
    pub expiry: String,
    pub exp_date: DateTime<Utc>,
    #[serde(skip)]
    pub removal: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

impl Paste {
    pub fn is_expired(&self, now: &DateTime<Utc>) -> bool {
        self.exp_date < *now
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct File {
    pub slug: String,
    #[serde(skip)]
    pub paste_slug: String,
    #[serde(skip)]
    pub position: i64,
    pub lexer: String,
    pub raw: String,
    pub filename: Option<String>,
}

/// A paste together with its files in submission order.
#[derive(Debug, Clone)]
pub struct PasteWithFiles {
    pub paste: Paste,
    pub files: Vec<File>,
}

/// A file as submitted, before it has an identifier.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub lexer: String,
    pub raw: String,
    pub filename: Option<String>,
}

impl NewFile {
    pub fn new(lexer: impl Into<String>, raw: impl Into<String>) -> Self {
        NewFile {
            lexer: lexer.into(),
            raw: raw.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        self.filename = (!filename.is_empty()).then_some(filename);
        self
    }
}

/// Where a paste was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Web,
    DeprecatedWeb,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Web => "web",
            Origin::DeprecatedWeb => "deprecated-web",
        }
    }
}
