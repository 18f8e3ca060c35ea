use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::models::{File, PasteWithFiles};

#[derive(Debug, Serialize)]
pub struct PasteView {
    pub slug: String,
    pub expiry: String,
    pub exp_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub origin: String,
    /// Whether the viewer holds the removal token for this paste.
    pub can_delete: bool,
    pub remove_url: Option<String>,
    pub archive_url: String,
    pub files: Vec<FileView>,
}

#[derive(Debug, Serialize)]
pub struct FileView {
    pub slug: String,
    pub lexer: String,
    pub filename: Option<String>,
    pub raw: String,
    pub raw_url: String,
    pub hex_url: String,
    pub download_url: String,
}

/// Data for the paste creation form.
#[derive(Debug, Serialize)]
pub struct CreateForm {
    pub lexers: Vec<String>,
    pub lexers_available: Vec<String>,
    pub expiries: Vec<String>,
    /// Prefilled files when repasting.
    pub files: Vec<FormFile>,
}

#[derive(Debug, Serialize)]
pub struct FormFile {
    pub lexer: String,
    pub raw: String,
    pub filename: Option<String>,
}

impl PasteView {
    pub fn new(config: &Config, paste: PasteWithFiles, can_delete: bool) -> Self {
        let PasteWithFiles { paste, files } = paste;

        PasteView {
            remove_url: can_delete.then(|| config.url(&format!("/remove/{}", paste.removal))),
            archive_url: config.url(&format!("/download-archive/{}", paste.slug)),
            files: files
                .into_iter()
                .map(|file| FileView::new(config, file))
                .collect(),
            slug: paste.slug,
            expiry: paste.expiry,
            exp_date: paste.exp_date,
            created_at: paste.created_at,
            origin: paste.origin,
            can_delete,
        }
    }
}

impl FileView {
    pub fn new(config: &Config, file: File) -> Self {
        FileView {
            raw_url: config.url(&format!("/raw/{}", file.slug)),
            hex_url: config.url(&format!("/hex/{}", file.slug)),
            download_url: config.url(&format!("/download/{}", file.slug)),
            slug: file.slug,
            lexer: file.lexer,
            filename: file.filename,
            raw: file.raw,
        }
    }
}

impl From<File> for FormFile {
    fn from(file: File) -> Self {
        FormFile {
            lexer: file.lexer,
            raw: file.raw,
            filename: file.filename,
        }
    }
}
