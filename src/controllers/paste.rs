use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Session;
use crate::error::AppError;
use crate::models::{File, NewFile, Origin, Paste, PasteWithFiles};
use crate::slug::SlugContext;
use crate::App;

/// Options that change how a paste is stored without changing its content.
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    pub origin: Origin,
    /// Use the fixed long slug length instead of auto-scaling.
    pub long: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            origin: Origin::Web,
            long: false,
        }
    }
}

/// Validate and store a new paste.
///
/// The first file always shares the paste's slug. A late slug collision
/// restarts the whole creation with fresh identifiers.
pub async fn create(
    app: &App,
    expiry: &str,
    files: Vec<NewFile>,
    options: CreateOptions,
) -> crate::AppResult<PasteWithFiles> {
    let now = Utc::now();
    let exp_date = expiry_date(app, expiry, &now)?;
    validate_files(app, &files)?;

    let attempts = app.config.slugs.creation_attempts.max(1);
    let mut attempt = 1;
    loop {
        match insert(app, expiry, exp_date, now, &files, options).await {
            Err(AppError::Conflict) if attempt < attempts => {
                warn!("slug collision while storing paste, retrying ({attempt}/{attempts})");
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn expiry_date(app: &App, expiry: &str, now: &DateTime<Utc>) -> crate::AppResult<DateTime<Utc>> {
    let Some(&secs) = app.config.expiries.get(expiry) else {
        info!("a paste was submitted with an invalid expiry");
        return Err(AppError::validation("Invalid expiry provided"));
    };

    i64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| now.checked_add_signed(Duration::seconds(secs)))
        .ok_or_else(|| AppError::validation("Invalid expiry provided"))
}

fn validate_files(app: &App, files: &[NewFile]) -> crate::AppResult<()> {
    if files.is_empty() {
        return Err(AppError::validation("A paste needs at least one file"));
    }

    if files.iter().any(|file| file.raw.trim().is_empty()) {
        return Err(AppError::validation("Empty pastes are not allowed"));
    }

    if files.iter().any(|file| !app.lexers.contains(&file.lexer)) {
        info!("a file had an invalid lexer");
        return Err(AppError::validation("Invalid lexer provided"));
    }

    let total_size: usize = files
        .iter()
        .map(|file| app.sizer.formatted_size(&file.lexer, &file.raw))
        .sum();
    let limit = app.config.limits.paste_size;
    if total_size > limit {
        info!("sum of files was too large: {total_size} > {limit}");
        return Err(AppError::validation(format!(
            "Sum of file sizes exceeds size limit when syntax highlighting applied ({}kB > {}kB)",
            total_size / 1024,
            limit / 1024
        )));
    }

    Ok(())
}

async fn insert(
    app: &App,
    expiry: &str,
    exp_date: DateTime<Utc>,
    now: DateTime<Utc>,
    files: &[NewFile],
    options: CreateOptions,
) -> crate::AppResult<PasteWithFiles> {
    let mut session = app.database.begin_write().await?;

    let existing = if options.long {
        0
    } else {
        session.count_pastes().await?
    };
    let mut slugs = SlugContext::new(
        app.slugs.clone(),
        &app.config.slugs,
        options.long,
        existing,
    );

    let paste = Paste {
        slug: slugs.next(&mut session).await?,
        expiry: expiry.to_owned(),
        exp_date,
        removal: Uuid::new_v4().to_string(),
        origin: options.origin.as_str().to_owned(),
        created_at: now,
    };

    let mut file_slugs = Vec::with_capacity(files.len());
    for _ in files {
        file_slugs.push(slugs.next(&mut session).await?);
    }
    // slugs are unique over pastes and files alike, so the first file can
    // safely take over the paste's slug
    file_slugs[0] = paste.slug.clone();

    let stored: Vec<File> = files
        .iter()
        .zip(file_slugs)
        .enumerate()
        .map(|(position, (file, slug))| File {
            slug,
            paste_slug: paste.slug.clone(),
            position: position as i64,
            lexer: file.lexer.clone(),
            raw: file.raw.clone(),
            filename: file.filename.clone().filter(|name| !name.is_empty()),
        })
        .collect();

    session.insert_paste(&paste).await?;
    for file in &stored {
        session.insert_file(file).await?;
    }
    session.commit().await?;

    info!(
        "new paste: slug='{slug}', files={count}, expiry='{expiry}', origin='{origin}'",
        slug = paste.slug,
        count = stored.len(),
        origin = paste.origin,
    );

    Ok(PasteWithFiles {
        paste,
        files: stored,
    })
}

/// Fetch a paste and its files. Expired pastes are deleted and reported as
/// not found.
pub async fn get(app: &App, slug: &str) -> crate::AppResult<PasteWithFiles> {
    let mut session = app.database.begin().await?;

    let paste = session.get_paste(slug).await?.ok_or(AppError::NotFound)?;
    if paste.is_expired(&Utc::now()) {
        discard_expired(app, session, &paste).await;
        return Err(AppError::NotFound);
    }

    let files = session.get_files(&paste.slug).await?;
    session.commit().await?;

    Ok(PasteWithFiles { paste, files })
}

/// Fetch a single file. If its paste has expired the whole paste is deleted.
pub async fn get_file(app: &App, slug: &str) -> crate::AppResult<File> {
    let mut session = app.database.begin().await?;

    let file = session.get_file(slug).await?.ok_or(AppError::NotFound)?;
    let paste = session
        .get_paste(&file.paste_slug)
        .await?
        .ok_or(AppError::NotFound)?;
    if paste.is_expired(&Utc::now()) {
        discard_expired(app, session, &paste).await;
        return Err(AppError::NotFound);
    }

    session.commit().await?;
    Ok(file)
}

/// Delete the paste owning `removal`. The token is the only credential.
pub async fn remove(app: &App, removal: &str) -> crate::AppResult<()> {
    let mut session = app.database.begin_write().await?;

    let Some(paste) = session.get_paste_by_removal(removal).await? else {
        info!("removal requested with an unknown token");
        return Err(AppError::NotFound);
    };
    if paste.is_expired(&Utc::now()) {
        discard_expired(app, session, &paste).await;
        return Err(AppError::NotFound);
    }

    session.delete_paste(&paste.slug).await?;
    session.commit().await?;

    info!("removed paste: slug='{}'", paste.slug);
    Ok(())
}

/// Delete every paste that expired before `now`, returning how many were
/// removed.
pub async fn purge_expired(app: &App, now: &DateTime<Utc>) -> crate::AppResult<u64> {
    let mut session = app.database.begin_write().await?;
    let count = session.delete_expired(now).await?;
    session.commit().await?;

    if count > 0 {
        info!("deleted {count} expired pastes");
    }
    Ok(count)
}

/// Best effort: the caller reports the paste as gone whether or not this
/// succeeds.
///
/// `session` may be a read session, so the delete runs in a write session of
/// its own.
async fn discard_expired(app: &App, session: Session, paste: &Paste) {
    warn!(
        "paste '{}' was expired, is the purge job running?",
        paste.slug
    );

    let result = match session.commit().await {
        Ok(()) => delete_paste(app, &paste.slug).await,
        Err(error) => Err(error),
    };
    if let Err(error) = result {
        warn!("failed to delete expired paste '{}': {error}", paste.slug);
    }
}

async fn delete_paste(app: &App, slug: &str) -> crate::AppResult<()> {
    let mut session = app.database.begin_write().await?;
    session.delete_paste(slug).await?;
    session.commit().await
}
