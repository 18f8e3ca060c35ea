use std::future::Future;
use std::net::SocketAddr;

use axum::extract::{DefaultBodyLimit, Form, Path, State};
use axum::headers::Cookie;
use axum::http::header;
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router, TypedHeader};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use urlencoding::encode;

use crate::controllers::paste::{self, CreateOptions};
use crate::delivery;
use crate::error::AppError;
use crate::models::{NewFile, Origin, PasteWithFiles};
use crate::ratelimit::{self, Area, ClientAddr};
use crate::types::api::{CreateForm, FormFile, PasteView};
use crate::App;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub async fn run(app: App) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], app.config.port));
    info!("listening on http://{addr}");

    if let Some(interval) = app.config.ratelimit.cleanup_interval() {
        ratelimit::spawn_cleanup_task(app.ratelimit.clone(), interval);
        info!("rate limiter cleanup every {}s", interval.as_secs());
    }

    axum::Server::bind(&addr)
        .serve(router(app).into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}

pub fn router(app: App) -> Router {
    Router::new()
        .route("/", get(create_form).post(create_legacy))
        .route("/create", post(create_action))
        .route("/create/:lexers", get(create_form_with_lexers))
        .route("/:slug", get(show))
        .route("/show/:slug", get(redirect_show))
        .route("/repaste/:slug", get(repaste))
        .route("/raw/:file_id", get(file_raw))
        .route("/hex/:file_id", get(file_hex))
        .route("/download/:file_id", get(file_download))
        .route("/download-archive/:paste_id", get(paste_download))
        .route("/remove/:removal", get(remove))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(
            app.config.limits.max_upload_size,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Run a storage operation on its own task so that a client hanging up
/// cannot abandon a transaction halfway.
async fn run_to_completion<T>(
    task: impl Future<Output = crate::AppResult<T>> + Send + 'static,
) -> crate::AppResult<T>
where
    T: Send + 'static,
{
    tokio::spawn(task).await?
}

/// Urlencoded form fields, allowing repeated keys. `name[]` and `name` are
/// the same field.
struct FormFields(Vec<(String, String)>);

impl FormFields {
    fn all(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(key, _)| key.trim_end_matches("[]") == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn one(&self, name: &str) -> crate::AppResult<String> {
        self.all(name)
            .into_iter()
            .next()
            .ok_or_else(|| AppError::validation(format!("Missing argument '{name}'")))
    }

    fn has(&self, name: &str) -> bool {
        self.0
            .iter()
            .any(|(key, _)| key.trim_end_matches("[]") == name)
    }
}

fn form_data(app: &App, lexers: Vec<String>, files: Vec<FormFile>) -> CreateForm {
    CreateForm {
        lexers,
        lexers_available: app.lexers.all().iter().cloned().collect(),
        expiries: app.config.expiry_names(),
        files,
    }
}

/// Redirect to a new paste, handing the submitter its removal token in a
/// cookie scoped to the paste's path.
fn created(paste: &PasteWithFiles) -> Response {
    let slug = &paste.paste.slug;
    let cookie = format!("removal={}; Path=/{slug}", paste.paste.removal);
    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::to(&format!("/{slug}")),
    )
        .into_response()
}

async fn create_form(
    State(app): State<App>,
    client: ClientAddr,
) -> crate::AppResult<Json<CreateForm>> {
    app.ratelimit.check(Area::Read, &client)?;
    let lexers = vec![app.config.default_lexer.clone()];
    Ok(Json(form_data(&app, lexers, Vec::new())))
}

async fn create_form_with_lexers(
    State(app): State<App>,
    client: ClientAddr,
    Path(lexers): Path<String>,
) -> crate::AppResult<Json<CreateForm>> {
    app.ratelimit.check(Area::Read, &client)?;

    let mut selected: Vec<String> = lexers
        .split('+')
        .map(str::trim)
        .filter(|lexer| !lexer.is_empty())
        .map(str::to_owned)
        .collect();
    if selected.is_empty() {
        selected.push(app.config.default_lexer.clone());
    }

    if !selected.iter().all(|lexer| app.lexers.contains(lexer)) {
        debug!("create form requested with a non-existent lexer");
        return Err(AppError::NotFound);
    }

    Ok(Json(form_data(&app, selected, Vec::new())))
}

/// Single file creation kept for older clients posting `lexer`, `code` and
/// `expiry`.
async fn create_legacy(
    State(app): State<App>,
    client: ClientAddr,
    Form(fields): Form<Vec<(String, String)>>,
) -> crate::AppResult<Response> {
    app.ratelimit.check(Area::Create, &client)?;

    let fields = FormFields(fields);
    let lexer = fields.one("lexer")?;
    let raw = fields.one("code")?;
    let expiry = fields.one("expiry")?;

    if !app.lexers.contains(&lexer) {
        info!("a legacy paste was submitted with an invalid lexer");
        return Err(AppError::validation("Invalid lexer provided"));
    }

    if raw.trim().is_empty() {
        return Ok(Redirect::to(&format!("/create/{}", encode(&lexer))).into_response());
    }

    if !app.config.expiries.contains_key(&expiry) {
        info!("a legacy paste was submitted with an invalid expiry");
        return Err(AppError::validation("Invalid expiry provided"));
    }

    let options = CreateOptions {
        origin: Origin::DeprecatedWeb,
        long: false,
    };
    let paste = run_to_completion(async move {
        paste::create(&app, &expiry, vec![NewFile::new(lexer, raw)], options).await
    })
    .await?;

    Ok(created(&paste))
}

/// Multi file creation from parallel `lexer`, `raw` and `filename` lists.
async fn create_action(
    State(app): State<App>,
    client: ClientAddr,
    Form(fields): Form<Vec<(String, String)>>,
) -> crate::AppResult<Response> {
    app.ratelimit.check(Area::Create, &client)?;

    let fields = FormFields(fields);
    let expiry = fields.one("expiry")?;
    if !app.config.expiries.contains_key(&expiry) {
        info!("a paste was submitted with an invalid expiry");
        return Err(AppError::validation("Invalid expiry provided"));
    }

    let long = fields.has("long");
    let lexers = fields.all("lexer");
    let raws = fields.all("raw");
    let filenames = fields.all("filename");

    if lexers.is_empty() || raws.is_empty() || filenames.is_empty() {
        return Err(AppError::validation(
            "'lexer', 'raw', and 'filename' arguments must not be empty",
        ));
    }

    if raws.iter().any(|raw| raw.trim().is_empty()) {
        return Err(AppError::validation("Empty pastes are not allowed"));
    }

    if raws.len() != lexers.len() || filenames.len() != lexers.len() {
        info!("a paste was submitted with mismatching argument lists");
        return Err(AppError::validation(
            "'lexer', 'raw', and 'filename' arguments must be the same length",
        ));
    }

    let files: Vec<NewFile> = lexers
        .into_iter()
        .zip(raws)
        .zip(filenames)
        .map(|((lexer, raw), filename)| NewFile::new(lexer, raw).with_filename(filename))
        .collect();

    let options = CreateOptions {
        origin: Origin::Web,
        long,
    };
    let paste =
        run_to_completion(async move { paste::create(&app, &expiry, files, options).await })
            .await?;

    Ok(created(&paste))
}

async fn show(
    State(app): State<App>,
    client: ClientAddr,
    Path(slug): Path<String>,
    cookies: Option<TypedHeader<Cookie>>,
) -> crate::AppResult<Json<PasteView>> {
    app.ratelimit.check(Area::Read, &client)?;

    let paste = {
        let app = app.clone();
        run_to_completion(async move { paste::get(&app, &slug).await }).await?
    };

    let can_delete = cookies
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get("removal"))
        .map_or(false, |token| token.as_bytes() == paste.paste.removal.as_bytes());

    Ok(Json(PasteView::new(&app.config, paste, can_delete)))
}

/// Old `/show/<slug>` links.
async fn redirect_show(
    State(app): State<App>,
    client: ClientAddr,
    Path(slug): Path<String>,
) -> crate::AppResult<Redirect> {
    app.ratelimit.check(Area::Read, &client)?;

    let paste = run_to_completion(async move { paste::get(&app, &slug).await }).await?;
    Ok(Redirect::permanent(&format!("/{}", paste.paste.slug)))
}

/// The create form prefilled with an existing paste's files.
async fn repaste(
    State(app): State<App>,
    client: ClientAddr,
    Path(slug): Path<String>,
) -> crate::AppResult<Json<CreateForm>> {
    app.ratelimit.check(Area::Read, &client)?;

    let paste = {
        let app = app.clone();
        run_to_completion(async move { paste::get(&app, &slug).await }).await?
    };

    let mut lexers: Vec<String> = Vec::new();
    for file in &paste.files {
        if !lexers.contains(&file.lexer) {
            lexers.push(file.lexer.clone());
        }
    }
    let files = paste.files.into_iter().map(FormFile::from).collect();

    Ok(Json(form_data(&app, lexers, files)))
}

async fn file_raw(
    State(app): State<App>,
    client: ClientAddr,
    Path(file_id): Path<String>,
) -> crate::AppResult<Response> {
    app.ratelimit.check(Area::Read, &client)?;

    let file = run_to_completion(async move { paste::get_file(&app, &file_id).await }).await?;
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], file.raw).into_response())
}

async fn file_hex(
    State(app): State<App>,
    client: ClientAddr,
    Path(file_id): Path<String>,
) -> crate::AppResult<Response> {
    app.ratelimit.check(Area::Read, &client)?;

    let file = run_to_completion(async move { paste::get_file(&app, &file_id).await }).await?;
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], delivery::hex(&file.raw)).into_response())
}

async fn file_download(
    State(app): State<App>,
    client: ClientAddr,
    Path(file_id): Path<String>,
) -> crate::AppResult<Response> {
    app.ratelimit.check(Area::Read, &client)?;

    let file = run_to_completion(async move { paste::get_file(&app, &file_id).await }).await?;
    let disposition = format!(
        "attachment; filename={}",
        delivery::download_name(&file)
    );

    Ok((
        [
            (header::CONTENT_TYPE, TEXT_PLAIN.to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.raw,
    )
        .into_response())
}

async fn paste_download(
    State(app): State<App>,
    client: ClientAddr,
    Path(paste_id): Path<String>,
) -> crate::AppResult<Response> {
    app.ratelimit.check(Area::Read, &client)?;

    let paste = run_to_completion(async move { paste::get(&app, &paste_id).await }).await?;
    let data = delivery::archive(&paste.files)?;
    let disposition = format!(
        "attachment; filename={}",
        delivery::archive_name(&paste.paste.slug)
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

/// Always ends up on the index, whether or not the token matched a paste.
async fn remove(
    State(app): State<App>,
    client: ClientAddr,
    Path(removal): Path<String>,
) -> crate::AppResult<Redirect> {
    app.ratelimit.check(Area::Delete, &client)?;

    match run_to_completion(async move { paste::remove(&app, &removal).await }).await {
        Ok(()) | Err(AppError::NotFound) => {}
        Err(error) => error!("failed to remove paste: {error}"),
    }
    Ok(Redirect::to("/"))
}
