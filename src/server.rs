use crate::{
    config::Config,
    errors::{AppError, AppResult},
    files::{
        archive::archive_name, breadcrumb::breadcrumb, ops, FileManager, FsError, FsResult,
        Operation, Outcome, ResolvedLocation,
    },
    render::{self, PageData},
    security::{self, RateLimiters},
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Form, Multipart, Query, Request, State},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::{
    convert::Infallible,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::{
    limit::RequestBodyLimitLayer, services::ServeFile, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub files: Arc<FileManager>,
    pub rls: RateLimiters,
}

impl AppState {
    pub fn new(cfg: Config, files: FileManager) -> Self {
        let rls = RateLimiters::new(cfg.limits.requests_per_second, cfg.limits.burst);
        Self { cfg: Arc::new(cfg), files: Arc::new(files), rls }
    }
}

/// Authenticated user, inserted by [`require_auth`].
#[derive(Clone, Debug)]
pub struct User(pub String);

const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

pub async fn serve(cfg: Config, files: FileManager) -> anyhow::Result<()> {
    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);
    let shared = AppState::new(cfg, files);

    let rls = shared.rls.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        loop {
            tick.tick().await;
            rls.prune();
            tracing::debug!(users = rls.tracked_users(), "rate limiter pruned");
        }
    });

    let app = build_router(shared);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(shared: AppState) -> Router {
    let upload_limit = shared.cfg.max_upload_bytes();
    let protected = Router::new()
        .route("/", get(browse))
        .route("/download", get(download))
        .route("/zip", post(zip))
        .route(
            "/upload",
            post(upload)
                .layer::<_, Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(upload_limit)),
        )
        .route("/mkdir", post(mkdir))
        .route("/delete", post(delete))
        .route("/rename", post(rename))
        .route_layer(middleware::from_fn_with_state(shared.clone(), require_auth));

    Router::new()
        .route("/healthz", get(health))
        .merge(protected)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let presented = security::basic_credentials(req.headers()).map(|(u, _)| u);
    if let Err(e) = state.rls.check_global() {
        tracing::warn!(user = ?presented, code = e.code(), "request throttled");
        return e.into_response();
    }
    let user = match security::require_basic(req.headers(), &state.cfg.auth.username, &state.cfg.auth.password) {
        Ok(user) => user,
        Err(e) => {
            tracing::info!(user = ?presented, code = e.code(), "authentication failed");
            return e.into_response();
        }
    };
    if let Err(e) = state.rls.check_user(&user) {
        tracing::warn!(user = %user, code = e.code(), "request throttled");
        return e.into_response();
    }
    req.extensions_mut().insert(User(user));
    next.run(req).await
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

#[derive(Debug, Deserialize)]
struct LocationQuery {
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct NameForm {
    #[serde(default)]
    root: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RenameForm {
    #[serde(default)]
    root: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    old: String,
    #[serde(default)]
    new: String,
}

#[derive(Debug, Deserialize)]
struct LocationForm {
    #[serde(default)]
    root: String,
    #[serde(default)]
    path: String,
}

async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> FsResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

/// Runs `op` through the confinement gate and logs one audit event.
async fn run(
    state: &AppState,
    user: &User,
    root: String,
    path: String,
    op: Operation,
) -> AppResult<(ResolvedLocation, Outcome)> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let op_name = op.name();
    let files = state.files.clone();
    let (r, p) = (root.clone(), path.clone());
    let result = blocking(move || files.execute(&r, &p, op)).await;
    let (decision, code) = decision(&result);
    audit(&request_id, &user.0, op_name, &root, &path, decision, code, started.elapsed().as_millis() as u64);
    result
}

/// Confinement violations are denials; everything else that fails is an error.
fn decision<T>(result: &AppResult<T>) -> (&'static str, &'static str) {
    match result {
        Ok(_) => ("allow", "OK"),
        Err(e @ AppError::Fs(FsError::InvalidRoot | FsError::PathEscape)) => ("deny", e.code()),
        Err(e) => ("error", e.code()),
    }
}

#[allow(clippy::too_many_arguments)]
fn audit(
    request_id: &str,
    user: &str,
    op: &str,
    root: &str,
    path: &str,
    decision: &str,
    code: &str,
    duration_ms: u64,
) {
    tracing::info!(
        request_id = request_id,
        user = user,
        op = op,
        root = root,
        path = path,
        decision = decision,
        code = code,
        duration_ms = duration_ms,
        "audit"
    );
}

fn back_to(location: &ResolvedLocation) -> Redirect {
    Redirect::to(&render::browse_link(&location.root, &location.relative_display()))
}

fn default_root(state: &AppState, root: Option<String>) -> String {
    match root {
        Some(r) if !r.is_empty() => r,
        _ => state
            .files
            .roots()
            .first()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

async fn serve_file(location: &ResolvedLocation, req: Request) -> AppResult<Response> {
    let res = ServeFile::new(&location.absolute)
        .oneshot(req)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(res.map(Body::new))
}

/// Serves a resolved file and logs a `read` audit event for it.
async fn read_file(
    user: &User,
    root: &str,
    path: &str,
    started: Instant,
    located: AppResult<ResolvedLocation>,
    req: Request,
) -> AppResult<Response> {
    let result = match located {
        Ok(location) => serve_file(&location, req).await,
        Err(e) => Err(e),
    };
    let (decision, code) = decision(&result);
    let request_id = uuid::Uuid::new_v4().to_string();
    audit(&request_id, &user.0, "read", root, path, decision, code, started.elapsed().as_millis() as u64);
    result
}

async fn browse(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(q): Query<LocationQuery>,
    req: Request,
) -> AppResult<Response> {
    let started = Instant::now();
    let root = default_root(&state, q.root);
    let files = state.files.clone();
    let (r, p) = (root.clone(), q.path.clone());
    let stat = blocking(move || {
        let location = files.resolve(&r, &p)?;
        let is_file = std::fs::metadata(&location.absolute).map(|m| !m.is_dir()).unwrap_or(false);
        Ok((location, is_file))
    })
    .await;
    // Resolution failures fall through so the listing audits them.
    if let Ok((location, true)) = stat {
        return read_file(&user, &root, &q.path, started, Ok(location), req).await;
    }

    let (location, outcome) = run(&state, &user, root, q.path, Operation::List).await?;
    let Outcome::Listing(entries) = outcome else {
        return Err(AppError::Internal("unexpected outcome".into()));
    };
    let crumbs = breadcrumb(&location.root, &location.relative);
    let page = render::page(&PageData {
        location: &location,
        roots: state.files.roots().paths().collect(),
        breadcrumb: &crumbs,
        entries: &entries,
    });
    Ok(Html(page).into_response())
}

async fn download(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(q): Query<LocationQuery>,
    req: Request,
) -> AppResult<Response> {
    let started = Instant::now();
    let root = q.root.unwrap_or_default();
    let files = state.files.clone();
    let (r, p) = (root.clone(), q.path.clone());
    let stat = blocking(move || {
        let location = files.resolve(&r, &p)?;
        let meta = std::fs::metadata(&location.absolute)
            .map_err(FsError::io("stat", &location.absolute))?;
        Ok((location, meta.is_dir()))
    })
    .await;
    let located = match stat {
        Ok((location, true)) => return Ok(back_to(&location).into_response()),
        Ok((location, false)) => Ok(location),
        Err(e) => Err(e),
    };
    read_file(&user, &root, &q.path, started, located, req).await
}

async fn zip(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Form(f): Form<LocationForm>,
) -> AppResult<Response> {
    let (location, outcome) = run(&state, &user, f.root, f.path, Operation::Archive).await?;
    let Outcome::Archive(archive) = outcome else {
        return Err(AppError::Internal("unexpected outcome".into()));
    };
    let name = archive_name(&location.relative, &location.absolute);
    tracing::info!(files = archive.file_count, skipped = archive.skipped.len(), name = %name, "archive built");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}.zip\"", header_safe(&name)))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"download.zip\""));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert("x-archive-skipped", HeaderValue::from(archive.skipped.len()));
    Ok((StatusCode::OK, headers, Bytes::from(archive.bytes)).into_response())
}

fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

async fn mkdir(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Form(f): Form<NameForm>,
) -> AppResult<Redirect> {
    if f.name.is_empty() {
        return Err(AppError::BadRequest("name required".into()));
    }
    let (location, _) = run(&state, &user, f.root, f.path, Operation::MakeDir { name: f.name }).await?;
    Ok(back_to(&location))
}

async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Form(f): Form<NameForm>,
) -> AppResult<Redirect> {
    if f.name.is_empty() {
        return Err(AppError::BadRequest("name required".into()));
    }
    let (location, _) = run(&state, &user, f.root, f.path, Operation::Delete { name: f.name }).await?;
    Ok(back_to(&location))
}

async fn rename(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Form(f): Form<RenameForm>,
) -> AppResult<Redirect> {
    if f.old.is_empty() || f.new.is_empty() {
        return Err(AppError::BadRequest("names required".into()));
    }
    let op = Operation::Rename { old: f.old, new: f.new };
    let (location, _) = run(&state, &user, f.root, f.path, op).await?;
    Ok(back_to(&location))
}

#[derive(Default)]
struct UploadProgress {
    root: Option<String>,
    path: String,
    location: Option<ResolvedLocation>,
    saved: usize,
}

async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> AppResult<Redirect> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut progress = UploadProgress::default();
    let result = receive_uploads(&state.files, &mut multipart, &mut progress).await;

    let (decision, code) = decision(&result);
    audit(
        &request_id,
        &user.0,
        "upload",
        progress.root.as_deref().unwrap_or_default(),
        &progress.path,
        decision,
        code,
        started.elapsed().as_millis() as u64,
    );
    result?;
    let location = progress.location.ok_or_else(|| AppError::BadRequest("no files".into()))?;
    Ok(back_to(&location))
}

/// Streams every `files[]` field into the resolved directory. `root` and
/// `path` must arrive before the first file.
async fn receive_uploads(
    files: &FileManager,
    multipart: &mut Multipart,
    progress: &mut UploadProgress,
) -> AppResult<()> {
    let bad = |e: axum::extract::multipart::MultipartError| AppError::BadRequest(e.to_string());
    while let Some(mut field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "root" => progress.root = Some(field.text().await.map_err(bad)?),
            "path" => progress.path = field.text().await.map_err(bad)?,
            "files[]" => {
                // Browsers send an empty part when no file was picked.
                let file_name = match field.file_name() {
                    Some(n) if !n.is_empty() => n.to_string(),
                    _ => continue,
                };
                if progress.location.is_none() {
                    let root = progress
                        .root
                        .as_deref()
                        .ok_or_else(|| AppError::BadRequest("root must precede files".into()))?;
                    progress.location = Some(files.resolve(root, &progress.path)?);
                }
                let dir = match &progress.location {
                    Some(l) => l.absolute.clone(),
                    None => return Err(AppError::Internal("upload location missing".into())),
                };
                let target = ops::upload_target(&dir, &file_name)?;
                let mut out = tokio::fs::File::create(&target)
                    .await
                    .map_err(FsError::io("create", &target))?;
                while let Some(chunk) = field.chunk().await.map_err(bad)? {
                    out.write_all(&chunk).await.map_err(FsError::io("write", &target))?;
                }
                out.flush().await.map_err(FsError::io("write", &target))?;
                progress.saved += 1;
            }
            _ => {}
        }
    }
    if progress.saved == 0 {
        return Err(AppError::BadRequest("no files".into()));
    }
    Ok(())
}
