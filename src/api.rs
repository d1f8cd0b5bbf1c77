use std::sync::Arc;

use axum::{
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use time::{format_description::FormatItem, macros::format_description, Date, OffsetDateTime};
use uuid::Uuid;

use ledgerbook_core::{
    models::read::DEFAULT_PAGE_SIZE, AccountFilter, AccountType, AddAttachmentCommand,
    CreateAccountCommand, CreateJournalCommand, JournalFilter, UpdateAccountCommand,
    UpdateJournalCommand,
};

use crate::{
    auth::{auth_middleware, CallerIdentity, Role},
    config::AuthConfig,
    error::LedgerError,
    extract::{JsonBody, PathParam, QueryParams},
    ledger::Ledger,
    storage::StorageError,
};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub metrics: Option<PrometheusHandle>,
    #[cfg(feature = "nl")]
    pub agent: Option<Arc<crate::agent::StatementAgent>>,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            metrics: None,
            #[cfg(feature = "nl")]
            agent: None,
        }
    }
}

pub type ApiResult<T> = Result<T, LedgerError>;

pub fn parse_date(value: &str) -> Result<Date, LedgerError> {
    Date::parse(value.trim(), DATE_FORMAT)
        .map_err(|_| LedgerError::Validation(format!("invalid date '{}', expected YYYY-MM-DD", value)))
}

/// Builds the HTTP router. Everything under `/api` goes through the API-key
/// middleware; `/health` and `/metrics` are public.
pub fn router(state: AppState, auth: Arc<AuthConfig>) -> Router {
    let api = Router::new()
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route("/api/accounts/tree", get(account_tree))
        .route(
            "/api/accounts/:code",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/api/journals", get(list_journals).post(create_journal))
        .route(
            "/api/journals/:id",
            get(get_journal).put(update_journal).delete(delete_journal),
        )
        .route("/api/journals/:id/post", post(post_journal))
        .route("/api/journals/:id/unpost", post(unpost_journal))
        .route("/api/journals/:id/restore", post(restore_journal))
        .route("/api/journals/:id/audit", get(journal_audit))
        .route("/api/journals/:id/attachments", post(add_attachment))
        .route(
            "/api/journals/:id/attachments/:attachment_id",
            delete(remove_attachment),
        )
        .route("/api/reports/trial-balance", get(trial_balance))
        .route("/api/admin/migrate", post(migrate));

    #[cfg(feature = "nl")]
    let api = api.route("/api/agents/statement", post(import_statement));

    let api = api.route_layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .merge(api)
        .route_layer(middleware::from_fn(track_requests))
        .layer(Extension(auth))
        .with_state(state)
}

/// Runs a ledger call on the blocking pool; storage drivers are synchronous.
async fn blocking<T, F>(ledger: &Arc<Ledger>, f: F) -> ApiResult<T>
where
    F: FnOnce(&Ledger) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let ledger = ledger.clone();
    tokio::task::spawn_blocking(move || f(&ledger))
        .await
        .map_err(|e| LedgerError::Storage(StorageError::Other(format!("worker task failed: {}", e))))?
}

async fn track_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    tracing::debug!(%method, %path, %status, "Handled request");
    metrics::increment_counter!(
        "ledgerbook_http_requests_total",
        "method" => method,
        "path" => path,
        "status" => status
    );
    response
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}

// Accounts

#[derive(Debug, Default, Deserialize)]
pub struct AccountQuery {
    #[serde(rename = "type")]
    pub account_type: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

async fn list_accounts(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    QueryParams(query): QueryParams<AccountQuery>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Reader)?;
    let account_type = query
        .account_type
        .as_deref()
        .map(|t| t.parse::<AccountType>())
        .transpose()
        .map_err(|e| LedgerError::Validation(e.to_string()))?;
    let filter = AccountFilter {
        account_type,
        active_only: query.active_only,
    };
    let accounts = blocking(&state.ledger, move |l| l.list_accounts(&filter)).await?;
    Ok(Json(accounts))
}

async fn account_tree(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Reader)?;
    let tree = blocking(&state.ledger, |l| l.account_tree()).await?;
    Ok(Json(tree))
}

async fn get_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(code): PathParam<String>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Reader)?;
    let account = blocking(&state.ledger, move |l| l.get_account(&code)).await?;
    Ok(Json(account))
}

async fn create_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    JsonBody(cmd): JsonBody<CreateAccountCommand>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let account = blocking(&state.ledger, move |l| l.create_account(&cmd)).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn update_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(code): PathParam<String>,
    JsonBody(cmd): JsonBody<UpdateAccountCommand>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let account = blocking(&state.ledger, move |l| l.update_account(&code, &cmd)).await?;
    Ok(Json(account))
}

async fn delete_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(code): PathParam<String>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let account = blocking(&state.ledger, move |l| l.deactivate_account(&code)).await?;
    Ok(Json(account))
}

// Journals

#[derive(Debug, Default, Deserialize)]
pub struct JournalQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub posted: Option<bool>,
    #[serde(default)]
    pub include_deleted: bool,
    pub account: Option<String>,
    pub source: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JournalQuery {
    fn into_filter(self) -> ApiResult<JournalFilter> {
        Ok(JournalFilter {
            from: self.from.as_deref().map(parse_date).transpose()?,
            to: self.to.as_deref().map(parse_date).transpose()?,
            posted: self.posted,
            include_deleted: self.include_deleted,
            account_code: self.account.map(Arc::from),
            source: self.source.map(Arc::from),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: self.offset.unwrap_or(0),
        })
    }
}

async fn list_journals(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    QueryParams(query): QueryParams<JournalQuery>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Reader)?;
    let filter = query.into_filter()?;
    let journals = blocking(&state.ledger, move |l| l.list_journals(&filter)).await?;
    Ok(Json(journals))
}

async fn get_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Reader)?;
    let journal = blocking(&state.ledger, move |l| l.get_journal(id)).await?;
    Ok(Json(journal))
}

async fn create_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    JsonBody(cmd): JsonBody<CreateJournalCommand>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let journal = blocking(&state.ledger, move |l| l.create_journal(&cmd, &caller.name)).await?;
    Ok((StatusCode::CREATED, Json(journal)))
}

async fn update_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
    JsonBody(cmd): JsonBody<UpdateJournalCommand>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let journal = blocking(&state.ledger, move |l| l.update_journal(id, &cmd, &caller.name)).await?;
    Ok(Json(journal))
}

async fn delete_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let journal = blocking(&state.ledger, move |l| l.delete_journal(id, &caller.name)).await?;
    Ok(Json(journal))
}

async fn post_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let journal = blocking(&state.ledger, move |l| l.post_journal(id, &caller.name)).await?;
    Ok(Json(journal))
}

async fn unpost_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Admin)?;
    let journal = blocking(&state.ledger, move |l| l.unpost_journal(id, &caller.name)).await?;
    Ok(Json(journal))
}

async fn restore_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Admin)?;
    let journal = blocking(&state.ledger, move |l| l.restore_journal(id, &caller.name)).await?;
    Ok(Json(journal))
}

async fn journal_audit(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Reader)?;
    let records = blocking(&state.ledger, move |l| l.journal_audit(id)).await?;
    Ok(Json(records))
}

async fn add_attachment(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam(id): PathParam<Uuid>,
    JsonBody(cmd): JsonBody<AddAttachmentCommand>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let attachment = blocking(&state.ledger, move |l| l.add_attachment(id, &cmd, &caller.name)).await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

async fn remove_attachment(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    PathParam((id, attachment_id)): PathParam<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Writer)?;
    let attachment = blocking(&state.ledger, move |l| l.remove_attachment(id, attachment_id, &caller.name)).await?;
    Ok(Json(attachment))
}

// Reports and administration

#[derive(Debug, Default, Deserialize)]
pub struct TrialBalanceQuery {
    pub as_of: Option<String>,
}

async fn trial_balance(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    QueryParams(query): QueryParams<TrialBalanceQuery>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Reader)?;
    let as_of = match query.as_of.as_deref() {
        Some(value) => parse_date(value)?,
        None => OffsetDateTime::now_utc().date(),
    };
    let report = blocking(&state.ledger, move |l| l.trial_balance(as_of)).await?;
    Ok(Json(json!({
        "as_of": report.as_of,
        "total_debit": report.total_debit(),
        "total_credit": report.total_credit(),
        "items": report.items,
    })))
}

async fn migrate(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<impl IntoResponse> {
    caller.require(Role::Admin)?;
    blocking(&state.ledger, |l| l.migrate()).await?;
    tracing::info!(caller = %caller.name, "Migrations applied");
    Ok(Json(json!({ "status": "migrated" })))
}

#[cfg(feature = "nl")]
#[derive(Debug, Deserialize)]
pub struct StatementRequest {
    pub statement: String,
    #[serde(default)]
    pub account_code: Option<String>,
}

#[cfg(feature = "nl")]
async fn import_statement(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    JsonBody(req): JsonBody<StatementRequest>,
) -> ApiResult<impl IntoResponse> {
    use crate::agent::{describe_chart, import_proposals};

    caller.require(Role::Writer)?;
    let agent = state
        .agent
        .clone()
        .ok_or_else(|| LedgerError::Agent("statement agent is not configured".to_string()))?;
    if req.statement.trim().is_empty() {
        return Err(LedgerError::Validation("statement is required".to_string()));
    }

    let chart = blocking(&state.ledger, describe_chart).await?;
    let proposals = agent.propose(&req.statement, &chart).await?;
    let account = req
        .account_code
        .unwrap_or_else(|| agent.statement_account().to_string());
    let result = blocking(&state.ledger, move |l| {
        Ok(import_proposals(l, proposals, &account, &caller.name))
    })
    .await?;
    Ok(Json(result))
}
