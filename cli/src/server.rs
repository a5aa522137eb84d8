use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::error;

use plate_core::error::PlanError;
use plate_core::models::{
    DailyPlan, MAX_MEALS, MacroTargets, Macros, MealPlan, PlanDetail, PlanRequest, ShoppingList,
    SlotPreset, SubstituteCandidate, WeekDay, default_slot_tags,
};
use plate_core::service::PlannerService;
use plate_core::shopping::MAX_SHOPPING_DAYS;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const DEFAULT_SUBSTITUTE_LIMIT: usize = 10;
const DEFAULT_PLAN_DAYS: u32 = 7;

#[derive(Clone)]
struct AppState {
    svc: Arc<Mutex<PlannerService>>,
    api_key: Option<String>,
}

// --- Request / Response types ---

/// Targets shared by the daily and weekly plan endpoints.
#[derive(Deserialize)]
struct PlanTargets {
    calories: f64,
    #[serde(default = "default_meals")]
    meals: i64,
    protein_g: Option<f64>,
    carbs_g: Option<f64>,
    fat_g: Option<f64>,
    #[serde(default)]
    exclusions: Vec<String>,
    /// Slot presets such as `["breakfast", "snack"]`; overrides `meals`.
    slots: Option<Vec<String>>,
    #[serde(default)]
    use_split: bool,
    /// Bias the first slots toward breakfast, lunch and dinner tags.
    #[serde(default)]
    bias_tags: bool,
}

fn default_meals() -> i64 {
    3
}

fn default_days() -> u32 {
    DEFAULT_PLAN_DAYS
}

#[derive(Deserialize)]
struct CreatePlanRequest {
    date: Option<String>,
    #[serde(flatten)]
    targets: PlanTargets,
}

#[derive(Deserialize)]
struct CreateWeekRequest {
    start: Option<String>,
    #[serde(default = "default_days")]
    days: u32,
    #[serde(flatten)]
    targets: PlanTargets,
}

#[derive(Deserialize)]
struct UpdateServingsRequest {
    servings: f64,
}

#[derive(Deserialize)]
struct SubstituteRequest {
    recipe_id: i64,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ShoppingQuery {
    start: Option<String>,
    days: Option<u32>,
}

#[derive(Serialize)]
struct ItemTotalsResponse {
    item_id: i64,
    totals: Macros,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NotFound { .. } => Self::NotFound(err.to_string()),
            PlanError::PersistenceFailure { .. } => {
                error!("{err:#}");
                Self::Unavailable("Database is busy, try again later".to_string())
            }
            e if e.is_invalid_input() => Self::BadRequest(e.to_string()),
            e => Self::Internal(e.into()),
        }
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Helpers ---

/// Run `f` against the shared service on the blocking pool.
async fn with_service<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&PlannerService) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let svc = Arc::clone(&state.svc);
    tokio::task::spawn_blocking(move || {
        let svc = svc.lock().unwrap_or_else(PoisonError::into_inner);
        f(&svc)
    })
    .await
    .context("planner task failed")?
}

fn parse_date(value: Option<&str>) -> Result<NaiveDate, ApiError> {
    value.map_or_else(
        || Ok(Local::now().date_naive()),
        |d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("Invalid date '{d}'. Use YYYY-MM-DD")))
        },
    )
}

fn build_request(svc: &PlannerService, targets: PlanTargets) -> Result<PlanRequest, ApiError> {
    if !targets.calories.is_finite() || targets.calories <= 0.0 {
        return Err(ApiError::BadRequest(
            "calories must be greater than 0".to_string(),
        ));
    }
    for (name, value) in [
        ("protein_g", targets.protein_g),
        ("carbs_g", targets.carbs_g),
        ("fat_g", targets.fat_g),
    ] {
        if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return Err(ApiError::BadRequest(format!(
                "{name} must be a non-negative number"
            )));
        }
    }
    if !(1..=MAX_MEALS).contains(&targets.meals) {
        return Err(ApiError::BadRequest(format!(
            "meals must be between 1 and {MAX_MEALS}"
        )));
    }

    let mut request = PlanRequest::new(targets.calories, targets.meals);
    request.macro_targets = MacroTargets {
        protein_g: targets.protein_g,
        carbs_g: targets.carbs_g,
        fat_g: targets.fat_g,
    };
    request.exclusions = targets.exclusions;

    if let Some(slots) = targets.slots {
        let presets = slots
            .iter()
            .map(|s| s.parse::<SlotPreset>())
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
        let too_many = i64::try_from(presets.len()).map_or(true, |n| n > MAX_MEALS);
        if presets.is_empty() || too_many {
            return Err(ApiError::BadRequest(format!(
                "slots must list between 1 and {MAX_MEALS} entries"
            )));
        }
        request = request.with_slots(&presets);
    } else if targets.bias_tags {
        request.preferred_tags = Some(default_slot_tags(request.slots()));
    }
    if targets.use_split {
        request = svc.apply_macro_split(request)?;
    }
    Ok(request)
}

// --- Handlers ---

async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<DailyPlan>), ApiError> {
    let date = parse_date(req.date.as_deref())?;
    let plan = with_service(&state, move |svc| {
        let request = build_request(svc, req.targets)?;
        Ok(svc.generate_daily_plan(&request, date)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn create_week(
    State(state): State<AppState>,
    Json(req): Json<CreateWeekRequest>,
) -> Result<(StatusCode, Json<Vec<WeekDay>>), ApiError> {
    let start = parse_date(req.start.as_deref())?;
    if req.days == 0 || req.days > 31 {
        return Err(ApiError::BadRequest(
            "days must be between 1 and 31".to_string(),
        ));
    }
    let days = req.days;
    let week = with_service(&state, move |svc| {
        let request = build_request(svc, req.targets)?;
        Ok(svc.generate_weekly_plan(&request, start, days)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(week)))
}

async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<MealPlan>>, ApiError> {
    let limit = query.limit.unwrap_or(30);
    let plans = with_service(&state, move |svc| Ok(svc.list_plans(limit)?)).await?;
    Ok(Json(plans))
}

async fn get_plan(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<PlanDetail>, ApiError> {
    let date = parse_date(Some(date.as_str()))?;
    let detail = with_service(&state, move |svc| Ok(svc.get_plan_detail(date)?)).await?;
    detail
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No plan for {date}")))
}

async fn update_item_servings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateServingsRequest>,
) -> Result<Json<ItemTotalsResponse>, ApiError> {
    let totals =
        with_service(&state, move |svc| Ok(svc.update_item_servings(id, req.servings)?)).await?;
    Ok(Json(ItemTotalsResponse { item_id: id, totals }))
}

async fn substitute_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SubstituteRequest>,
) -> Result<Json<ItemTotalsResponse>, ApiError> {
    let totals =
        with_service(&state, move |svc| Ok(svc.substitute_item(id, req.recipe_id)?)).await?;
    Ok(Json(ItemTotalsResponse { item_id: id, totals }))
}

async fn get_substitutes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<SubstituteCandidate>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SUBSTITUTE_LIMIT);
    let candidates = with_service(&state, move |svc| Ok(svc.rank_substitutes(id, limit)?)).await?;
    Ok(Json(candidates))
}

async fn get_shopping_list(
    State(state): State<AppState>,
    Query(query): Query<ShoppingQuery>,
) -> Result<Json<ShoppingList>, ApiError> {
    let start = parse_date(query.start.as_deref())?;
    let days = query.days.unwrap_or(DEFAULT_PLAN_DAYS);
    if days == 0 || days > MAX_SHOPPING_DAYS {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {MAX_SHOPPING_DAYS}"
        )));
    }
    let list = with_service(&state, move |svc| Ok(svc.shopping_list(start, days)?)).await?;
    Ok(Json(list))
}

/// First and last four characters of a key, or `****` for short keys.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/plans", post(create_plan).get(list_plans))
        .route("/api/plans/week", post(create_week))
        .route("/api/plans/{date}", get(get_plan))
        .route("/api/plan-items/{id}/servings", put(update_item_servings))
        .route("/api/plan-items/{id}/recipe", put(substitute_item))
        .route("/api/recipes/{id}/substitutes", get(get_substitutes))
        .route("/api/shopping-list", get(get_shopping_list))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    svc: PlannerService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        svc: Arc::new(Mutex::new(svc)),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {} (see api_key file in data directory)",
            mask_key(key)
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    tracing::info!(%bind, port, "plan server started");
    axum::serve(listener, app).await?;

    Ok(())
}
