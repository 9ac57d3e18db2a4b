use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::aggregate::{self, Metric};
use crate::auth::{self, TokenService};
use crate::cli::ServeArgs;
use crate::dataset::{DataBundle, Dataset};
use crate::error::ApiError;
use crate::geo;
use crate::storage::{DataPaths, file_present_nonempty};

#[derive(Clone)]
pub struct AppState {
    pub dataset: Arc<Dataset>,
    pub tokens: Arc<TokenService>,
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let paths = DataPaths::new(&opts.data_dir, &opts.data_file, &opts.geojson_file);
    // The bundle loads lazily on first use; health and login must work
    // even when the sources are absent, so only warn here.
    if !file_present_nonempty(&paths.cases_path) {
        tracing::warn!(
            "case table missing at {}; data endpoints will fail until it exists",
            paths.cases_path.display()
        );
    }
    if !file_present_nonempty(&paths.boundaries_path) {
        tracing::warn!(
            "boundary file missing at {}; data endpoints will fail until it exists",
            paths.boundaries_path.display()
        );
    }

    let tokens = TokenService::new(
        &opts.secret_key,
        opts.token_expire_minutes,
        &opts.blacklist_file,
    )
    .context("open token blacklist")?;

    let state = AppState {
        dataset: Arc::new(Dataset::new(paths)),
        tokens: Arc::new(tokens),
    };
    let app = app(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/diseases", get(diseases))
        .route("/years", get(years))
        .route("/disease-codes", get(disease_codes))
        .route("/map", get(map_geojson))
        .route("/top", get(top_districts))
        .route("/export", get(export_csv))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/login", post(login))
        // Logout revokes whatever token is presented without verifying
        // it, so a second logout of the same token is still a 200.
        .route("/logout", post(logout))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
}

async fn login(
    State(st): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if body.email != auth::ADMIN_EMAIL || body.password != auth::ADMIN_PASSWORD {
        return Err(ApiError::Auth);
    }
    let access_token = st.tokens.issue(&body.email)?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: st.tokens.expires_in_secs(),
    }))
}

async fn logout(
    State(st): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(auth::bearer_token)
        .ok_or(ApiError::Auth)?;
    st.tokens.revoke(token)?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct DiseaseEntry {
    code: String,
    name: String,
}

async fn diseases(
    State(st): State<AppState>,
    Query(p): Query<PageParams>,
) -> Result<Json<Vec<DiseaseEntry>>, ApiError> {
    let bundle = st.dataset.get().await?;
    let limit = p.limit.unwrap_or(100).clamp(1, 1000);
    let offset = p.offset.unwrap_or(0);
    let out = bundle
        .disease_pairs
        .iter()
        .skip(offset)
        .take(limit)
        .map(|(code, name)| DiseaseEntry {
            code: code.clone(),
            name: name.clone(),
        })
        .collect();
    Ok(Json(out))
}

async fn years(State(st): State<AppState>) -> Result<Json<Vec<i32>>, ApiError> {
    let bundle = st.dataset.get().await?;
    Ok(Json(bundle.years.clone()))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn disease_codes(
    State(st): State<AppState>,
    Query(p): Query<SearchParams>,
) -> Result<Json<Vec<DiseaseEntry>>, ApiError> {
    let bundle = st.dataset.get().await?;
    let limit = p.limit.unwrap_or(100).clamp(1, 1000);
    let offset = p.offset.unwrap_or(0);
    let needle = p
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let out = bundle
        .disease_pairs
        .iter()
        .filter(|(code, name)| match &needle {
            Some(q) => code.to_lowercase().contains(q) || name.to_lowercase().contains(q),
            None => true,
        })
        .skip(offset)
        .take(limit)
        .map(|(code, name)| DiseaseEntry {
            code: code.clone(),
            name: name.clone(),
        })
        .collect();
    Ok(Json(out))
}

fn ensure_known(bundle: &DataBundle, year: i32, code: &str) -> Result<(), ApiError> {
    if !bundle.has_year(year) {
        return Err(ApiError::NotFound("year"));
    }
    if !bundle.has_code(code) {
        return Err(ApiError::NotFound("disease code"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MapParams {
    year: i32,
    code: String,
}

async fn map_geojson(
    State(st): State<AppState>,
    Query(p): Query<MapParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bundle = st.dataset.get().await?;
    ensure_known(bundle, p.year, &p.code)?;
    let rows = aggregate::filter_and_aggregate(&bundle.records, p.year, &p.code);
    Ok(Json(geo::merge_metrics(&bundle.boundaries, &rows)))
}

#[derive(Debug, Deserialize)]
struct TopParams {
    year: i32,
    code: String,
    metric: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct DistrictRank {
    ubigeo: String,
    district: String,
    casos: f64,
    pobtot: Option<f64>,
    tia: Option<f64>,
}

async fn top_districts(
    State(st): State<AppState>,
    Query(p): Query<TopParams>,
) -> Result<Json<Vec<DistrictRank>>, ApiError> {
    let bundle = st.dataset.get().await?;
    ensure_known(bundle, p.year, &p.code)?;
    let metric = Metric::parse(p.metric.as_deref().unwrap_or("tia")).ok_or_else(|| {
        ApiError::InvalidArgument("metric must be one of: casos, pobtot, tia".into())
    })?;
    let limit = p.limit.unwrap_or(10).clamp(1, 100);
    let offset = p.offset.unwrap_or(0);

    let rows = aggregate::filter_and_aggregate(&bundle.records, p.year, &p.code);
    let ranked = aggregate::rank_by_metric(rows, metric);
    let out = ranked
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|row| DistrictRank {
            district: bundle
                .code_to_name
                .get(&row.ubigeo)
                .cloned()
                .unwrap_or_default(),
            ubigeo: row.ubigeo,
            casos: row.cases,
            pobtot: row.population,
            tia: row.tia,
        })
        .collect();
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    year: i32,
    code: String,
    format: Option<String>,
}

async fn export_csv(
    State(st): State<AppState>,
    Query(p): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let format = p.format.as_deref().unwrap_or("csv");
    if !format.eq_ignore_ascii_case("csv") {
        return Err(ApiError::InvalidArgument("supported format: csv".into()));
    }

    let bundle = st.dataset.get().await?;
    ensure_known(bundle, p.year, &p.code)?;
    let rows = aggregate::filter_and_aggregate(&bundle.records, p.year, &p.code);
    let body = aggregate::render_csv(p.year, &rows);
    Ok(([(CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response())
}
