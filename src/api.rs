//! HTTP API handlers for Herdwatch.
//!
//! Every cattle route is nested under `/farms/{farm_id}`; an animal that
//! exists but belongs to another farm is reported exactly like a missing one.
//!
//! Handlers validate input before touching the store and return
//! [`AppError`] for anything that should not be a success response.

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use chrono::Utc;
use tracing::{info, instrument};

use crate::aggregation::{HealthAggregator, reconcile};
use crate::cache::CachedPrediction;
use crate::error::{AppError, AppResult};
use crate::model::{
    Animal, AnimalDetail, AnimalSummary, CattleListResponse, CreateAnimalRequest,
    CreateFarmRequest, Farm, FarmAggregate, FieldError, ReadingRequest, ReadingsQuery,
    ReadingsResponse, RecordedReading, SortOrder, StatsResponse, UpdateAnimalRequest,
};
use crate::storage::Storage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub aggregator: HealthAggregator,
}

impl AppState {
    pub fn new(aggregator: HealthAggregator) -> Self {
        Self {
            storage: aggregator.storage().clone(),
            aggregator,
        }
    }
}

/// JSON body extractor that reports malformed input as a validation error.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// Query string extractor that reports malformed input as a validation error.
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct QueryParams<T>(pub T);

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/farms", post(create_farm))
        .route("/farms/:farm_id", get(get_farm))
        .route("/farms/:farm_id/reconcile", post(reconcile_farm))
        .route("/farms/:farm_id/cattle", get(list_cattle).post(create_cattle))
        .route("/farms/:farm_id/cattle/stats", get(get_cattle_stats))
        .route(
            "/farms/:farm_id/cattle/:id",
            get(get_cattle).patch(update_cattle).delete(delete_cattle),
        )
        .route(
            "/farms/:farm_id/cattle/:id/readings",
            get(get_readings).post(add_reading),
        )
        .route("/farms/:farm_id/cattle/:id/reset-health", patch(reset_health))
        .route("/farms/:farm_id/cattle/:id/prediction", get(get_prediction))
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// POST /farms - Register a farm.
///
/// # Request Body
///
/// ```json
/// { "farm_id": "FARM01", "name": "Hillside" }
/// ```
///
/// # Response
///
/// `201 Created` with the farm and zeroed counts, `409 Conflict` if the id
/// is taken.
#[instrument(skip(state, request))]
pub async fn create_farm(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CreateFarmRequest>,
) -> AppResult<(StatusCode, Json<Farm>)> {
    let (farm_id, name) = request.validate().map_err(AppError::Validation)?;

    let farm = state.storage.create_farm(&farm_id, &name, Utc::now()).await?;
    info!(farm_id = %farm.farm_id, "Farm registered");

    Ok((StatusCode::CREATED, Json(farm)))
}

/// GET /farms/{farm_id} - A farm with its healthy/at-risk counts.
#[instrument(skip(state))]
pub async fn get_farm(
    State(state): State<AppState>,
    Path(farm_id): Path<String>,
) -> AppResult<Json<Farm>> {
    Ok(Json(require_farm(&state.storage, &farm_id).await?))
}

/// POST /farms/{farm_id}/reconcile - Recompute the farm's counts.
#[instrument(skip(state))]
pub async fn reconcile_farm(
    State(state): State<AppState>,
    Path(farm_id): Path<String>,
) -> AppResult<Json<FarmAggregate>> {
    Ok(Json(reconcile(&state.storage, &farm_id).await?))
}

/// GET /farms/{farm_id}/cattle - All cattle of a farm, without readings.
#[instrument(skip(state))]
pub async fn list_cattle(
    State(state): State<AppState>,
    Path(farm_id): Path<String>,
) -> AppResult<Json<CattleListResponse>> {
    require_farm(&state.storage, &farm_id).await?;

    let cattle = state.storage.list_animals(&farm_id).await?;
    Ok(Json(CattleListResponse {
        results: cattle.len(),
        cattle,
    }))
}

/// POST /farms/{farm_id}/cattle - Register a cattle record.
///
/// # Request Body
///
/// ```json
/// {
///     "tag_id": "T-104",
///     "location": "North pasture",
///     "name": "Daisy",
///     "health_readings": [
///         { "body_temperature": 38.6, "heart_rate": 72, "sleeping_duration": 8, "lying_down_duration": 6 }
///     ]
/// }
/// ```
///
/// `health_readings` is optional; each supplied reading is classified and
/// counted towards the initial status.
#[instrument(skip(state, request))]
pub async fn create_cattle(
    State(state): State<AppState>,
    Path(farm_id): Path<String>,
    JsonBody(request): JsonBody<CreateAnimalRequest>,
) -> AppResult<(StatusCode, Json<Animal>)> {
    if let Some(body_farm) = request.farm_id.as_deref()
        && body_farm != farm_id
    {
        return Err(AppError::Forbidden(
            "You can only create cattle for your own farm".to_string(),
        ));
    }

    let (animal, readings) = request.validate().map_err(AppError::Validation)?;
    let created = state
        .aggregator
        .register_animal(&farm_id, animal, &readings)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /farms/{farm_id}/cattle/stats - Average vitals per animal.
#[instrument(skip(state))]
pub async fn get_cattle_stats(
    State(state): State<AppState>,
    Path(farm_id): Path<String>,
) -> AppResult<Json<StatsResponse>> {
    require_farm(&state.storage, &farm_id).await?;

    let stats = state.storage.animal_stats(&farm_id).await?;
    let message = stats
        .is_empty()
        .then(|| "No cattle found for this farm".to_string());

    Ok(Json(StatsResponse { stats, message }))
}

/// GET /farms/{farm_id}/cattle/{id} - One animal with its full history.
#[instrument(skip(state))]
pub async fn get_cattle(
    State(state): State<AppState>,
    Path((farm_id, id)): Path<(String, i64)>,
) -> AppResult<Json<AnimalDetail>> {
    let animal = require_animal(&state.storage, &farm_id, id).await?;
    let health_readings = state
        .storage
        .list_readings(animal.id, SortOrder::Asc, None)
        .await?;

    Ok(Json(AnimalDetail {
        animal,
        health_readings,
    }))
}

/// PATCH /farms/{farm_id}/cattle/{id} - Edit location or name.
#[instrument(skip(state, request))]
pub async fn update_cattle(
    State(state): State<AppState>,
    Path((farm_id, id)): Path<(String, i64)>,
    JsonBody(request): JsonBody<UpdateAnimalRequest>,
) -> AppResult<Json<Animal>> {
    request.validate().map_err(AppError::Validation)?;

    state
        .storage
        .update_animal_details(&farm_id, id, &request)
        .await?
        .map(Json)
        .ok_or_else(|| animal_not_found(id))
}

/// DELETE /farms/{farm_id}/cattle/{id} - Remove an animal and its readings.
#[instrument(skip(state))]
pub async fn delete_cattle(
    State(state): State<AppState>,
    Path((farm_id, id)): Path<(String, i64)>,
) -> AppResult<StatusCode> {
    state.aggregator.remove_animal(&farm_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /farms/{farm_id}/cattle/{id}/readings - Reading history.
///
/// # Query Parameters
///
/// - `limit` (optional): Maximum number of readings, must be positive
/// - `order` (optional): `asc` or `desc` by recorded time (default: `desc`)
#[instrument(skip(state))]
pub async fn get_readings(
    State(state): State<AppState>,
    Path((farm_id, id)): Path<(String, i64)>,
    QueryParams(query): QueryParams<ReadingsQuery>,
) -> AppResult<Json<ReadingsResponse>> {
    if let Some(limit) = query.limit
        && limit <= 0
    {
        return Err(AppError::Validation(vec![FieldError::new(
            "limit",
            "must be a positive integer",
        )]));
    }

    let animal = require_animal(&state.storage, &farm_id, id).await?;
    let readings = state
        .storage
        .list_readings(animal.id, query.order, query.limit)
        .await?;

    Ok(Json(ReadingsResponse {
        results: readings.len(),
        readings,
    }))
}

/// POST /farms/{farm_id}/cattle/{id}/readings - Classify and record a reading.
///
/// # Request Body
///
/// ```json
/// { "body_temperature": 39.8, "heart_rate": 92, "sleeping_duration": 4, "lying_down_duration": 2 }
/// ```
///
/// # Response
///
/// `200 OK` with the stored reading and the animal's new counters. A
/// classifier outage does not fail the request.
#[instrument(skip(state, request))]
pub async fn add_reading(
    State(state): State<AppState>,
    Path((farm_id, id)): Path<(String, i64)>,
    JsonBody(request): JsonBody<ReadingRequest>,
) -> AppResult<Json<RecordedReading>> {
    let vitals = request.validate("").map_err(AppError::Validation)?;

    let recorded = state
        .aggregator
        .classify_and_record(&farm_id, id, vitals)
        .await?;

    Ok(Json(recorded))
}

/// PATCH /farms/{farm_id}/cattle/{id}/reset-health - Zero the counters.
#[instrument(skip(state))]
pub async fn reset_health(
    State(state): State<AppState>,
    Path((farm_id, id)): Path<(String, i64)>,
) -> AppResult<Json<AnimalSummary>> {
    Ok(Json(state.aggregator.reset(&farm_id, id).await?))
}

/// GET /farms/{farm_id}/cattle/{id}/prediction - Latest cached prediction.
///
/// The cache is bounded, so a missing entry does not mean the animal has
/// never been classified.
#[instrument(skip(state))]
pub async fn get_prediction(
    State(state): State<AppState>,
    Path((farm_id, id)): Path<(String, i64)>,
) -> AppResult<Json<CachedPrediction>> {
    let animal = require_animal(&state.storage, &farm_id, id).await?;

    state
        .aggregator
        .cache()
        .get(animal.id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No cached prediction for cattle {id}")))
}

async fn require_farm(storage: &Storage, farm_id: &str) -> AppResult<Farm> {
    storage
        .get_farm(farm_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No farm found with id '{farm_id}'")))
}

async fn require_animal(storage: &Storage, farm_id: &str, id: i64) -> AppResult<Animal> {
    storage
        .find_animal(farm_id, id)
        .await?
        .ok_or_else(|| animal_not_found(id))
}

fn animal_not_found(id: i64) -> AppError {
    AppError::NotFound(format!("No cattle found with id {id} in this farm"))
}
