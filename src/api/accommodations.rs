//! Accommodation, apartment and room endpoints. All three are rows of the
//! same accommodation store, scoped by kind (and, for rooms, by hotel).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, NewAccommodation};
use crate::model::{Accommodation, AccommodationDetails, AccommodationKind, Amenity, DetailsPatch};

use super::{amenity_changes, paginate, parse_id, parse_search, AmenityAttrs, ApiError, AppState, PageParams, Paginated};

#[derive(Debug, Serialize)]
pub(crate) struct AccommodationView {
    pub id: Ulid,
    pub kind: AccommodationKind,
    pub hotel_id: Option<Ulid>,
    #[serde(flatten)]
    pub details: AccommodationDetails,
    pub amenities: Vec<Amenity>,
}

impl AccommodationView {
    pub(crate) fn build(engine: &Engine, accommodation: Accommodation) -> Self {
        let amenities = engine.amenities_by_id(&accommodation.amenity_ids);
        Self {
            id: accommodation.id,
            kind: accommodation.kind,
            hotel_id: accommodation.hotel_id,
            details: accommodation.details,
            amenities,
        }
    }
}

/// Writable accommodation attributes. Every field is optional so the same
/// shape serves create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AccommodationAttrs {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub address: Option<String>,
    #[serde(default)]
    pub amenities_attributes: Vec<AmenityAttrs>,
}

impl AccommodationAttrs {
    fn patch(&self) -> DetailsPatch {
        DetailsPatch {
            name: self.name.clone(),
            description: self.description.clone(),
            price_cents: self.price_cents,
            location: self.location.clone(),
            capacity: self.capacity,
            address: self.address.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccommodationBody {
    accommodation: AccommodationAttrs,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApartmentBody {
    apartment: AccommodationAttrs,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoomBody {
    room: AccommodationAttrs,
}

// ── Shared operations ────────────────────────────────────

/// Create an accommodation and link its amenities. A failed amenity change
/// removes the half-built record again.
pub(crate) async fn create_with_amenities(
    engine: &Engine,
    kind: AccommodationKind,
    hotel_id: Option<Ulid>,
    attrs: &AccommodationAttrs,
) -> Result<Accommodation, ApiError> {
    let changes = amenity_changes(&attrs.amenities_attributes)?;
    let id = Ulid::new();
    let created = engine
        .create_accommodation(
            id,
            NewAccommodation {
                kind,
                hotel_id,
                details: attrs.patch().into_details(),
            },
        )
        .await?;
    if changes.is_empty() {
        info!("{} {id} created", kind.as_str());
        return Ok(created);
    }
    match engine.change_accommodation_amenities(id, &changes).await {
        Ok(accommodation) => {
            info!("{} {id} created", kind.as_str());
            Ok(accommodation)
        }
        Err(e) => {
            engine.delete_accommodation(id).await?;
            Err(e.into())
        }
    }
}

pub(crate) async fn update_with_amenities(
    engine: &Engine,
    id: Ulid,
    attrs: &AccommodationAttrs,
) -> Result<Accommodation, ApiError> {
    let changes = amenity_changes(&attrs.amenities_attributes)?;
    let updated = engine.update_accommodation(id, &attrs.patch()).await?;
    if changes.is_empty() {
        return Ok(updated);
    }
    Ok(engine.change_accommodation_amenities(id, &changes).await?)
}

/// Look up an accommodation inside a scope. Anything outside the scope is
/// reported as missing.
async fn scoped(
    engine: &Engine,
    raw_id: &str,
    kind: Option<AccommodationKind>,
    hotel_id: Option<Ulid>,
    entity: &str,
) -> Result<Accommodation, ApiError> {
    let id = parse_id(raw_id, entity)?;
    engine
        .accommodation(&id)
        .await
        .filter(|a| kind.is_none_or(|k| a.kind == k))
        .filter(|a| hotel_id.is_none() || a.hotel_id == hotel_id)
        .ok_or_else(|| ApiError::not_found(entity))
}

fn page_of(engine: &Engine, items: Vec<Accommodation>, params: &PageParams) -> Paginated<AccommodationView> {
    let page = paginate(items, params);
    Paginated {
        data: page
            .data
            .into_iter()
            .map(|a| AccommodationView::build(engine, a))
            .collect(),
        meta: page.meta,
    }
}

fn hotel_id(engine: &Engine, raw: &str) -> Result<Ulid, ApiError> {
    let id = parse_id(raw, "Hotel")?;
    if !engine.hotel_exists(&id) {
        return Err(ApiError::not_found("Hotel"));
    }
    Ok(id)
}

// ── /accommodations ──────────────────────────────────────

pub(crate) async fn index(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Json<Paginated<AccommodationView>> {
    let all = state.engine.list_accommodations(None).await;
    Json(page_of(&state.engine, all, &params))
}

pub(crate) async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccommodationView>, ApiError> {
    let accommodation = scoped(&state.engine, &id, None, None, "Accommodation").await?;
    Ok(Json(AccommodationView::build(&state.engine, accommodation)))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Json(body): Json<AccommodationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let created =
        create_with_amenities(&state.engine, AccommodationKind::Accommodation, None, &body.accommodation).await?;
    Ok((StatusCode::CREATED, Json(AccommodationView::build(&state.engine, created))))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AccommodationBody>,
) -> Result<Json<AccommodationView>, ApiError> {
    let current = scoped(&state.engine, &id, None, None, "Accommodation").await?;
    let updated = update_with_amenities(&state.engine, current.id, &body.accommodation).await?;
    Ok(Json(AccommodationView::build(&state.engine, updated)))
}

pub(crate) async fn destroy(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let current = scoped(&state.engine, &id, None, None, "Accommodation").await?;
    state.engine.delete_accommodation(current.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── /apartments ──────────────────────────────────────────

pub(crate) async fn apartment_index(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Paginated<AccommodationView>>, ApiError> {
    let (params, filter) = parse_search(&pairs)?;
    let found = state.engine.search_apartments(&filter).await;
    Ok(Json(page_of(&state.engine, found, &params)))
}

pub(crate) async fn apartment_show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccommodationView>, ApiError> {
    let apartment = scoped(&state.engine, &id, Some(AccommodationKind::Apartment), None, "Apartment").await?;
    Ok(Json(AccommodationView::build(&state.engine, apartment)))
}

pub(crate) async fn apartment_create(
    State(state): State<AppState>,
    Json(body): Json<ApartmentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let created = create_with_amenities(&state.engine, AccommodationKind::Apartment, None, &body.apartment).await?;
    Ok((StatusCode::CREATED, Json(AccommodationView::build(&state.engine, created))))
}

pub(crate) async fn apartment_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApartmentBody>,
) -> Result<Json<AccommodationView>, ApiError> {
    let current = scoped(&state.engine, &id, Some(AccommodationKind::Apartment), None, "Apartment").await?;
    let updated = update_with_amenities(&state.engine, current.id, &body.apartment).await?;
    Ok(Json(AccommodationView::build(&state.engine, updated)))
}

pub(crate) async fn apartment_destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let current = scoped(&state.engine, &id, Some(AccommodationKind::Apartment), None, "Apartment").await?;
    state.engine.delete_accommodation(current.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── /hotels/:id/rooms ────────────────────────────────────

pub(crate) async fn room_index(
    State(state): State<AppState>,
    Path(hotel): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<AccommodationView>>, ApiError> {
    let hotel_id = hotel_id(&state.engine, &hotel)?;
    let rooms = state.engine.list_rooms(hotel_id).await?;
    Ok(Json(page_of(&state.engine, rooms, &params)))
}

pub(crate) async fn room_show(
    State(state): State<AppState>,
    Path((hotel, room)): Path<(String, String)>,
) -> Result<Json<AccommodationView>, ApiError> {
    let hotel_id = hotel_id(&state.engine, &hotel)?;
    let room = scoped(&state.engine, &room, Some(AccommodationKind::Room), Some(hotel_id), "Room").await?;
    Ok(Json(AccommodationView::build(&state.engine, room)))
}

pub(crate) async fn room_create(
    State(state): State<AppState>,
    Path(hotel): Path<String>,
    Json(body): Json<RoomBody>,
) -> Result<impl IntoResponse, ApiError> {
    let hotel_id = hotel_id(&state.engine, &hotel)?;
    let created = create_with_amenities(&state.engine, AccommodationKind::Room, Some(hotel_id), &body.room).await?;
    Ok((StatusCode::CREATED, Json(AccommodationView::build(&state.engine, created))))
}

pub(crate) async fn room_update(
    State(state): State<AppState>,
    Path((hotel, room)): Path<(String, String)>,
    Json(body): Json<RoomBody>,
) -> Result<Json<AccommodationView>, ApiError> {
    let hotel_id = hotel_id(&state.engine, &hotel)?;
    let current = scoped(&state.engine, &room, Some(AccommodationKind::Room), Some(hotel_id), "Room").await?;
    let updated = update_with_amenities(&state.engine, current.id, &body.room).await?;
    Ok(Json(AccommodationView::build(&state.engine, updated)))
}

pub(crate) async fn room_destroy(
    State(state): State<AppState>,
    Path((hotel, room)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let hotel_id = hotel_id(&state.engine, &hotel)?;
    let current = scoped(&state.engine, &room, Some(AccommodationKind::Room), Some(hotel_id), "Room").await?;
    state.engine.delete_accommodation(current.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
