use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{AmenityChange, Engine};
use crate::model::{AccommodationKind, Amenity, Hotel};

use super::accommodations::{create_with_amenities, update_with_amenities, AccommodationAttrs};
use super::{amenity_changes, paginate, parse_id, parse_search, AmenityAttrs, ApiError, AppState, Paginated};

#[derive(Debug, Serialize)]
pub(crate) struct HotelView {
    pub id: Ulid,
    pub name: String,
    pub address: Option<String>,
    pub amenities: Vec<Amenity>,
}

impl HotelView {
    fn build(engine: &Engine, hotel: Hotel) -> Self {
        let amenities = engine.amenities_by_id(&hotel.amenity_ids);
        Self {
            id: hotel.id,
            name: hotel.name,
            address: hotel.address,
            amenities,
        }
    }
}

/// One entry of `rooms_attributes`: no id creates a room, an id updates it,
/// an id with `_destroy` deletes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RoomAttrs {
    pub id: Option<String>,
    #[serde(default, rename = "_destroy")]
    pub destroy: bool,
    #[serde(flatten)]
    pub attrs: AccommodationAttrs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct HotelAttrs {
    pub name: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub amenities_attributes: Vec<AmenityAttrs>,
    #[serde(default)]
    pub rooms_attributes: Vec<RoomAttrs>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HotelBody {
    hotel: HotelAttrs,
}

fn find_hotel(engine: &Engine, raw: &str) -> Result<Hotel, ApiError> {
    let id = parse_id(raw, "Hotel")?;
    engine.get_hotel(&id).ok_or_else(|| ApiError::not_found("Hotel"))
}

async fn apply_rooms(engine: &Engine, hotel_id: Ulid, rooms: &[RoomAttrs]) -> Result<(), ApiError> {
    for room in rooms {
        let Some(raw) = room.id.as_deref() else {
            if !room.destroy {
                create_with_amenities(engine, AccommodationKind::Room, Some(hotel_id), &room.attrs).await?;
            }
            continue;
        };
        let id = parse_id(raw, "Room")?;
        let belongs = engine
            .accommodation(&id)
            .await
            .is_some_and(|a| a.kind == AccommodationKind::Room && a.hotel_id == Some(hotel_id));
        if !belongs {
            return Err(ApiError::not_found("Room"));
        }
        if room.destroy {
            engine.delete_accommodation(id).await?;
        } else {
            update_with_amenities(engine, id, &room.attrs).await?;
        }
    }
    Ok(())
}

async fn apply_nested(
    engine: &Engine,
    hotel_id: Ulid,
    amenities: &[AmenityChange],
    rooms: &[RoomAttrs],
) -> Result<(), ApiError> {
    if !amenities.is_empty() {
        engine.change_hotel_amenities(hotel_id, amenities).await?;
    }
    apply_rooms(engine, hotel_id, rooms).await
}

pub(crate) async fn index(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Paginated<HotelView>>, ApiError> {
    let (params, filter) = parse_search(&pairs)?;
    let page = paginate(state.engine.search_hotels(&filter).await, &params);
    Ok(Json(Paginated {
        data: page
            .data
            .into_iter()
            .map(|h| HotelView::build(&state.engine, h))
            .collect(),
        meta: page.meta,
    }))
}

pub(crate) async fn show(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<HotelView>, ApiError> {
    let hotel = find_hotel(&state.engine, &id)?;
    Ok(Json(HotelView::build(&state.engine, hotel)))
}

/// Create a hotel with its nested amenities and rooms. Any nested failure
/// deletes the hotel again, rooms included.
pub(crate) async fn create(
    State(state): State<AppState>,
    Json(body): Json<HotelBody>,
) -> Result<impl IntoResponse, ApiError> {
    let attrs = body.hotel;
    let changes = amenity_changes(&attrs.amenities_attributes)?;
    let engine = &state.engine;
    let id = Ulid::new();
    engine
        .create_hotel(id, attrs.name.clone().unwrap_or_default(), attrs.address.clone())
        .await?;

    if let Err(e) = apply_nested(engine, id, &changes, &attrs.rooms_attributes).await {
        warn!("hotel {id} rolled back: {e}");
        engine.delete_hotel(id).await?;
        return Err(e);
    }
    info!("hotel {id} created");
    let hotel = engine.get_hotel(&id).ok_or_else(|| ApiError::not_found("Hotel"))?;
    Ok((StatusCode::CREATED, Json(HotelView::build(engine, hotel))))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HotelBody>,
) -> Result<Json<HotelView>, ApiError> {
    let engine = &state.engine;
    let hotel = find_hotel(engine, &id)?;
    let attrs = body.hotel;
    let changes = amenity_changes(&attrs.amenities_attributes)?;
    engine.update_hotel(hotel.id, attrs.name, attrs.address).await?;
    apply_nested(engine, hotel.id, &changes, &attrs.rooms_attributes).await?;
    let hotel = engine.get_hotel(&hotel.id).ok_or_else(|| ApiError::not_found("Hotel"))?;
    Ok(Json(HotelView::build(engine, hotel)))
}

pub(crate) async fn destroy(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let hotel = find_hotel(&state.engine, &id)?;
    state.engine.delete_hotel(hotel.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
