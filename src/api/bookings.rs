//! Direct booking CRUD. These endpoints commit synchronously and bypass the
//! request workflow; an overlap is answered with 409.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::BookingPatch;
use crate::model::Booking;

use super::{paginate, parse_date, parse_id, ApiError, AppState, PageParams, Paginated};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BookingAttrs {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub guest_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BookingBody {
    booking: BookingAttrs,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl BookingAttrs {
    /// Collects every problem at once, the way record validation reports them.
    fn to_patch(&self, require_all: bool) -> Result<BookingPatch, ApiError> {
        let mut errors = Vec::new();
        let mut date = |field: &str, value: &Option<String>| match present(value) {
            Some(raw) => match parse_date(raw, field) {
                Ok(d) => Some(d),
                Err(ApiError::Invalid(mut e)) => {
                    errors.append(&mut e);
                    None
                }
                Err(_) => None,
            },
            None => {
                if require_all {
                    errors.push(format!("{field} can't be blank"));
                }
                None
            }
        };
        let start_date = date("start_date", &self.start_date);
        let end_date = date("end_date", &self.end_date);
        if require_all && present(&self.guest_name).is_none() {
            errors.push("guest_name can't be blank".to_string());
        }
        if !errors.is_empty() {
            return Err(ApiError::Invalid(errors));
        }
        Ok(BookingPatch {
            start_date,
            end_date,
            guest_name: self.guest_name.clone(),
        })
    }
}

fn find_booking_id(raw: &str) -> Result<Ulid, ApiError> {
    parse_id(raw, "Booking")
}

pub(crate) async fn index(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Booking>>, ApiError> {
    let accommodation_id = parse_id(&id, "Accommodation")?;
    let bookings = state.engine.bookings_for(accommodation_id).await?;
    Ok(Json(paginate(bookings, &params)))
}

pub(crate) async fn list(State(state): State<AppState>, Query(params): Query<PageParams>) -> Json<Paginated<Booking>> {
    Json(paginate(state.engine.list_bookings().await, &params))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BookingBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let accommodation_id = parse_id(&id, "Accommodation")?;
    if state.engine.accommodation(&accommodation_id).await.is_none() {
        return Err(ApiError::not_found("Accommodation"));
    }
    let Json(body) = body?;
    let patch = body.booking.to_patch(true)?;
    let (Some(start), Some(end), Some(guest_name)) = (patch.start_date, patch.end_date, patch.guest_name) else {
        return Err(ApiError::invalid("booking is incomplete"));
    };
    let booking = state
        .engine
        .confirm_booking(Ulid::new(), accommodation_id, start, end, guest_name)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub(crate) async fn show(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Booking>, ApiError> {
    let id = find_booking_id(&id)?;
    state
        .engine
        .get_booking(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Booking"))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BookingBody>,
) -> Result<Json<Booking>, ApiError> {
    let id = find_booking_id(&id)?;
    let patch = body.booking.to_patch(false)?;
    Ok(Json(state.engine.update_booking(id, patch).await?))
}

pub(crate) async fn destroy(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let id = find_booking_id(&id)?;
    state.engine.cancel_booking(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
