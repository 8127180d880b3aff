//! HTTP surface: JSON over axum, mounted under `/api/v1`.

mod accommodations;
mod booking_requests;
mod bookings;
mod error;
mod hotels;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::{AmenityChange, AvailabilityFilter, Engine};
use crate::intake::BookingIntake;
use crate::limits::MAX_PER_PAGE;
use crate::model::DateRange;
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub intake: BookingIntake,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/accommodations",
            get(accommodations::index).post(accommodations::create),
        )
        .route(
            "/accommodations/:id",
            get(accommodations::show)
                .patch(accommodations::update)
                .delete(accommodations::destroy),
        )
        .route("/accommodations/:id/book", post(booking_requests::book))
        .route(
            "/accommodations/:id/bookings",
            get(bookings::index).post(bookings::create),
        )
        .route("/bookings", get(bookings::list))
        .route(
            "/bookings/:id",
            get(bookings::show).patch(bookings::update).delete(bookings::destroy),
        )
        .route("/hotels", get(hotels::index).post(hotels::create))
        .route(
            "/hotels/:id",
            get(hotels::show).patch(hotels::update).delete(hotels::destroy),
        )
        .route(
            "/hotels/:id/rooms",
            get(accommodations::room_index).post(accommodations::room_create),
        )
        .route(
            "/hotels/:id/rooms/:room_id",
            get(accommodations::room_show)
                .patch(accommodations::room_update)
                .delete(accommodations::room_destroy),
        )
        .route(
            "/apartments",
            get(accommodations::apartment_index).post(accommodations::apartment_create),
        )
        .route(
            "/apartments/:id",
            get(accommodations::apartment_show)
                .patch(accommodations::apartment_update)
                .delete(accommodations::apartment_destroy),
        )
        .route("/workflow/booking_requests", get(booking_requests::index))
        .route("/workflow/booking_requests/:id", get(booking_requests::show));

    Router::new()
        .route("/up", get(health))
        .nest("/api/v1", api)
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

// ── Shared request helpers ───────────────────────────────

/// Malformed ids cannot name a record, so they are reported as not found.
pub(crate) fn parse_id(raw: &str, entity: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::not_found(entity))
}

pub(crate) fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::invalid(format!("{field} is not a valid date (expected YYYY-MM-DD)")))
}

/// One entry of `amenities_attributes`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AmenityAttrs {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default, rename = "_destroy")]
    pub destroy: bool,
}

pub(crate) fn amenity_changes(attrs: &[AmenityAttrs]) -> Result<Vec<AmenityChange>, ApiError> {
    attrs
        .iter()
        .map(|a| {
            let id = a.id.as_deref().map(|raw| parse_id(raw, "Amenity")).transpose()?;
            Ok(AmenityChange {
                id,
                name: a.name.clone(),
                destroy: a.destroy,
            })
        })
        .collect()
}

// ── Pagination ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PageParams {
    pub page: Option<String>,
    pub per_page: Option<String>,
}

impl PageParams {
    fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|p| p.parse().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1)
    }

    fn per_page(&self) -> usize {
        self.per_page
            .as_deref()
            .and_then(|p| p.parse().ok())
            .filter(|p| *p > 0)
            .unwrap_or(10)
            .min(MAX_PER_PAGE)
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct PageMeta {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

pub(crate) fn paginate<T>(items: Vec<T>, params: &PageParams) -> Paginated<T> {
    let page = params.page();
    let per_page = params.per_page();
    let total_count = items.len();
    let data = items
        .into_iter()
        .skip((page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();
    Paginated {
        data,
        meta: PageMeta {
            current_page: page,
            total_pages: total_count.div_ceil(per_page),
            total_count,
        },
    }
}

/// Query string of the hotel and apartment listings. Amenities may be given
/// as repeated `amenities[]` keys or as one comma-separated `amenities` value.
pub(crate) fn parse_search(pairs: &[(String, String)]) -> Result<(PageParams, AvailabilityFilter), ApiError> {
    let mut page = PageParams::default();
    let mut start = None;
    let mut end = None;
    let mut amenities = Vec::new();
    for (key, value) in pairs {
        match key.as_str() {
            "page" => page.page = Some(value.clone()),
            "per_page" => page.per_page = Some(value.clone()),
            "start_date" if !value.trim().is_empty() => start = Some(parse_date(value, "start_date")?),
            "end_date" if !value.trim().is_empty() => end = Some(parse_date(value, "end_date")?),
            "amenities[]" | "amenities" => amenities.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    let range = match (start, end) {
        (Some(start), Some(end)) if start > end => {
            return Err(ApiError::invalid("start_date must be on or before end_date"));
        }
        (Some(start), Some(end)) => Some(DateRange::new(start, end)),
        _ => None,
    };
    Ok((page, AvailabilityFilter { range, amenities }))
}
