//! Booking intake and the read side of the request workflow.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use crate::model::{BookingParams, BookingRequest};

use super::{paginate, parse_id, ApiError, AppState, PageParams, Paginated};

/// Body of `POST /accommodations/:id/book`. Keys other than these are
/// dropped before the request is stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BookingIntent {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub guest_name: Option<String>,
}

impl BookingIntent {
    fn into_params(self) -> BookingParams {
        [
            ("start_date", self.start_date),
            ("end_date", self.end_date),
            ("guest_name", self.guest_name),
        ]
        .into_iter()
        .filter_map(|(key, value)| Some((key.to_string(), value?)))
        .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RequestQuery {
    #[serde(flatten)]
    page: PageParams,
    status: Option<String>,
    accommodation_id: Option<String>,
}

pub(crate) async fn book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BookingIntent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // An unknown accommodation is reported before anything about the body.
    let accommodation_id = Ulid::from_string(&id).map_err(|_| ApiError::NotFoundEmpty)?;
    if state.engine.accommodation(&accommodation_id).await.is_none() {
        return Err(ApiError::NotFoundEmpty);
    }
    let Json(intent) = body?;
    let request_id = state
        .intake
        .request_booking(accommodation_id, intent.into_params())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Booking request created",
            "booking_request_id": request_id,
        })),
    ))
}

pub(crate) async fn index(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
) -> Json<Paginated<BookingRequest>> {
    let requests = state
        .engine
        .list_booking_requests()
        .await
        .into_iter()
        .filter(|r| query.status.as_deref().is_none_or(|s| r.status.as_str() == s))
        .filter(|r| {
            query
                .accommodation_id
                .as_deref()
                .is_none_or(|a| r.accommodation_id.to_string() == a)
        })
        .collect();
    Json(paginate(requests, &query.page))
}

pub(crate) async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookingRequest>, ApiError> {
    let id = parse_id(&id, "Booking request")?;
    state
        .engine
        .booking_request(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Booking request"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_keeps_only_present_fields() {
        let intent = BookingIntent {
            start_date: Some("2025-09-10".into()),
            end_date: None,
            guest_name: Some("John Doe".into()),
        };
        let params = intent.into_params();
        assert_eq!(params.len(), 2);
        assert_eq!(params["guest_name"], "John Doe");
        assert!(!params.contains_key("end_date"));
    }

    #[test]
    fn unknown_body_keys_are_ignored() {
        let intent: BookingIntent =
            serde_json::from_str(r#"{"start_date":"2025-09-10","admin":true,"end_date":"2025-09-12"}"#).unwrap();
        assert_eq!(intent.into_params().len(), 2);
    }
}
