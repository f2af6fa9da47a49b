use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cms::Event;
use crate::countdown::{TimeRemaining, time_remaining};
use crate::schedule::{Occurrence, next_service, partition_events, upcoming_schedule};
use crate::service_times::{DEFAULT_HORIZON_MONTHS, SERVICE_TIMES};
use crate::web::AppState;

use super::{DataListResponse, DataResponse, json_error};

/// Wall-clock "now" in the congregation's timezone. All schedule math is
/// calendar-local; no UTC conversion happens downstream.
fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct NextServiceView {
    pub occurrence: Occurrence,
    pub countdown: TimeRemaining,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQueryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct EventsView {
    pub upcoming: Vec<Event>,
    pub past: Vec<Event>,
}

/// GET /api/schedule/next
/// The soonest upcoming service or special event, with a countdown snapshot
pub async fn get_next_service(State(state): State<AppState>) -> impl IntoResponse {
    let now = local_now();
    let events = state.cms.list_events(None);

    match next_service(SERVICE_TIMES, &events, now) {
        Some(occurrence) => {
            let countdown = time_remaining(occurrence.starts_at, now);
            Json(DataResponse {
                data: NextServiceView {
                    occurrence,
                    countdown,
                },
            })
            .into_response()
        }
        None => json_error(StatusCode::NOT_FOUND, "No upcoming services"),
    }
}

/// GET /api/schedule/upcoming
/// Merged recurring and one-off occurrences, soonest first
pub async fn get_upcoming(
    State(state): State<AppState>,
    Query(params): Query<UpcomingQueryParams>,
) -> impl IntoResponse {
    let now = local_now();
    let events = state.cms.list_events(None);

    let mut occurrences = upcoming_schedule(SERVICE_TIMES, &events, now, DEFAULT_HORIZON_MONTHS);
    if let Some(limit) = params.limit {
        occurrences.truncate(limit);
    }

    Json(DataListResponse { data: occurrences }).into_response()
}

/// GET /api/events
/// One-off events split into upcoming (ascending) and past (descending)
pub async fn list_events(State(state): State<AppState>) -> impl IntoResponse {
    let now = local_now();
    let events = state.cms.list_events(None);
    let (upcoming, past) = partition_events(&events, now);

    Json(DataResponse {
        data: EventsView { upcoming, past },
    })
    .into_response()
}

/// GET /api/events/{slug}
pub async fn get_event(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    match state.cms.get_event(&slug) {
        Some(event) => Json(DataResponse { data: event }).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Event not found"),
    }
}
