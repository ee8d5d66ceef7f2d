use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lambda_http::{http::StatusCode, Body, Error, Response};

use crate::auth::Session;
use crate::http;
use crate::store::{DocumentGateway, Record};
use crate::types::{CreateEventRequest, Event, EventPatch};

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates.
fn parse_when(value: &str) -> Option<NaiveDateTime> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.naive_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Checks that both ends parse and the event does not end before it starts.
fn validate_span(start: &str, end: &str) -> Result<(), &'static str> {
    let start = parse_when(start).ok_or("startDate is not a valid date")?;
    let end = parse_when(end).ok_or("endDate is not a valid date")?;
    if end < start {
        return Err("endDate cannot be before startDate");
    }
    Ok(())
}

fn by_start(records: &mut [Record<Event>]) {
    records.sort_by(|a, b| a.data.start_date.cmp(&b.data.start_date));
}

/// GET /events
pub async fn list_public(gateway: &DocumentGateway) -> Result<Response<Body>, Error> {
    let mut records = match gateway.get_all::<Event>().await {
        Ok(records) => records,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    records.retain(|r| !r.data.is_archived);
    by_start(&mut records);
    http::json(StatusCode::OK, &records)
}

/// GET /admin/events
pub async fn list_all(gateway: &DocumentGateway) -> Result<Response<Body>, Error> {
    let mut records = match gateway.get_all::<Event>().await {
        Ok(records) => records,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    by_start(&mut records);
    http::json(StatusCode::OK, &records)
}

/// POST /events
pub async fn create_event(
    gateway: &DocumentGateway,
    session: &Session,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateEventRequest = match http::parse_json(body) {
        Ok(req) => req,
        Err(resp) => return Ok(resp),
    };

    if req.title.trim().is_empty() {
        return Ok(http::error(StatusCode::BAD_REQUEST, "Title is required"));
    }
    if let Err(msg) = validate_span(&req.start_date, &req.end_date) {
        return Ok(http::error(StatusCode::BAD_REQUEST, msg));
    }

    let event = Event {
        title: req.title.trim().to_string(),
        description: req.description,
        date_created: chrono::Utc::now().to_rfc3339(),
        date_updated: None,
        start_date: req.start_date,
        end_date: req.end_date,
        status: req.status.unwrap_or_default(),
        is_archived: false,
    };

    let id = match gateway.put(&event, None).await {
        Ok(id) => id,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    tracing::info!(id = %id, uid = %session.identity.user_id, "event created");

    http::json(StatusCode::CREATED, &Record { id, data: event })
}

/// PATCH /events/{id}
pub async fn update_event(gateway: &DocumentGateway, id: &str, body: &[u8]) -> Result<Response<Body>, Error> {
    let mut patch: EventPatch = match http::parse_json(body) {
        Ok(patch) => patch,
        Err(resp) => return Ok(resp),
    };

    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Ok(http::error(StatusCode::BAD_REQUEST, "Title cannot be empty"));
    }

    // A one-sided date change is checked against the stored other side.
    if patch.start_date.is_some() || patch.end_date.is_some() {
        let current = match gateway.get_one::<Event>(id).await {
            Ok(Some(record)) => record.data,
            Ok(None) => return Ok(http::not_found()),
            Err(e) => return Ok(http::store_failure(&e)),
        };
        let start = patch.start_date.as_deref().unwrap_or(&current.start_date);
        let end = patch.end_date.as_deref().unwrap_or(&current.end_date);
        if let Err(msg) = validate_span(start, end) {
            return Ok(http::error(StatusCode::BAD_REQUEST, msg));
        }
    }

    patch.date_updated = Some(chrono::Utc::now().to_rfc3339());
    apply(gateway, id, &patch).await
}

/// POST /events/{id}/archive
pub async fn archive_event(gateway: &DocumentGateway, id: &str) -> Result<Response<Body>, Error> {
    let patch = EventPatch {
        is_archived: Some(true),
        date_updated: Some(chrono::Utc::now().to_rfc3339()),
        ..Default::default()
    };
    apply(gateway, id, &patch).await
}

/// DELETE /events/{id}
pub async fn delete_event(gateway: &DocumentGateway, id: &str) -> Result<Response<Body>, Error> {
    match gateway.remove::<Event>(id).await {
        Ok(()) => Ok(http::no_content()),
        Err(e) => Ok(http::store_failure(&e)),
    }
}

async fn apply(gateway: &DocumentGateway, id: &str, patch: &EventPatch) -> Result<Response<Body>, Error> {
    if let Err(e) = gateway.patch::<Event>(id, patch).await {
        return Ok(http::store_failure(&e));
    }
    match gateway.get_one::<Event>(id).await {
        Ok(Some(record)) => http::json(StatusCode::OK, &record),
        Ok(None) => Ok(http::not_found()),
        Err(e) => Ok(http::store_failure(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::types::Role;
    use serde_json::Value;

    async fn setup() -> (Harness, Session) {
        let harness = Harness::new();
        let token = harness.user("p1", Role::Pastor).await;
        let session = harness.auth.resolve(&token).await.unwrap().unwrap();
        (harness, session)
    }

    fn body(resp: &Response<Body>) -> Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    #[test]
    fn test_span_validation() {
        assert!(validate_span("2026-11-01", "2026-11-01").is_ok());
        assert!(validate_span("2026-11-01T09:00:00+08:00", "2026-11-01T12:00:00+08:00").is_ok());
        assert!(validate_span("2026-11-02", "2026-11-01").is_err());
        assert!(validate_span("next sunday", "2026-11-01").is_err());
    }

    #[tokio::test]
    async fn test_create_defaults_to_upcoming() {
        let (harness, session) = setup().await;
        let resp = create_event(
            &harness.gateway,
            &session,
            br#"{"title":"Retreat","startDate":"2026-12-01","endDate":"2026-12-03"}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body(&resp);
        assert_eq!(created["status"], "upcoming");
        assert_eq!(created["isArchived"], false);
    }

    #[tokio::test]
    async fn test_reversed_dates_rejected() {
        let (harness, session) = setup().await;
        let resp = create_event(
            &harness.gateway,
            &session,
            br#"{"title":"Retreat","startDate":"2026-12-03","endDate":"2026-12-01"}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_one_sided_date_patch_checked_against_stored_span() {
        let (harness, session) = setup().await;
        let gw = &harness.gateway;
        let resp = create_event(
            gw,
            &session,
            br#"{"title":"Retreat","startDate":"2026-12-01","endDate":"2026-12-03"}"#,
        )
        .await
        .unwrap();
        let id = body(&resp)["id"].as_str().unwrap().to_string();

        let resp = update_event(gw, &id, br#"{"endDate":"2026-11-30"}"#).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = update_event(gw, &id, br#"{"endDate":"2026-12-05","status":"ongoing"}"#)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body(&resp)["status"], "ongoing");
    }

    #[tokio::test]
    async fn test_archived_events_hidden_from_public() {
        let (harness, session) = setup().await;
        let gw = &harness.gateway;
        let resp = create_event(
            gw,
            &session,
            br#"{"title":"Fair","startDate":"2026-10-01","endDate":"2026-10-01"}"#,
        )
        .await
        .unwrap();
        let id = body(&resp)["id"].as_str().unwrap().to_string();

        archive_event(gw, &id).await.unwrap();
        let public = body(&list_public(gw).await.unwrap());
        assert!(public.as_array().unwrap().is_empty());
        let all = body(&list_all(gw).await.unwrap());
        assert_eq!(all.as_array().unwrap().len(), 1);
    }
}
