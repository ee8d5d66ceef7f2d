use lambda_http::{http::StatusCode, Body, Error, Response};

use crate::auth::Session;
use crate::http;
use crate::store::{DocumentGateway, Record};
use crate::types::{Announcement, AnnouncementPatch, CreateAnnouncementRequest};

fn newest_first(records: &mut [Record<Announcement>]) {
    records.sort_by(|a, b| b.data.date_created.cmp(&a.data.date_created));
}

/// GET /announcements - public, archived items hidden
pub async fn list_public(gateway: &DocumentGateway) -> Result<Response<Body>, Error> {
    let mut records = match gateway.get_all::<Announcement>().await {
        Ok(records) => records,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    records.retain(|r| !r.data.is_archived);
    newest_first(&mut records);
    http::json(StatusCode::OK, &records)
}

/// GET /admin/announcements - everything, archived included
pub async fn list_all(gateway: &DocumentGateway) -> Result<Response<Body>, Error> {
    let mut records = match gateway.get_all::<Announcement>().await {
        Ok(records) => records,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    newest_first(&mut records);
    http::json(StatusCode::OK, &records)
}

/// POST /announcements
pub async fn create_announcement(
    gateway: &DocumentGateway,
    session: &Session,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateAnnouncementRequest = match http::parse_json(body) {
        Ok(req) => req,
        Err(resp) => return Ok(resp),
    };

    if req.title.trim().is_empty() {
        return Ok(http::error(StatusCode::BAD_REQUEST, "Title is required"));
    }

    let announcement = Announcement {
        title: req.title.trim().to_string(),
        description: req.description,
        date_created: chrono::Utc::now().to_rfc3339(),
        date_updated: None,
        is_archived: false,
    };

    let id = match gateway.put(&announcement, None).await {
        Ok(id) => id,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    tracing::info!(id = %id, uid = %session.identity.user_id, "announcement created");

    http::json(StatusCode::CREATED, &Record { id, data: announcement })
}

/// PATCH /announcements/{id}
pub async fn update_announcement(
    gateway: &DocumentGateway,
    id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let mut patch: AnnouncementPatch = match http::parse_json(body) {
        Ok(patch) => patch,
        Err(resp) => return Ok(resp),
    };

    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Ok(http::error(StatusCode::BAD_REQUEST, "Title cannot be empty"));
    }
    patch.date_updated = Some(chrono::Utc::now().to_rfc3339());

    apply(gateway, id, &patch).await
}

/// POST /announcements/{id}/archive
pub async fn archive_announcement(gateway: &DocumentGateway, id: &str) -> Result<Response<Body>, Error> {
    let patch = AnnouncementPatch {
        is_archived: Some(true),
        date_updated: Some(chrono::Utc::now().to_rfc3339()),
        ..Default::default()
    };
    apply(gateway, id, &patch).await
}

/// DELETE /announcements/{id}
pub async fn delete_announcement(gateway: &DocumentGateway, id: &str) -> Result<Response<Body>, Error> {
    match gateway.remove::<Announcement>(id).await {
        Ok(()) => Ok(http::no_content()),
        Err(e) => Ok(http::store_failure(&e)),
    }
}

async fn apply(gateway: &DocumentGateway, id: &str, patch: &AnnouncementPatch) -> Result<Response<Body>, Error> {
    if let Err(e) = gateway.patch::<Announcement>(id, patch).await {
        return Ok(http::store_failure(&e));
    }
    match gateway.get_one::<Announcement>(id).await {
        Ok(Some(record)) => http::json(StatusCode::OK, &record),
        Ok(None) => Ok(http::not_found()),
        Err(e) => Ok(http::store_failure(&e)),
    }
}
