//! Read-only feed of public announcements and events for the chatbot
//! knowledge base.

use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

use crate::error::FeedAggregationError;
use crate::http;
use crate::store::{DocumentGateway, Record};
use crate::types::{Announcement, Event, EventStatus};

pub const FEED_SOURCE: &str = "gimong-chatbase-feed";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedAnnouncement {
    pub id: String,
    pub title: String,
    pub content: String,
    pub date_created: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub id: String,
    pub name: String,
    pub description: String,
    pub start_date: String,
    pub end_date: String,
    pub status: EventStatus,
}

#[derive(Debug, Serialize)]
pub struct Feed {
    pub source: &'static str,
    pub timestamp: String,
    pub announcements: Vec<FeedAnnouncement>,
    pub events: Vec<FeedEvent>,
}

impl From<Record<Announcement>> for FeedAnnouncement {
    fn from(record: Record<Announcement>) -> Self {
        Self {
            id: record.id,
            title: record.data.title,
            content: record.data.description.unwrap_or_default(),
            date_created: record.data.date_created,
        }
    }
}

impl From<Record<Event>> for FeedEvent {
    fn from(record: Record<Event>) -> Self {
        Self {
            id: record.id,
            name: record.data.title,
            description: record.data.description.unwrap_or_default(),
            start_date: record.data.start_date,
            end_date: record.data.end_date,
            status: record.data.status,
        }
    }
}

/// Both collections are read concurrently; either failing fails the whole
/// feed.
pub async fn aggregate(gateway: &DocumentGateway) -> Result<Feed, FeedAggregationError> {
    let (announcements, events) = tokio::try_join!(
        gateway.get_all::<Announcement>(),
        gateway.get_all::<Event>(),
    )?;

    let mut announcements: Vec<FeedAnnouncement> = announcements
        .into_iter()
        .filter(|r| !r.data.is_archived)
        .map(FeedAnnouncement::from)
        .collect();
    announcements.sort_by(|a, b| b.date_created.cmp(&a.date_created));

    let mut events: Vec<FeedEvent> = events
        .into_iter()
        .filter(|r| !r.data.is_archived)
        .map(FeedEvent::from)
        .collect();
    events.sort_by(|a, b| a.start_date.cmp(&b.start_date));

    Ok(Feed {
        source: FEED_SOURCE,
        timestamp: chrono::Utc::now().to_rfc3339(),
        announcements,
        events,
    })
}

/// GET /feed
pub async fn feed(gateway: &DocumentGateway) -> Result<Response<Body>, Error> {
    match aggregate(gateway).await {
        Ok(feed) => {
            tracing::info!(
                announcements = feed.announcements.len(),
                events = feed.events.len(),
                "feed served"
            );
            http::json(StatusCode::OK, &feed)
        }
        Err(e) => {
            tracing::error!(error = %e, "feed aggregation failed");
            Ok(http::error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to build feed"))
        }
    }
}
