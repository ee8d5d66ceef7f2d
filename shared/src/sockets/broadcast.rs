use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::error::DisplayErrorContext;
use aws_sdk_apigatewaymanagement::operation::post_to_connection::PostToConnectionError;
use aws_sdk_apigatewaymanagement::primitives::Blob;
use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use super::connections::{remove_connection, subscriptions_for, SocketSubscription};
use super::messages::ServerMessage;
use crate::error::StoreError;
use crate::store::{matches_all, Document, DocumentGateway, Filter, Record};
use crate::types::{Announcement, Collection, Event, FinanceRecord, UserProfile};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("connection is gone")]
    Gone,

    #[error("failed to post to connection: {0}")]
    Failed(String),
}

/// Delivers a payload to one websocket connection.
#[async_trait]
pub trait SocketPublisher: Send + Sync {
    async fn post(&self, connection_id: &str, payload: &[u8]) -> Result<(), PublishError>;
}

pub struct ApiGatewayPublisher {
    client: ApiGatewayManagementClient,
}

impl ApiGatewayPublisher {
    pub fn new(client: ApiGatewayManagementClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SocketPublisher for ApiGatewayPublisher {
    async fn post(&self, connection_id: &str, payload: &[u8]) -> Result<(), PublishError> {
        let result = self
            .client
            .post_to_connection()
            .connection_id(connection_id)
            .data(Blob::new(payload.to_vec()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let gone = matches!(
                    e.as_service_error(),
                    Some(PostToConnectionError::GoneException(_))
                );
                if gone {
                    Err(PublishError::Gone)
                } else {
                    Err(PublishError::Failed(DisplayErrorContext(e).to_string()))
                }
            }
        }
    }
}

fn to_value<D: Document>(record: Record<D>) -> Result<Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::read(D::COLLECTION, e))
}

async fn typed_records<D: Document>(
    gateway: &DocumentGateway,
    filters: &[Filter],
) -> Result<Vec<Value>, StoreError> {
    gateway
        .query::<D>(filters)
        .await?
        .into_iter()
        .map(to_value)
        .collect()
}

async fn typed_record<D: Document>(
    gateway: &DocumentGateway,
    id: &str,
    filters: &[Filter],
) -> Result<Option<Value>, StoreError> {
    let Some(record) = gateway.get_one::<D>(id).await? else {
        return Ok(None);
    };
    let value = to_value(record)?;
    match &value {
        Value::Object(fields) if matches_all(filters, fields) => Ok(Some(value)),
        _ => Ok(None),
    }
}

/// Current matching records of `collection`, as they go over the wire.
pub async fn fetch_records(
    gateway: &DocumentGateway,
    collection: Collection,
    filters: &[Filter],
) -> Result<Vec<Value>, StoreError> {
    match collection {
        Collection::Announcements => typed_records::<Announcement>(gateway, filters).await,
        Collection::Events => typed_records::<Event>(gateway, filters).await,
        Collection::Finances => typed_records::<FinanceRecord>(gateway, filters).await,
        Collection::Users => typed_records::<UserProfile>(gateway, filters).await,
    }
}

/// One document, or `None` when absent or outside `filters`.
pub async fn fetch_record(
    gateway: &DocumentGateway,
    collection: Collection,
    id: &str,
    filters: &[Filter],
) -> Result<Option<Value>, StoreError> {
    match collection {
        Collection::Announcements => typed_record::<Announcement>(gateway, id, filters).await,
        Collection::Events => typed_record::<Event>(gateway, id, filters).await,
        Collection::Finances => typed_record::<FinanceRecord>(gateway, id, filters).await,
        Collection::Users => typed_record::<UserProfile>(gateway, id, filters).await,
    }
}

pub async fn snapshot(gateway: &DocumentGateway, sub: &SocketSubscription) -> Result<ServerMessage, StoreError> {
    match &sub.document_id {
        Some(id) => Ok(ServerMessage::Document {
            subscription_id: sub.subscription_id.clone(),
            collection: sub.collection,
            record: fetch_record(gateway, sub.collection, id, &sub.filters).await?,
        }),
        None => Ok(ServerMessage::Snapshot {
            subscription_id: sub.subscription_id.clone(),
            collection: sub.collection,
            records: fetch_records(gateway, sub.collection, &sub.filters).await?,
        }),
    }
}

pub async fn send<T: Serialize>(
    publisher: &dyn SocketPublisher,
    connection_id: &str,
    message: &T,
) -> Result<(), PublishError> {
    let payload = serde_json::to_vec(message).map_err(|e| PublishError::Failed(e.to_string()))?;
    publisher.post(connection_id, &payload).await
}

/// Pushes fresh state to every subscription affected by a change to
/// `collection/changed_id`. Connections that are gone are cleaned up.
/// Returns the number of messages delivered.
pub async fn publish_change(
    gateway: &DocumentGateway,
    publisher: &dyn SocketPublisher,
    collection: Collection,
    changed_id: &str,
) -> Result<usize, StoreError> {
    let subscriptions = subscriptions_for(gateway, collection).await?;
    let mut gone: HashSet<String> = HashSet::new();
    let mut delivered = 0;

    for Record { data: sub, .. } in subscriptions {
        if gone.contains(&sub.connection_id) {
            continue;
        }
        if sub.document_id.as_deref().is_some_and(|id| id != changed_id) {
            continue;
        }

        let message = match snapshot(gateway, &sub).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    connection_id = %sub.connection_id,
                    subscription_id = %sub.subscription_id,
                    error = %e,
                    "failed to build snapshot"
                );
                continue;
            }
        };

        match send(publisher, &sub.connection_id, &message).await {
            Ok(()) => delivered += 1,
            Err(PublishError::Gone) => {
                tracing::info!(connection_id = %sub.connection_id, "connection gone, removing");
                remove_connection(gateway, &sub.connection_id).await?;
                gone.insert(sub.connection_id);
            }
            Err(e) => {
                tracing::warn!(connection_id = %sub.connection_id, error = %e, "push failed");
            }
        }
    }

    tracing::info!(collection = %collection.name(), id = %changed_id, delivered, "change published");
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sockets::connections::{get_connection, save_connection, save_subscription};
    use crate::store::memory::MemoryStore;
    use crate::testing::RecordingPublisher;
    use crate::types::EventStatus;
    use std::sync::Arc;

    fn announcement(title: &str, archived: bool) -> Announcement {
        Announcement {
            title: title.to_string(),
            description: None,
            date_created: "2026-10-01T00:00:00Z".to_string(),
            date_updated: None,
            is_archived: archived,
        }
    }

    fn subscription(conn: &str, sub: &str, collection: Collection, document_id: Option<&str>) -> SocketSubscription {
        SocketSubscription {
            connection_id: conn.to_string(),
            subscription_id: sub.to_string(),
            collection,
            filters: vec![Filter::eq("isArchived", false)],
            document_id: document_id.map(str::to_string),
            created_at: "2026-10-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_applies_filters() {
        let gw = DocumentGateway::new(Arc::new(MemoryStore::new()));
        gw.put(&announcement("Open", false), Some("a1")).await.unwrap();
        gw.put(&announcement("Old", true), Some("a2")).await.unwrap();

        let sub = subscription("c1", "s1", Collection::Announcements, None);
        let ServerMessage::Snapshot { records, .. } = snapshot(&gw, &sub).await.unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "a1");

        let sub = subscription("c1", "s2", Collection::Announcements, Some("a2"));
        let ServerMessage::Document { record, .. } = snapshot(&gw, &sub).await.unwrap() else {
            panic!("expected document");
        };
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_publish_skips_other_documents_and_collections() {
        let gw = DocumentGateway::new(Arc::new(MemoryStore::new()));
        let publisher = RecordingPublisher::new();
        gw.put(&announcement("Open", false), Some("a1")).await.unwrap();

        save_subscription(&gw, &subscription("c1", "list", Collection::Announcements, None)).await.unwrap();
        save_subscription(&gw, &subscription("c1", "one", Collection::Announcements, Some("a9"))).await.unwrap();
        save_subscription(&gw, &subscription("c2", "ev", Collection::Events, None)).await.unwrap();

        let delivered = publish_change(&gw, &publisher, Collection::Announcements, "a1").await.unwrap();
        assert_eq!(delivered, 1);

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "c1");
        assert_eq!(sent[0].1["subscription_id"], "list");
        assert_eq!(sent[0].1["type"], "snapshot");
    }

    #[tokio::test]
    async fn test_gone_connection_is_cleaned_up() {
        let gw = DocumentGateway::new(Arc::new(MemoryStore::new()));
        let publisher = RecordingPublisher::new();
        publisher.mark_gone("stale");

        save_connection(&gw, "stale", None).await.unwrap();
        save_subscription(&gw, &subscription("stale", "s1", Collection::Events, None)).await.unwrap();
        save_subscription(&gw, &subscription("stale", "s2", Collection::Events, None)).await.unwrap();

        let event = Event {
            title: "Retreat".to_string(),
            description: None,
            date_created: "2026-10-01T00:00:00Z".to_string(),
            date_updated: None,
            start_date: "2026-12-01".to_string(),
            end_date: "2026-12-02".to_string(),
            status: EventStatus::Upcoming,
            is_archived: false,
        };
        gw.put(&event, Some("e1")).await.unwrap();

        let delivered = publish_change(&gw, &publisher, Collection::Events, "e1").await.unwrap();
        assert_eq!(delivered, 0);
        assert!(get_connection(&gw, "stale").await.unwrap().is_none());
        assert!(subscriptions_for(&gw, Collection::Events).await.unwrap().is_empty());
    }
}
