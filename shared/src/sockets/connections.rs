use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{Document, DocumentGateway, Filter, Record};
use crate::types::Collection;

/// Websocket connection stored in the document store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub connection_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub connected_at: String,
}

impl Document for Connection {
    const COLLECTION: &'static str = "socket_connections";
    type Patch = Self;
}

/// A live query registered by one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketSubscription {
    pub connection_id: String,
    pub subscription_id: String,
    pub collection: Collection,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub document_id: Option<String>,
    pub created_at: String,
}

impl Document for SocketSubscription {
    const COLLECTION: &'static str = "socket_subscriptions";
    type Patch = Self;
}

pub fn subscription_key(connection_id: &str, subscription_id: &str) -> String {
    format!("{}:{}", connection_id, subscription_id)
}

pub async fn save_connection(
    gateway: &DocumentGateway,
    connection_id: &str,
    user_id: Option<&str>,
) -> Result<(), StoreError> {
    let connection = Connection {
        connection_id: connection_id.to_string(),
        user_id: user_id.map(str::to_string),
        connected_at: chrono::Utc::now().to_rfc3339(),
    };
    gateway.put(&connection, Some(connection_id)).await?;

    tracing::info!(connection_id, user_id = ?user_id, "connection saved");
    Ok(())
}

pub async fn get_connection(
    gateway: &DocumentGateway,
    connection_id: &str,
) -> Result<Option<Connection>, StoreError> {
    Ok(gateway
        .get_one::<Connection>(connection_id)
        .await?
        .map(|record| record.data))
}

/// Removes a connection and every subscription it holds.
pub async fn remove_connection(gateway: &DocumentGateway, connection_id: &str) -> Result<(), StoreError> {
    let owned = gateway
        .query::<SocketSubscription>(&[Filter::eq("connectionId", connection_id)])
        .await?;
    for record in &owned {
        gateway.remove::<SocketSubscription>(&record.id).await?;
    }
    gateway.remove::<Connection>(connection_id).await?;

    tracing::info!(connection_id, subscriptions = owned.len(), "connection removed");
    Ok(())
}

pub async fn save_subscription(gateway: &DocumentGateway, subscription: &SocketSubscription) -> Result<(), StoreError> {
    let key = subscription_key(&subscription.connection_id, &subscription.subscription_id);
    gateway.put(subscription, Some(&key)).await?;
    Ok(())
}

pub async fn remove_subscription(
    gateway: &DocumentGateway,
    connection_id: &str,
    subscription_id: &str,
) -> Result<(), StoreError> {
    gateway
        .remove::<SocketSubscription>(&subscription_key(connection_id, subscription_id))
        .await
}

pub async fn subscriptions_for(
    gateway: &DocumentGateway,
    collection: Collection,
) -> Result<Vec<Record<SocketSubscription>>, StoreError> {
    gateway
        .query::<SocketSubscription>(&[Filter::eq("collection", collection.name())])
        .await
}
