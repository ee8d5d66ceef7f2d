use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Filter;
use crate::types::Collection;

/// Incoming websocket message from a client
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        subscription_id: String,
        collection: String,
        #[serde(default)]
        filters: Vec<Filter>,
        #[serde(default)]
        document_id: Option<String>,
    },
    Unsubscribe {
        subscription_id: String,
    },
}

/// Pushed to a client. Always the full current state, never a diff.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot {
        subscription_id: String,
        collection: Collection,
        records: Vec<Value>,
    },
    Document {
        subscription_id: String,
        collection: Collection,
        record: Option<Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_message_parses() {
        let raw = json!({
            "action": "subscribe",
            "subscription_id": "s1",
            "collection": "events",
            "filters": [{"field": "status", "op": "==", "value": "upcoming"}]
        });
        let ClientMessage::Subscribe { subscription_id, collection, filters, document_id } =
            serde_json::from_value(raw).unwrap()
        else {
            panic!("expected subscribe");
        };
        assert_eq!(subscription_id, "s1");
        assert_eq!(collection, "events");
        assert_eq!(filters, vec![Filter::eq("status", "upcoming")]);
        assert!(document_id.is_none());
    }

    #[test]
    fn test_document_push_shape() {
        let msg = ServerMessage::Document {
            subscription_id: "s1".into(),
            collection: Collection::Announcements,
            record: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "document", "subscription_id": "s1", "collection": "announcements", "record": null})
        );
    }
}
