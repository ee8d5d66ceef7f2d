use aws_lambda_events::event::dynamodb::{Event, EventRecord};
use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use gimong_shared::config::StreamConfig;
use gimong_shared::sockets::broadcast::{publish_change, ApiGatewayPublisher};
use gimong_shared::store::dynamo::DynamoStore;
use gimong_shared::store::DocumentGateway;
use gimong_shared::types::Collection;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;

struct StreamState {
    gateway: DocumentGateway,
    publisher: ApiGatewayPublisher,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = StreamConfig::from_env()?;

    let aws = aws_config::load_from_env().await;
    let api_config = aws_sdk_apigatewaymanagement::config::Builder::from(&aws)
        .endpoint_url(&config.ws_endpoint)
        .build();

    let state = Arc::new(StreamState {
        gateway: DocumentGateway::new(Arc::new(DynamoStore::new(
            DynamoClient::new(&aws),
            config.table_name,
        ))),
        publisher: ApiGatewayPublisher::new(ApiGatewayManagementClient::from_conf(api_config)),
    });

    run(service_fn(move |event: LambdaEvent<Event>| {
        let state = Arc::clone(&state);
        async move { function_handler(event, &state).await }
    }))
    .await
}

async fn function_handler(event: LambdaEvent<Event>, state: &StreamState) -> Result<(), Error> {
    tracing::info!(records = event.payload.records.len(), "stream event received");

    for record in &event.payload.records {
        if let Err(e) = process_record(record, state).await {
            tracing::error!(error = %e, "failed to process record");
        }
    }

    Ok(())
}

async fn process_record(record: &EventRecord, state: &StreamState) -> Result<(), Error> {
    // For REMOVE events, new_image is empty; use old_image instead
    let image = if record.change.new_image.is_empty() {
        &record.change.old_image
    } else {
        &record.change.new_image
    };

    let entity_type = image
        .get("entity_type")
        .and_then(|attr| serde_json::to_value(attr).ok())
        .and_then(attr_string)
        .ok_or("Missing entity_type")?;
    let doc_id = image
        .get("doc_id")
        .and_then(|attr| serde_json::to_value(attr).ok())
        .and_then(attr_string)
        .ok_or("Missing doc_id")?;

    // Socket bookkeeping and unknown entities are not broadcast
    let Some(collection) = Collection::from_name(&entity_type) else {
        return Ok(());
    };

    tracing::info!(event = %record.event_name, collection = %entity_type, id = %doc_id, "processing change");
    publish_change(&state.gateway, &state.publisher, collection, &doc_id).await?;
    Ok(())
}

/// Reads a string attribute whether it arrives plain or as `{"S": ...}`.
fn attr_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(mut map) => match map.remove("S") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    }
}
