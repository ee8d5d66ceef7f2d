use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use gimong_shared::auth::CognitoAuth;
use gimong_shared::config::Config;
use gimong_shared::sockets::broadcast::{ApiGatewayPublisher, SocketPublisher};
use gimong_shared::sockets::handler::{handle_websocket_event, is_websocket};
use gimong_shared::store::dynamo::DynamoStore;
use gimong_shared::AppState;
use lambda_http::{run, service_fn, tracing, Error, Request};
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = Config::from_env()?;

    // Initialize AWS clients once at startup
    let aws = aws_config::load_from_env().await;

    // API Gateway Management client for WebSocket (optional endpoint)
    let publisher = config.ws_endpoint.as_ref().map(|endpoint| {
        let api_config = aws_sdk_apigatewaymanagement::config::Builder::from(&aws)
            .endpoint_url(endpoint)
            .build();
        Arc::new(ApiGatewayPublisher::new(ApiGatewayManagementClient::from_conf(api_config)))
            as Arc<dyn SocketPublisher>
    });

    let store = Arc::new(DynamoStore::new(DynamoClient::new(&aws), config.table_name.clone()));
    let provider = Arc::new(CognitoAuth::new(
        CognitoClient::new(&aws),
        config.cognito_client_id.clone(),
        config.cognito_client_secret.clone(),
    ));

    tracing::info!(table = %config.table_name, websocket = publisher.is_some(), "api lambda starting");
    let state = AppState::new(config, store, provider, publisher);

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move {
            if is_websocket(&event) {
                handle_websocket_event(event, state).await
            } else {
                http_handler::function_handler(event, state).await
            }
        }
    }))
    .await
}
