use lambda_http::request::RequestContext;
use lambda_http::{http::StatusCode, Body, Error, Request, RequestExt, Response};
use serde_json::json;
use std::sync::Arc;

use super::broadcast::{self, PublishError};
use super::connections::{
    get_connection, remove_connection, remove_subscription, save_connection, save_subscription,
    SocketSubscription,
};
use super::messages::ClientMessage;
use crate::guard;
use crate::http;
use crate::store::Filter;
use crate::types::{Collection, Role};
use crate::AppState;

/// Handle WebSocket events ($connect, $disconnect, $default)
pub async fn handle_websocket_event(event: Request, state: Arc<AppState>) -> Result<Response<Body>, Error> {
    let Some((connection_id, route_key)) = socket_context(&event) else {
        return Ok(http::error(StatusCode::BAD_REQUEST, "Not a websocket event"));
    };

    tracing::info!(route = %route_key, connection_id = %connection_id, "websocket event");

    match route_key.as_str() {
        "$connect" => handle_connect(&event, &state, &connection_id).await,
        "$disconnect" => handle_disconnect(&state, &connection_id).await,
        "$default" => handle_message(&event, &state, &connection_id).await,
        other => {
            tracing::warn!(route = %other, "unknown websocket route");
            Ok(http::error(StatusCode::BAD_REQUEST, "Unknown route"))
        }
    }
}

/// True only for events carrying a websocket request context from API
/// Gateway. Client headers never make a request a websocket event.
pub fn is_websocket(event: &Request) -> bool {
    socket_context(event).is_some()
}

/// Connection id and route key, taken from the API Gateway context.
fn socket_context(event: &Request) -> Option<(String, String)> {
    match event.request_context_ref() {
        Some(RequestContext::WebSocket(ctx)) => {
            let connection_id = ctx.connection_id.clone()?;
            Some((connection_id, ctx.route_key.clone().unwrap_or_default()))
        }
        _ => None,
    }
}

/// A connection is anonymous unless it presents a token that resolves to a
/// provisioned user.
async fn handle_connect(event: &Request, state: &AppState, connection_id: &str) -> Result<Response<Body>, Error> {
    let token = event
        .query_string_parameters_ref()
        .and_then(|params| params.first("token"))
        .map(str::to_string);

    let user_id = match token {
        Some(token) => match state.auth.resolve(&token).await {
            Ok(Some(session)) => Some(session.identity.user_id),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(connection_id, error = %e, "could not resolve socket session, connecting anonymously");
                None
            }
        },
        None => None,
    };

    if let Err(e) = save_connection(&state.gateway, connection_id, user_id.as_deref()).await {
        return Ok(http::store_failure(&e));
    }
    Ok(http::respond(StatusCode::OK, Body::Empty))
}

async fn handle_disconnect(state: &AppState, connection_id: &str) -> Result<Response<Body>, Error> {
    if let Err(e) = remove_connection(&state.gateway, connection_id).await {
        return Ok(http::store_failure(&e));
    }
    Ok(http::respond(StatusCode::OK, Body::Empty))
}

async fn handle_message(event: &Request, state: &AppState, connection_id: &str) -> Result<Response<Body>, Error> {
    let message: ClientMessage = match http::parse_json(event.body()) {
        Ok(message) => message,
        Err(resp) => return Ok(resp),
    };

    match message {
        ClientMessage::Subscribe {
            subscription_id,
            collection,
            filters,
            document_id,
        } => {
            let Some(collection) = Collection::from_name(&collection) else {
                return Ok(http::error(StatusCode::BAD_REQUEST, "Unknown collection"));
            };
            subscribe(state, connection_id, subscription_id, collection, filters, document_id).await
        }
        ClientMessage::Unsubscribe { subscription_id } => {
            if let Err(e) = remove_subscription(&state.gateway, connection_id, &subscription_id).await {
                return Ok(http::store_failure(&e));
            }
            http::json(StatusCode::OK, &json!({ "unsubscribed": subscription_id }))
        }
    }
}

/// The connection's role, read fresh from the registry. Any failure is
/// treated as no role.
async fn connection_role(state: &AppState, connection_id: &str) -> Option<Role> {
    let user_id = match get_connection(&state.gateway, connection_id).await {
        Ok(Some(connection)) => connection.user_id?,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(connection_id, error = %e, "connection lookup failed");
            return None;
        }
    };
    match state.auth.registry().get_user_role(&user_id).await {
        Ok(role) => role,
        Err(e) => {
            tracing::warn!(connection_id, error = %e, "role lookup failed");
            None
        }
    }
}

async fn subscribe(
    state: &AppState,
    connection_id: &str,
    subscription_id: String,
    collection: Collection,
    mut filters: Vec<Filter>,
    document_id: Option<String>,
) -> Result<Response<Body>, Error> {
    let role = connection_role(state, connection_id).await;

    if let Some(surface) = guard::read_surface(collection) {
        if !role.is_some_and(|r| surface.permits(r)) {
            tracing::warn!(connection_id, collection = %collection.name(), "subscription denied");
            return Ok(http::error(StatusCode::FORBIDDEN, "You do not have access to this collection"));
        }
    }

    let manages = role.is_some_and(|r| guard::manage_surface(collection).permits(r));
    if collection.is_archivable() && !manages {
        filters.push(Filter::eq("isArchived", false));
    }

    let subscription = SocketSubscription {
        connection_id: connection_id.to_string(),
        subscription_id,
        collection,
        filters,
        document_id,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    if let Err(e) = save_subscription(&state.gateway, &subscription).await {
        return Ok(http::store_failure(&e));
    }

    if let Some(publisher) = &state.publisher {
        let initial = match broadcast::snapshot(&state.gateway, &subscription).await {
            Ok(message) => message,
            Err(e) => return Ok(http::store_failure(&e)),
        };
        match broadcast::send(publisher.as_ref(), connection_id, &initial).await {
            Ok(()) => {}
            Err(PublishError::Gone) => {
                if let Err(e) = remove_connection(&state.gateway, connection_id).await {
                    return Ok(http::store_failure(&e));
                }
            }
            Err(e) => tracing::warn!(connection_id, error = %e, "initial snapshot not delivered"),
        }
    }

    tracing::info!(
        connection_id,
        subscription_id = %subscription.subscription_id,
        collection = %collection.name(),
        "subscribed"
    );
    http::json(StatusCode::OK, &json!({ "subscribed": subscription.subscription_id }))
}
