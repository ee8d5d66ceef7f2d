use gimong_shared::guard::{self, Denial, Surface};
use gimong_shared::{announcements, auth, events, feed, finances, http, users, AppState};
use lambda_http::{http::Method, Body, Error, Request, RequestExt, Response};
use std::sync::Arc;

/// Resolves the session for `$surface` or returns the denial response.
macro_rules! require {
    ($state:expr, $surface:expr, $token:expr) => {
        match guard::authorize(&$state.auth, $surface, $token).await {
            Ok(session) => session,
            Err(resp) => return Ok(resp),
        }
    };
}

/// Main Lambda handler - routes HTTP requests
pub(crate) async fn function_handler(event: Request, state: Arc<AppState>) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    tracing::info!(method = %method, path = %path, "api request");

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return Ok(http::preflight());
    }

    let token = http::bearer_token(event.headers());
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let gw = &state.gateway;

    match (method, parts.as_slice()) {
        // --- AUTH ---
        (&Method::POST, ["login"]) => auth::login(&state.auth, body).await,
        (&Method::POST, ["logout"]) => auth::logout(&state.auth, token).await,
        (&Method::GET, ["session"]) => auth::session(&state.auth, token).await,
        (_, ["login" | "logout" | "session"]) => Ok(http::method_not_allowed()),
        // GET /guard/{surface}
        (&Method::GET, ["guard", slug]) => guard::guard_status(&state.auth, slug, token).await,

        // --- PUBLIC ---
        (&Method::GET, ["feed"]) => feed::feed(gw).await,
        (&Method::GET, ["announcements"]) => announcements::list_public(gw).await,
        (&Method::GET, ["events"]) => events::list_public(gw).await,
        (&Method::GET, ["finances", "summary"]) => {
            let year = event
                .query_string_parameters_ref()
                .and_then(|params| params.first("year"))
                .map(str::to_string);
            finances::public_summary(gw, year.as_deref()).await
        }

        // --- ANNOUNCEMENTS ---
        (&Method::GET, ["admin", "announcements"]) => {
            require!(state, Surface::Content, token);
            announcements::list_all(gw).await
        }
        (&Method::POST, ["announcements"]) => {
            let session = require!(state, Surface::Content, token);
            announcements::create_announcement(gw, &session, body).await
        }
        (&Method::PATCH, ["announcements", id]) => {
            require!(state, Surface::Content, token);
            announcements::update_announcement(gw, id, body).await
        }
        (&Method::POST, ["announcements", id, "archive"]) => {
            require!(state, Surface::Content, token);
            announcements::archive_announcement(gw, id).await
        }
        (&Method::DELETE, ["announcements", id]) => {
            require!(state, Surface::Content, token);
            announcements::delete_announcement(gw, id).await
        }

        // --- EVENTS ---
        (&Method::GET, ["admin", "events"]) => {
            require!(state, Surface::Content, token);
            events::list_all(gw).await
        }
        (&Method::POST, ["events"]) => {
            let session = require!(state, Surface::Content, token);
            events::create_event(gw, &session, body).await
        }
        (&Method::PATCH, ["events", id]) => {
            require!(state, Surface::Content, token);
            events::update_event(gw, id, body).await
        }
        (&Method::POST, ["events", id, "archive"]) => {
            require!(state, Surface::Content, token);
            events::archive_event(gw, id).await
        }
        (&Method::DELETE, ["events", id]) => {
            require!(state, Surface::Content, token);
            events::delete_event(gw, id).await
        }

        // --- FINANCES ---
        (&Method::GET, ["finances"]) => {
            require!(state, Surface::FinanceDashboard, token);
            finances::list_records(gw).await
        }
        (&Method::POST, ["finances"]) => {
            let session = require!(state, Surface::FinanceDashboard, token);
            finances::create_record(gw, &session, body).await
        }
        (&Method::PATCH, ["finances", id]) => {
            require!(state, Surface::FinanceDashboard, token);
            finances::update_record(gw, id, body).await
        }
        (&Method::POST, ["finances", id, "archive"]) => {
            require!(state, Surface::FinanceDashboard, token);
            finances::archive_record(gw, id).await
        }
        (&Method::DELETE, ["finances", id]) => {
            require!(state, Surface::FinanceDashboard, token);
            finances::delete_record(gw, id).await
        }

        // --- USERS ---
        // GET /users/me - any signed-in user
        (&Method::GET, ["users", "me"]) => {
            let resolved = match token {
                Some(token) => state.auth.resolve(token).await,
                None => Ok(None),
            };
            match resolved {
                Ok(Some(session)) => users::get_me(state.auth.registry(), &session).await,
                Ok(None) => Ok(guard::denial_response(Denial::NoSession)),
                Err(e) => Ok(auth::auth_failure(&e)),
            }
        }
        (&Method::GET, ["users"]) => {
            require!(state, Surface::UserManagement, token);
            users::list_users(state.auth.registry()).await
        }
        (&Method::POST, ["users"]) => {
            let session = require!(state, Surface::UserManagement, token);
            users::create_user(state.auth.registry(), &session, body).await
        }
        (&Method::PATCH, ["users", uid]) => {
            require!(state, Surface::UserManagement, token);
            users::update_user(state.auth.registry(), uid, body).await
        }
        (&Method::DELETE, ["users", uid]) => {
            let session = require!(state, Surface::UserManagement, token);
            users::delete_user(state.auth.registry(), &session, uid).await
        }

        _ => Ok(http::not_found()),
    }
}
