use lambda_http::{http::StatusCode, Body, Error, Response};

use crate::auth::Session;
use crate::http;
use crate::roles::RoleRegistry;
use crate::types::{CreateUserRequest, UpdateUserRequest, UserPatch, UserProfile};

/// Provision a role for an identity that already exists in the auth service.
pub async fn create_user(registry: &RoleRegistry, session: &Session, body: &[u8]) -> Result<Response<Body>, Error> {
    let req: CreateUserRequest = match http::parse_json(body) {
        Ok(req) => req,
        Err(resp) => return Ok(resp),
    };

    if req.uid.trim().is_empty() || req.email.trim().is_empty() {
        return Ok(http::error(StatusCode::BAD_REQUEST, "uid and email are required"));
    }

    let profile = UserProfile {
        email: req.email,
        role: req.role,
        full_name: req.full_name,
        contact_number: req.contact_number,
        image_url: None,
        date_created: Some(chrono::Utc::now().to_rfc3339()),
        date_updated: None,
        last_login: None,
    };

    if let Err(e) = registry.provision(&req.uid, &profile).await {
        return Ok(http::store_failure(&e));
    }
    tracing::info!(uid = %req.uid, by = %session.identity.user_id, "user provisioned");

    http::json(
        StatusCode::CREATED,
        &crate::store::Record {
            id: req.uid,
            data: profile,
        },
    )
}

/// Get the caller's own profile
pub async fn get_me(registry: &RoleRegistry, session: &Session) -> Result<Response<Body>, Error> {
    match registry.get_profile(&session.identity.user_id).await {
        Ok(Some(profile)) => http::json(StatusCode::OK, &profile),
        Ok(None) => Ok(http::error(StatusCode::NOT_FOUND, "User not found")),
        Err(e) => Ok(http::store_failure(&e)),
    }
}

pub async fn list_users(registry: &RoleRegistry) -> Result<Response<Body>, Error> {
    match registry.list().await {
        Ok(mut users) => {
            users.sort_by(|a, b| a.data.email.cmp(&b.data.email));
            http::json(StatusCode::OK, &users)
        }
        Err(e) => Ok(http::store_failure(&e)),
    }
}

/// Update role or profile fields. Email is immutable.
pub async fn update_user(registry: &RoleRegistry, uid: &str, body: &[u8]) -> Result<Response<Body>, Error> {
    let req: UpdateUserRequest = match http::parse_json(body) {
        Ok(req) => req,
        Err(resp) => return Ok(resp),
    };

    let patch = UserPatch {
        role: req.role,
        full_name: req.full_name,
        contact_number: req.contact_number,
        image_url: req.image_url,
        ..Default::default()
    };

    if let Err(e) = registry.update(uid, patch).await {
        return Ok(http::store_failure(&e));
    }

    match registry.get_profile(uid).await {
        Ok(Some(profile)) => http::json(StatusCode::OK, &profile),
        Ok(None) => Ok(http::error(StatusCode::NOT_FOUND, "User not found")),
        Err(e) => Ok(http::store_failure(&e)),
    }
}

pub async fn delete_user(registry: &RoleRegistry, session: &Session, uid: &str) -> Result<Response<Body>, Error> {
    if uid == session.identity.user_id {
        return Ok(http::error(StatusCode::BAD_REQUEST, "You cannot remove your own account"));
    }
    match registry.remove(uid).await {
        Ok(()) => Ok(http::no_content()),
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
        let token = harness.user("root", Role::Superadmin).await;
        let session = harness.auth.resolve(&token).await.unwrap().unwrap();
        (harness, session)
    }

    #[tokio::test]
    async fn test_provision_and_promote() {
        let (harness, session) = setup().await;
        let registry = harness.auth.registry();

        let resp = create_user(
            registry,
            &session,
            br#"{"uid":"u2","email":"choir@gimong.test","role":"media"}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(registry.get_user_role("u2").await.unwrap(), Some(Role::Media));

        let resp = update_user(registry, "u2", br#"{"role":"admin"}"#).await.unwrap();
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["role"], "admin");
        assert_eq!(body["email"], "choir@gimong.test");
    }

    #[tokio::test]
    async fn test_unknown_role_rejected() {
        let (harness, session) = setup().await;
        let resp = create_user(
            harness.auth.registry(),
            &session,
            br#"{"uid":"u2","email":"x@gimong.test","role":"deacon"}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cannot_delete_self() {
        let (harness, session) = setup().await;
        let resp = delete_user(harness.auth.registry(), &session, "root").await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(harness.auth.registry().get_user_role("root").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_unknown_user_is_404() {
        let (harness, _) = setup().await;
        let resp = update_user(harness.auth.registry(), "ghost", br#"{"role":"admin"}"#)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
