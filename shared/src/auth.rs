use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::error::DisplayErrorContext;
use aws_sdk_cognitoidentityprovider::operation::get_user::GetUserError;
use aws_sdk_cognitoidentityprovider::operation::initiate_auth::InitiateAuthError;
use aws_sdk_cognitoidentityprovider::types::AuthFlowType;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

use crate::error::AuthError;
use crate::http;
use crate::roles::RoleRegistry;
use crate::types::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i32,
}

#[derive(Debug, Clone)]
pub struct SignIn {
    pub identity: Identity,
    pub tokens: AuthTokens,
}

/// An authenticated identity with the role resolved from the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(flatten)]
    pub identity: Identity,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub tokens: AuthTokens,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("credentials rejected")]
    Rejected,
    #[error("{0}")]
    Unavailable(String),
}

/// The external identity service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignIn, ProviderError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    /// `None` when the token is unknown or expired.
    async fn current_identity(&self, access_token: &str) -> Result<Option<Identity>, ProviderError>;
}

type HmacSha256 = Hmac<Sha256>;

/// SECRET_HASH for Cognito app clients that carry a secret.
pub fn compute_secret_hash(username: &str, client_id: &str, client_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

pub struct CognitoAuth {
    client: CognitoClient,
    client_id: String,
    client_secret: Option<String>,
}

impl CognitoAuth {
    pub fn new(client: CognitoClient, client_id: String, client_secret: Option<String>) -> Self {
        Self {
            client,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl AuthProvider for CognitoAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignIn, ProviderError> {
        let mut request = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", email)
            .auth_parameters("PASSWORD", password);
        if let Some(secret) = &self.client_secret {
            request = request.auth_parameters(
                "SECRET_HASH",
                compute_secret_hash(email, &self.client_id, secret),
            );
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let rejected = matches!(
                    e.as_service_error(),
                    Some(
                        InitiateAuthError::NotAuthorizedException(_)
                            | InitiateAuthError::UserNotFoundException(_)
                            | InitiateAuthError::UserNotConfirmedException(_)
                            | InitiateAuthError::PasswordResetRequiredException(_)
                    )
                );
                return Err(if rejected {
                    ProviderError::Rejected
                } else {
                    ProviderError::Unavailable(DisplayErrorContext(e).to_string())
                });
            }
        };

        let Some(result) = response.authentication_result() else {
            tracing::warn!(
                challenge = ?response.challenge_name(),
                "sign-in returned a challenge instead of tokens"
            );
            return Err(ProviderError::Rejected);
        };

        let tokens = AuthTokens {
            id_token: result.id_token().unwrap_or_default().to_string(),
            access_token: result.access_token().unwrap_or_default().to_string(),
            refresh_token: result.refresh_token().unwrap_or_default().to_string(),
            expires_in: result.expires_in(),
        };

        let identity = self
            .current_identity(&tokens.access_token)
            .await?
            .ok_or_else(|| ProviderError::Unavailable("fresh access token was not accepted".to_string()))?;

        Ok(SignIn { identity, tokens })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        self.client
            .global_sign_out()
            .access_token(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(DisplayErrorContext(e).to_string()))?;
        Ok(())
    }

    async fn current_identity(&self, access_token: &str) -> Result<Option<Identity>, ProviderError> {
        let user = match self.client.get_user().access_token(access_token).send().await {
            Ok(user) => user,
            Err(e) => {
                let expired = matches!(
                    e.as_service_error(),
                    Some(GetUserError::NotAuthorizedException(_) | GetUserError::UserNotFoundException(_))
                );
                return if expired {
                    Ok(None)
                } else {
                    Err(ProviderError::Unavailable(DisplayErrorContext(e).to_string()))
                };
            }
        };

        let attribute = |name: &str| {
            user.user_attributes()
                .iter()
                .find(|attr| attr.name() == name)
                .and_then(|attr| attr.value())
                .map(str::to_string)
        };

        Ok(Some(Identity {
            user_id: attribute("sub").unwrap_or_else(|| user.username().to_string()),
            email: attribute("email").unwrap_or_else(|| user.username().to_string()),
        }))
    }
}

/// Sign-in plus role resolution against the registry.
#[derive(Clone)]
pub struct AuthGateway {
    provider: Arc<dyn AuthProvider>,
    registry: RoleRegistry,
}

impl AuthGateway {
    pub fn new(provider: Arc<dyn AuthProvider>, registry: RoleRegistry) -> Self {
        Self { provider, registry }
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let signed_in = self
            .provider
            .sign_in(email, password)
            .await
            .map_err(|e| match e {
                ProviderError::Rejected => AuthError::InvalidCredentials,
                ProviderError::Unavailable(msg) => AuthError::Provider(msg),
            })?;

        let uid = signed_in.identity.user_id.clone();
        let lookup = match self.registry.get_user_role(&uid).await {
            Ok(Some(role)) => Ok(role),
            Ok(None) => {
                tracing::warn!(uid = %uid, "login denied: no role provisioned");
                Err(AuthError::RoleNotFound(uid.clone()))
            }
            Err(e) => {
                tracing::error!(uid = %uid, error = %e, "login denied: role lookup failed");
                Err(AuthError::Store(e))
            }
        };
        let role = match lookup {
            Ok(role) => role,
            Err(err) => {
                // The fresh tokens must not outlive a denied login.
                if let Err(e) = self.provider.sign_out(&signed_in.tokens.access_token).await {
                    tracing::warn!(uid = %uid, error = %e, "could not revoke tokens of denied login");
                }
                return Err(err);
            }
        };

        if let Err(e) = self.registry.record_login(&uid).await {
            tracing::warn!(uid = %uid, error = %e, "failed to record last login");
        }
        tracing::info!(uid = %uid, role = %role, "login succeeded");

        Ok(LoginOutcome {
            session: Session {
                identity: signed_in.identity,
                role,
            },
            tokens: signed_in.tokens,
        })
    }

    /// Best-effort revocation. Returns whether the provider confirmed it; the
    /// local session is considered ended either way.
    pub async fn logout(&self, access_token: &str) -> bool {
        match self.provider.sign_out(access_token).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "remote sign-out failed; session cleared locally");
                false
            }
        }
    }

    /// Current session for a token. The role is re-read on every call.
    pub async fn resolve(&self, access_token: &str) -> Result<Option<Session>, AuthError> {
        let identity = match self.provider.current_identity(access_token).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return Ok(None),
            Err(e) => return Err(AuthError::Provider(e.to_string())),
        };

        match self.registry.get_user_role(&identity.user_id).await? {
            Some(role) => Ok(Some(Session { identity, role })),
            None => Err(AuthError::RoleNotFound(identity.user_id)),
        }
    }
}

// ========== HTTP ==========

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i32,
    pub user: Session,
}

pub fn auth_failure(err: &AuthError) -> Response<Body> {
    match err {
        AuthError::InvalidCredentials => http::error(StatusCode::UNAUTHORIZED, "Incorrect email or password"),
        AuthError::RoleNotFound(_) => {
            http::error(StatusCode::FORBIDDEN, "This account has not been assigned a role")
        }
        AuthError::Provider(msg) => {
            tracing::error!(error = %msg, "auth provider failure");
            http::error(StatusCode::SERVICE_UNAVAILABLE, "Sign-in is temporarily unavailable")
        }
        AuthError::Store(e) => http::store_failure(e),
    }
}

/// POST /login
pub async fn login(auth: &AuthGateway, body: &[u8]) -> Result<Response<Body>, Error> {
    let request: LoginRequest = match http::parse_json(body) {
        Ok(req) => req,
        Err(resp) => return Ok(resp),
    };

    tracing::info!(email = %request.email, "login request received");

    match auth.login(&request.email, &request.password).await {
        Ok(outcome) => http::json(
            StatusCode::OK,
            &LoginResponse {
                id_token: outcome.tokens.id_token,
                access_token: outcome.tokens.access_token,
                refresh_token: outcome.tokens.refresh_token,
                expires_in: outcome.tokens.expires_in,
                user: outcome.session,
            },
        ),
        Err(e) => {
            tracing::warn!(email = %request.email, error = %e, "login failed");
            Ok(auth_failure(&e))
        }
    }
}

/// POST /logout
pub async fn logout(auth: &AuthGateway, access_token: Option<&str>) -> Result<Response<Body>, Error> {
    let revoked = match access_token {
        Some(token) => auth.logout(token).await,
        None => false,
    };
    http::json(StatusCode::OK, &serde_json::json!({ "revoked": revoked }))
}

/// GET /session
pub async fn session(auth: &AuthGateway, access_token: Option<&str>) -> Result<Response<Body>, Error> {
    let Some(token) = access_token else {
        return Ok(http::error(StatusCode::UNAUTHORIZED, "Not signed in"));
    };
    match auth.resolve(token).await {
        Ok(Some(session)) => http::json(StatusCode::OK, &session),
        Ok(None) => Ok(http::error(StatusCode::UNAUTHORIZED, "Not signed in")),
        Err(e) => Ok(auth_failure(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{memory::MemoryStore, DocumentGateway, DocumentStore, Fields, Filter, WriteMode};
    use crate::testing::StaticAuth;

    fn setup() -> (Arc<StaticAuth>, AuthGateway) {
        let gateway = DocumentGateway::new(Arc::new(MemoryStore::new()));
        let provider = Arc::new(StaticAuth::new());
        let auth = AuthGateway::new(provider.clone(), RoleRegistry::new(gateway));
        (provider, auth)
    }

    #[tokio::test]
    async fn test_login_resolves_role() {
        let (provider, auth) = setup();
        provider.add_account("uid-1", "pastor@gimong.org", "secret");
        auth.registry()
            .create_user_role("uid-1", "pastor@gimong.org", Role::Pastor)
            .await
            .unwrap();

        let outcome = auth.login("pastor@gimong.org", "secret").await.unwrap();
        assert_eq!(outcome.session.role, Role::Pastor);
        assert_eq!(outcome.session.identity.user_id, "uid-1");
        assert!(!outcome.tokens.access_token.is_empty());

        let profile = auth.registry().get_profile("uid-1").await.unwrap().unwrap();
        assert!(profile.data.last_login.is_some());
    }

    #[tokio::test]
    async fn test_wrong_password_is_invalid_credentials() {
        let (provider, auth) = setup();
        provider.add_account("uid-1", "pastor@gimong.org", "secret");

        let err = auth.login("pastor@gimong.org", "guess").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    /// Memory store whose `users` reads fail.
    struct UsersDown(MemoryStore);

    #[async_trait]
    impl DocumentStore for UsersDown {
        async fn write(&self, c: &str, id: &str, f: Fields, m: WriteMode) -> Result<(), StoreError> {
            self.0.write(c, id, f, m).await
        }

        async fn get(&self, c: &str, id: &str) -> Result<Option<Fields>, StoreError> {
            if c == "users" {
                return Err(StoreError::read(c, "throttled"));
            }
            self.0.get(c, id).await
        }

        async fn query(&self, c: &str, filters: &[Filter]) -> Result<Vec<(String, Fields)>, StoreError> {
            self.0.query(c, filters).await
        }

        async fn delete(&self, c: &str, id: &str) -> Result<(), StoreError> {
            self.0.delete(c, id).await
        }
    }

    #[tokio::test]
    async fn test_registry_failure_revokes_fresh_tokens() {
        let gateway = DocumentGateway::new(Arc::new(UsersDown(MemoryStore::new())));
        let provider = Arc::new(StaticAuth::new());
        let auth = AuthGateway::new(provider.clone(), RoleRegistry::new(gateway));
        provider.add_account("uid-3", "usher@gimong.org", "secret");

        let err = auth.login("usher@gimong.org", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::Store(_)));
        assert_eq!(provider.sign_outs(), 1);
    }

    #[tokio::test]
    async fn test_unprovisioned_user_is_denied() {
        let (provider, auth) = setup();
        provider.add_account("uid-2", "visitor@gimong.org", "secret");

        let err = auth.login("visitor@gimong.org", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::RoleNotFound(uid) if uid == "uid-2"));
        // Tokens handed out by the provider were revoked.
        assert_eq!(provider.sign_outs(), 1);
    }

    #[tokio::test]
    async fn test_logout_survives_provider_failure() {
        let (provider, auth) = setup();
        provider.fail_sign_out(true);
        assert!(!auth.logout("token-uid-1").await);

        provider.fail_sign_out(false);
        assert!(auth.logout("token-uid-1").await);
    }

    #[tokio::test]
    async fn test_resolve_rereads_role() {
        let (provider, auth) = setup();
        provider.add_account("uid-1", "finance@gimong.org", "secret");
        auth.registry()
            .create_user_role("uid-1", "finance@gimong.org", Role::Finance)
            .await
            .unwrap();
        let token = StaticAuth::token_for("uid-1");

        let session = auth.resolve(&token).await.unwrap().unwrap();
        assert_eq!(session.role, Role::Finance);

        auth.registry()
            .create_user_role("uid-1", "finance@gimong.org", Role::Media)
            .await
            .unwrap();
        let session = auth.resolve(&token).await.unwrap().unwrap();
        assert_eq!(session.role, Role::Media);

        assert!(auth.resolve("bogus").await.unwrap().is_none());
    }

    #[test]
    fn test_secret_hash_is_stable_base64() {
        let a = compute_secret_hash("pastor@gimong.org", "client", "secret");
        let b = compute_secret_hash("pastor@gimong.org", "client", "secret");
        assert_eq!(a, b);
        // 32-byte digest -> 44 base64 characters.
        assert_eq!(a.len(), 44);
        assert_ne!(a, compute_secret_hash("other@gimong.org", "client", "secret"));
    }
}
