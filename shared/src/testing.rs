//! Test doubles for the external services.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::sockets::broadcast::{PublishError, SocketPublisher};
use crate::AppState;
use crate::auth::{AuthGateway, AuthProvider, AuthTokens, Identity, ProviderError, SignIn};
use crate::roles::RoleRegistry;
use crate::store::{memory::MemoryStore, DocumentGateway};
use crate::types::Role;

/// Accounts held in memory. The access token for user `uid` is
/// `token-<uid>`.
#[derive(Default)]
pub struct StaticAuth {
    accounts: Mutex<HashMap<String, (String, Identity)>>,
    fail_sign_out: AtomicBool,
    sign_outs: AtomicUsize,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_for(uid: &str) -> String {
        format!("token-{}", uid)
    }

    pub fn add_account(&self, uid: &str, email: &str, password: &str) {
        self.accounts.lock().insert(
            email.to_string(),
            (
                password.to_string(),
                Identity {
                    user_id: uid.to_string(),
                    email: email.to_string(),
                },
            ),
        );
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignIn, ProviderError> {
        let accounts = self.accounts.lock();
        match accounts.get(email) {
            Some((expected, identity)) if expected == password => Ok(SignIn {
                identity: identity.clone(),
                tokens: AuthTokens {
                    id_token: format!("id-{}", identity.user_id),
                    access_token: Self::token_for(&identity.user_id),
                    refresh_token: format!("refresh-{}", identity.user_id),
                    expires_in: 3600,
                },
            }),
            _ => Err(ProviderError::Rejected),
        }
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), ProviderError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("network unreachable".to_string()));
        }
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_identity(&self, access_token: &str) -> Result<Option<Identity>, ProviderError> {
        Ok(self
            .accounts
            .lock()
            .values()
            .find(|(_, identity)| Self::token_for(&identity.user_id) == access_token)
            .map(|(_, identity)| identity.clone()))
    }
}

/// Captures pushed payloads. Connections marked gone reject every post.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, Value)>>,
    gone: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_gone(&self, connection_id: &str) {
        self.gone.lock().insert(connection_id.to_string());
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SocketPublisher for RecordingPublisher {
    async fn post(&self, connection_id: &str, payload: &[u8]) -> Result<(), PublishError> {
        if self.gone.lock().contains(connection_id) {
            return Err(PublishError::Gone);
        }
        let value = serde_json::from_slice(payload).map_err(|e| PublishError::Failed(e.to_string()))?;
        self.sent.lock().push((connection_id.to_string(), value));
        Ok(())
    }
}

/// A memory-backed gateway plus auth stack.
pub struct Harness {
    pub gateway: DocumentGateway,
    pub provider: Arc<StaticAuth>,
    pub auth: AuthGateway,
}

impl Harness {
    pub fn new() -> Self {
        let gateway = DocumentGateway::new(Arc::new(MemoryStore::new()));
        let provider = Arc::new(StaticAuth::new());
        let auth = AuthGateway::new(provider.clone(), RoleRegistry::new(gateway.clone()));
        Self {
            gateway,
            provider,
            auth,
        }
    }

    /// Registers an account, provisions its role and returns its token.
    pub async fn user(&self, uid: &str, role: Role) -> String {
        let email = format!("{}@gimong.test", uid);
        self.provider.add_account(uid, &email, "password");
        self.auth
            .registry()
            .create_user_role(uid, &email, role)
            .await
            .expect("provisioning in memory cannot fail");
        StaticAuth::token_for(uid)
    }

    /// Application state sharing this harness's store and accounts.
    pub fn state(&self, publisher: Option<Arc<dyn SocketPublisher>>) -> Arc<AppState> {
        let config = Config {
            table_name: "gimong-test".to_string(),
            cognito_client_id: "test-client".to_string(),
            cognito_client_secret: None,
            ws_endpoint: None,
        };
        AppState::from_parts(config, self.gateway.clone(), self.auth.clone(), publisher)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
