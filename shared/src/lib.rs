pub mod types;
pub mod config;
pub mod error;
pub mod store;
pub mod roles;
pub mod auth;
pub mod guard;
pub mod http;
pub mod feed;
pub mod announcements;
pub mod events;
pub mod finances;
pub mod users;
pub mod sockets;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

use auth::{AuthGateway, AuthProvider};
use config::Config;
use roles::RoleRegistry;
use sockets::broadcast::SocketPublisher;
use store::{DocumentGateway, DocumentStore};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub gateway: DocumentGateway,
    pub auth: AuthGateway,
    /// Present when a websocket endpoint is configured.
    pub publisher: Option<Arc<dyn SocketPublisher>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn AuthProvider>,
        publisher: Option<Arc<dyn SocketPublisher>>,
    ) -> Arc<Self> {
        let gateway = DocumentGateway::new(store);
        let auth = AuthGateway::new(provider, RoleRegistry::new(gateway.clone()));
        Self::from_parts(config, gateway, auth, publisher)
    }

    pub fn from_parts(
        config: Config,
        gateway: DocumentGateway,
        auth: AuthGateway,
        publisher: Option<Arc<dyn SocketPublisher>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            auth,
            publisher,
        })
    }
}
