use crate::error::StoreError;
use crate::store::{DocumentGateway, Record};
use crate::types::{Role, UserPatch, UserProfile};

/// The `users` collection: auth identity -> email and role.
#[derive(Clone)]
pub struct RoleRegistry {
    gateway: DocumentGateway,
}

impl RoleRegistry {
    pub fn new(gateway: DocumentGateway) -> Self {
        Self { gateway }
    }

    /// Provision `uid` with a role. Overwrites any previous entry.
    pub async fn create_user_role(&self, uid: &str, email: &str, role: Role) -> Result<(), StoreError> {
        let profile = UserProfile {
            email: email.to_string(),
            role,
            full_name: None,
            contact_number: None,
            image_url: None,
            date_created: Some(chrono::Utc::now().to_rfc3339()),
            date_updated: None,
            last_login: None,
        };
        self.provision(uid, &profile).await
    }

    pub async fn provision(&self, uid: &str, profile: &UserProfile) -> Result<(), StoreError> {
        self.gateway.put(profile, Some(uid)).await?;
        tracing::info!(uid, role = %profile.role, "user role provisioned");
        Ok(())
    }

    /// Always read from the store; roles are never cached.
    pub async fn get_user_role(&self, uid: &str) -> Result<Option<Role>, StoreError> {
        Ok(self.get_profile(uid).await?.map(|record| record.data.role))
    }

    pub async fn get_profile(&self, uid: &str) -> Result<Option<Record<UserProfile>>, StoreError> {
        self.gateway.get_one::<UserProfile>(uid).await
    }

    pub async fn list(&self) -> Result<Vec<Record<UserProfile>>, StoreError> {
        self.gateway.get_all::<UserProfile>().await
    }

    pub async fn update(&self, uid: &str, mut patch: UserPatch) -> Result<(), StoreError> {
        patch.date_updated = Some(chrono::Utc::now().to_rfc3339());
        self.gateway.patch::<UserProfile>(uid, &patch).await
    }

    pub async fn record_login(&self, uid: &str) -> Result<(), StoreError> {
        let patch = UserPatch {
            last_login: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };
        self.gateway.patch::<UserProfile>(uid, &patch).await
    }

    pub async fn remove(&self, uid: &str) -> Result<(), StoreError> {
        self.gateway.remove::<UserProfile>(uid).await
    }
}
