//! Channel and category administration.
//!
//! Every operation checks the session user's role before it reaches the
//! remote store. Results are not written to the local store here; the
//! channel and category feeds deliver them.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use shopfloor_shared::constants::MAX_NAME_LEN;
use shopfloor_shared::permissions::{
    can_create_channel, can_delete_channel, can_manage_category, can_manage_channel,
    CategoryPermissions,
};
use shopfloor_shared::protocol::{CategoryDoc, ChannelDoc, Collection};
use shopfloor_shared::{CategoryId, ChannelId, ChannelType, ChatError, Role};
use shopfloor_store::SharedStore;

use crate::remote::RemoteStore;
use crate::session::SessionUser;

/// Parameters of a new channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub kind: ChannelType,
    pub category_id: CategoryId,
    pub is_private: bool,
    pub allowed_roles: Vec<Role>,
    /// Defaults to the end of the category.
    pub position: Option<i64>,
}

impl NewChannel {
    pub fn text(name: impl Into<String>, category_id: impl Into<CategoryId>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelType::Text,
            category_id: category_id.into(),
            is_private: false,
            allowed_roles: Vec::new(),
            position: None,
        }
    }

    pub fn private_to(mut self, roles: Vec<Role>) -> Self {
        self.is_private = true;
        self.allowed_roles = roles;
        self
    }
}

/// Partial channel update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChannelType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_roles: Option<Vec<Role>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

/// Partial category update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<CategoryPermissions>,
}

#[derive(Clone)]
pub struct ChannelAdmin {
    remote: Arc<dyn RemoteStore>,
    store: SharedStore,
    session: SessionUser,
}

impl ChannelAdmin {
    pub fn new(remote: Arc<dyn RemoteStore>, store: SharedStore, session: SessionUser) -> Self {
        Self {
            remote,
            store,
            session,
        }
    }

    fn role(&self) -> Role {
        self.session.role
    }

    fn denied(&self, action: &str) -> ChatError {
        ChatError::denied(format!("{} may not {action}", self.role()))
    }

    /// Category permissions, from the cache or the remote store.
    async fn category_permissions(&self, id: &CategoryId) -> Result<CategoryPermissions, ChatError> {
        if let Some(category) = self.store.read(|s| s.category(id).cloned()) {
            return Ok(category.permissions);
        }
        let doc = self
            .remote
            .get(&Collection::Categories, id.as_str())
            .await?
            .ok_or_else(|| ChatError::not_found(format!("category {id}")))?;
        let body: CategoryDoc = doc.decode()?;
        Ok(body.permissions.resolved())
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    pub async fn create_channel(&self, new: NewChannel) -> Result<ChannelId, ChatError> {
        if !can_create_channel(self.role()) {
            return Err(self.denied("create channels"));
        }
        let name = validate_name(&new.name)?;
        if new.category_id.as_str().trim().is_empty() {
            return Err(ChatError::validation("a channel needs a category"));
        }
        let permissions = self.category_permissions(&new.category_id).await?;
        if !can_manage_category(self.role(), &permissions) {
            return Err(self.denied(&format!("add channels to {}", new.category_id)));
        }

        let position = match new.position {
            Some(position) => position,
            None => self
                .store
                .read(|s| s.channels_in_category(&new.category_id).len() as i64),
        };
        let body = ChannelDoc {
            name,
            kind: new.kind,
            category_id: Some(new.category_id.clone()),
            is_private: new.is_private,
            allowed_roles: new.allowed_roles,
            position,
            created_by: Some(self.session.id.clone()),
            updated_at: Some(Utc::now()),
        };
        let doc = self
            .remote
            .add(&Collection::Channels, serde_json::to_value(&body)?)
            .await?;
        let id = ChannelId::new(doc.id);
        info!(channel_id = %id, category_id = %new.category_id, "Channel created");
        Ok(id)
    }

    pub async fn update_channel(&self, id: &ChannelId, update: ChannelUpdate) -> Result<(), ChatError> {
        if !can_manage_channel(self.role()) {
            return Err(self.denied("manage channels"));
        }
        let mut update = update;
        if let Some(name) = &update.name {
            update.name = Some(validate_name(name)?);
        }
        if let Some(category) = &update.category_id {
            if category.as_str().trim().is_empty() {
                return Err(ChatError::validation("a channel needs a category"));
            }
            let permissions = self.category_permissions(category).await?;
            if !can_manage_category(self.role(), &permissions) {
                return Err(self.denied(&format!("move channels into {category}")));
            }
        }

        let fields = with_timestamp(serde_json::to_value(&update)?);
        self.remote
            .update(&Collection::Channels, id.as_str(), fields)
            .await?;
        info!(channel_id = %id, "Channel updated");
        Ok(())
    }

    pub async fn delete_channel(&self, id: &ChannelId) -> Result<(), ChatError> {
        if !can_delete_channel(self.role()) {
            return Err(self.denied("delete channels"));
        }
        if self
            .remote
            .get(&Collection::Channels, id.as_str())
            .await?
            .is_none()
        {
            return Err(ChatError::not_found(format!("channel {id}")));
        }
        self.remote.delete(&Collection::Channels, id.as_str()).await?;
        info!(channel_id = %id, "Channel deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------

    pub async fn create_category(
        &self,
        name: &str,
        permissions: CategoryPermissions,
        position: Option<i64>,
    ) -> Result<CategoryId, ChatError> {
        if !can_manage_channel(self.role()) {
            return Err(self.denied("create categories"));
        }
        let name = validate_name(name)?;
        let position = match position {
            Some(position) => position,
            None => self.store.read(|s| s.categories().len() as i64),
        };
        let body = CategoryDoc {
            name,
            permissions: permissions.resolved(),
            position,
            updated_at: Some(Utc::now()),
        };
        let doc = self
            .remote
            .add(&Collection::Categories, serde_json::to_value(&body)?)
            .await?;
        let id = CategoryId::new(doc.id);
        info!(category_id = %id, "Category created");
        Ok(id)
    }

    pub async fn update_category(&self, id: &CategoryId, update: CategoryUpdate) -> Result<(), ChatError> {
        let permissions = self.category_permissions(id).await?;
        if !can_manage_category(self.role(), &permissions) {
            return Err(self.denied(&format!("manage category {id}")));
        }
        let mut update = update;
        if let Some(name) = &update.name {
            update.name = Some(validate_name(name)?);
        }
        update.permissions = update.permissions.map(CategoryPermissions::resolved);

        let fields = with_timestamp(serde_json::to_value(&update)?);
        self.remote
            .update(&Collection::Categories, id.as_str(), fields)
            .await?;
        info!(category_id = %id, "Category updated");
        Ok(())
    }

    /// Delete an empty category. Categories that still hold channels are
    /// refused.
    pub async fn delete_category(&self, id: &CategoryId) -> Result<(), ChatError> {
        let permissions = self.category_permissions(id).await?;
        if !can_manage_category(self.role(), &permissions) {
            return Err(self.denied(&format!("delete category {id}")));
        }
        let channels = self.remote.list(&Collection::Channels).await?;
        let in_use = channels
            .iter()
            .filter(|doc| doc.str_field("categoryId") == Some(id.as_str()))
            .count();
        if in_use > 0 {
            return Err(ChatError::validation(format!(
                "category {id} still has {in_use} channel(s)"
            )));
        }
        self.remote.delete(&Collection::Categories, id.as_str()).await?;
        info!(category_id = %id, "Category deleted");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String, ChatError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("name is empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ChatError::validation(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn with_timestamp(value: Value) -> Map<String, Value> {
    let mut fields = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    fields.insert("updatedAt".into(), Value::from(Utc::now().timestamp_millis()));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRemote;
    use serde_json::json;
    use shopfloor_shared::protocol::RemoteDocument;
    use shopfloor_store::EntityStore;

    fn admin(role: Role) -> (Arc<InMemoryRemote>, ChannelAdmin) {
        let remote = Arc::new(InMemoryRemote::new());
        remote.seed(
            Collection::Categories,
            RemoteDocument::new("floor", json!({ "name": "Floor", "position": 0 })),
        );
        let session = SessionUser::new("boss", "Mara", role);
        let admin = ChannelAdmin::new(remote.clone(), SharedStore::new(EntityStore::new()), session);
        (remote, admin)
    }

    #[tokio::test]
    async fn test_worker_cannot_create_channel() {
        let (remote, admin) = admin(Role::Worker);
        let err = admin
            .create_channel(NewChannel::text("line-3", "floor"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_manager_creates_channel_in_category() {
        let (remote, admin) = admin(Role::Manager);
        let id = admin
            .create_channel(NewChannel::text("  line-3 ", "floor"))
            .await
            .unwrap();
        let doc = remote.document(&Collection::Channels, id.as_str()).unwrap();
        assert_eq!(doc.str_field("name"), Some("line-3"));
        assert_eq!(doc.str_field("categoryId"), Some("floor"));
        assert_eq!(doc.str_field("createdBy"), Some("boss"));
    }

    #[tokio::test]
    async fn test_channel_validation() {
        let (_, admin) = admin(Role::Admin);
        let err = admin.create_channel(NewChannel::text(" ", "floor")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        let err = admin.create_channel(NewChannel::text("x", "")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        let err = admin.create_channel(NewChannel::text("x", "nowhere")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_category_with_channels_is_not_deleted() {
        let (remote, admin) = admin(Role::Admin);
        admin
            .create_channel(NewChannel::text("line-1", "floor"))
            .await
            .unwrap();
        let floor = CategoryId::new("floor");
        let err = admin.delete_category(&floor).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let empty = admin
            .create_category("Storage", CategoryPermissions::default(), None)
            .await
            .unwrap();
        admin.delete_category(&empty).await.unwrap();
        assert!(remote.document(&Collection::Categories, empty.as_str()).is_none());
    }

    #[tokio::test]
    async fn test_restricted_category_requires_manage_role() {
        let (remote, admin) = admin(Role::Manager);
        remote.seed(
            Collection::Categories,
            RemoteDocument::new(
                "office",
                json!({ "name": "Office", "permissions": { "manageRole": ["admin"] } }),
            ),
        );
        let err = admin
            .update_category(&CategoryId::new("office"), CategoryUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }
}
