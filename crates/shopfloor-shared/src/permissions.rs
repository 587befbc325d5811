//! Role-based permission model for channels, categories and messages.
//!
//! Everything here is a pure function of its inputs. Callers run these
//! checks before touching the network so that a denied action never leaves
//! the client.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelType, Role};

/// Channel-level capabilities granted by a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermissions {
    pub can_create_channel: bool,
    pub can_manage_channel: bool,
    pub can_delete_channel: bool,
}

pub fn permissions_for(role: Role) -> RolePermissions {
    RolePermissions {
        can_create_channel: can_create_channel(role),
        can_manage_channel: can_manage_channel(role),
        can_delete_channel: can_delete_channel(role),
    }
}

fn is_staff(role: Role) -> bool {
    matches!(role, Role::Manager | Role::Admin)
}

pub fn can_create_channel(role: Role) -> bool {
    is_staff(role)
}

pub fn can_manage_channel(role: Role) -> bool {
    is_staff(role)
}

pub fn can_delete_channel(role: Role) -> bool {
    is_staff(role)
}

/// Optional role restrictions attached to a category.
///
/// An empty list means the corresponding action is not restricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPermissions {
    #[serde(default)]
    pub view_role: Vec<Role>,
    #[serde(default)]
    pub manage_role: Vec<Role>,
}

impl CategoryPermissions {
    pub fn new(view_role: Vec<Role>, manage_role: Vec<Role>) -> Self {
        Self {
            view_role,
            manage_role,
        }
        .resolved()
    }

    /// Union the manage roles into the view roles (anyone who may manage a
    /// category may also see it), sorted and without duplicates.
    ///
    /// A category stays open to all only when neither list is configured.
    pub fn resolved(mut self) -> Self {
        self.manage_role.sort();
        self.manage_role.dedup();
        self.view_role.extend(self.manage_role.iter().copied());
        self.view_role.sort();
        self.view_role.dedup();
        self
    }
}

pub fn can_view_category(role: Role, perms: &CategoryPermissions) -> bool {
    (perms.view_role.is_empty() && perms.manage_role.is_empty())
        || perms.view_role.contains(&role)
        || perms.manage_role.contains(&role)
}

/// Managing a category needs the channel-management right and, when the
/// category lists manage roles, explicit membership in that list.
pub fn can_manage_category(role: Role, perms: &CategoryPermissions) -> bool {
    can_manage_channel(role) && (perms.manage_role.is_empty() || perms.manage_role.contains(&role))
}

/// Public channels are visible to everyone; private ones to the listed
/// roles (an empty list leaves them open). Admins see every channel.
pub fn can_view_channel(role: Role, is_private: bool, allowed_roles: &[Role]) -> bool {
    role == Role::Admin || !is_private || allowed_roles.is_empty() || allowed_roles.contains(&role)
}

/// Whether `role` may post text messages into a channel of `kind`.
pub fn can_post(role: Role, kind: ChannelType) -> bool {
    match kind {
        ChannelType::Text => true,
        ChannelType::Announcement => can_manage_channel(role),
        ChannelType::Voice => false,
    }
}

pub fn can_edit_message(is_author: bool) -> bool {
    is_author
}

pub fn can_delete_message(role: Role, is_author: bool) -> bool {
    is_author || can_manage_channel(role)
}

pub fn can_pin_message(role: Role) -> bool {
    can_manage_channel(role)
}
