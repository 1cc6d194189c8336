use crate::db::DbCollection;

pub const ADMIN_ROLE: &str = "admin";

/// Identity of the user a lifecycle or import call is made for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Caller {
    pub fn user(user_id: &str) -> Self {
        Caller {
            user_id: user_id.to_string(),
            roles: Vec::new(),
        }
    }

    pub fn admin(user_id: &str) -> Self {
        Caller {
            user_id: user_id.to_string(),
            roles: vec![ADMIN_ROLE.to_string()],
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_owner(&self, collection: &DbCollection) -> bool {
        collection.owner == self.user_id
    }
}

/// Authorization gates consulted by the collection manager
pub trait AccessControl: Send + Sync {
    fn can_read(&self, caller: &Caller, collection: &DbCollection) -> bool;
    fn can_update(&self, caller: &Caller, collection: &DbCollection) -> bool;
    fn can_delete(&self, caller: &Caller, collection: &DbCollection) -> bool;
}

/// Owner-or-admin rules
///
/// - read: public collections, owners, admins
/// - update: owners and admins
/// - delete: admins, or owners of collections that are not public
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOrAdmin;

impl AccessControl for OwnerOrAdmin {
    fn can_read(&self, caller: &Caller, collection: &DbCollection) -> bool {
        collection.publicly_shared || caller.has_role(ADMIN_ROLE) || caller.is_owner(collection)
    }

    fn can_update(&self, caller: &Caller, collection: &DbCollection) -> bool {
        caller.has_role(ADMIN_ROLE) || caller.is_owner(collection)
    }

    fn can_delete(&self, caller: &Caller, collection: &DbCollection) -> bool {
        caller.has_role(ADMIN_ROLE) || (caller.is_owner(collection) && !collection.publicly_shared)
    }
}
