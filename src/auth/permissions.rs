use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewRecords,
    ViewOwnProfile,

    ManageRecords,
    ImportTerms,

    ManageUsers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Viewer,
    Coordinator,
    Admin,
}

static VIEWER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProfile);
    permissions.insert(Permission::ViewRecords);

    permissions
});

static COORDINATOR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(VIEWER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageRecords);
    permissions.insert(Permission::ImportTerms);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(COORDINATOR_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageUsers);

    permissions
});

impl Role {
    pub const ALL: [Role; 3] = [Role::Viewer, Role::Coordinator, Role::Admin];

    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Viewer => &VIEWER_PERMISSIONS,
            Role::Coordinator => &COORDINATOR_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Coordinator => "coordinator",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "coordinator" => Ok(Role::Coordinator),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_inherits_coordinator_permissions() {
        assert!(Role::Admin.has_permission(Permission::ManageRecords));
        assert!(Role::Admin.has_permission(Permission::ManageUsers));
        assert!(Role::Coordinator.has_permission(Permission::ImportTerms));
        assert!(!Role::Coordinator.has_permission(Permission::ManageUsers));
        assert!(!Role::Viewer.has_permission(Permission::ManageRecords));
    }

    #[test]
    fn every_role_may_view_own_profile() {
        for role in Role::ALL {
            assert!(role.has_permission(Permission::ViewOwnProfile));
        }
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
        assert!(Role::from_str("student").is_err());
    }
}
