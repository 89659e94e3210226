//! Role-based grants per address pattern.
//!
//! Unlike address settings, role sets are not overridden by more specific
//! patterns: every matching pattern contributes its grants and the resolved
//! set is their union.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::settings::overlay::Mergeable;

/// Operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckType {
    Send,
    Consume,
    CreateDurableQueue,
    DeleteDurableQueue,
    CreateNonDurableQueue,
    DeleteNonDurableQueue,
    Manage,
    Browse,
    CreateAddress,
    DeleteAddress,
}

/// A named role and the operations it may perform.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct Role {
    pub name: String,
    pub send: bool,
    pub consume: bool,
    pub create_durable_queue: bool,
    pub delete_durable_queue: bool,
    pub create_non_durable_queue: bool,
    pub delete_non_durable_queue: bool,
    pub manage: bool,
    pub browse: bool,
    pub create_address: bool,
    pub delete_address: bool,
}

impl Role {
    /// A role with no permissions.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn allows(&self, check: CheckType) -> bool {
        match check {
            CheckType::Send => self.send,
            CheckType::Consume => self.consume,
            CheckType::CreateDurableQueue => self.create_durable_queue,
            CheckType::DeleteDurableQueue => self.delete_durable_queue,
            CheckType::CreateNonDurableQueue => self.create_non_durable_queue,
            CheckType::DeleteNonDurableQueue => self.delete_non_durable_queue,
            CheckType::Manage => self.manage,
            CheckType::Browse => self.browse,
            CheckType::CreateAddress => self.create_address,
            CheckType::DeleteAddress => self.delete_address,
        }
    }
}

/// Set of roles granted on a pattern, or resolved for an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.0.iter()
    }

    pub fn contains_role(&self, name: &str) -> bool {
        self.0.iter().any(|r| r.name == name)
    }

    /// True if any of `user_roles` is granted `check`.
    pub fn permits(&self, user_roles: &[&str], check: CheckType) -> bool {
        self.0
            .iter()
            .any(|role| user_roles.contains(&role.name.as_str()) && role.allows(check))
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Mergeable for RoleSet {
    type Resolved = RoleSet;

    fn merge(&mut self, less_specific: &Self) {
        self.0.extend(less_specific.0.iter().cloned());
    }

    fn resolve(self) -> RoleSet {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(name: &str) -> Role {
        Role {
            name: name.into(),
            send: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_is_union() {
        let mut specific: RoleSet = [sender("a")].into_iter().collect();
        let general: RoleSet = [Role::named("b"), sender("a")].into_iter().collect();

        specific.merge(&general);
        assert_eq!(specific.len(), 2);
        assert!(specific.contains_role("a"));
        assert!(specific.contains_role("b"));
    }

    #[test]
    fn test_permits() {
        let roles: RoleSet = [sender("producers"), Role::named("guests")]
            .into_iter()
            .collect();

        assert!(roles.permits(&["producers"], CheckType::Send));
        assert!(!roles.permits(&["producers"], CheckType::Consume));
        assert!(!roles.permits(&["guests"], CheckType::Send));
        assert!(!roles.permits(&["unknown"], CheckType::Send));
    }
}
