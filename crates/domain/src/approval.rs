use std::collections::BTreeSet;

use passage_core::Principal;
use serde::{Deserialize, Serialize};

use crate::AccessRequest;

/// Named set of users and groups allowed to act on requests referencing it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRule {
    #[serde(default)]
    name: String,
    #[serde(default)]
    author_can_approve: bool,
    #[serde(default)]
    users: BTreeSet<String>,
    #[serde(default)]
    groups: BTreeSet<String>,
}

impl ApprovalRule {
    /// Creates an approval rule.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        author_can_approve: bool,
        users: impl IntoIterator<Item = String>,
        groups: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            author_can_approve,
            users: users.into_iter().collect(),
            groups: groups.into_iter().collect(),
        }
    }

    /// Returns the rule name. Empty for the unresolved rule.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns whether the rule author flag is set.
    #[must_use]
    pub fn author_can_approve(&self) -> bool {
        self.author_can_approve
    }

    /// Returns explicitly listed users.
    #[must_use]
    pub fn users(&self) -> &BTreeSet<String> {
        &self.users
    }

    /// Returns listed groups.
    #[must_use]
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Returns whether the rule is the empty, unresolved rule.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.name.is_empty()
    }

    /// Evaluates the rule for one caller.
    ///
    /// Token principals always pass. A listed user passes even when the rule
    /// has no name. Group membership only counts for named rules.
    #[must_use]
    pub fn permits(&self, principal: &Principal) -> bool {
        if principal.is_service() {
            return true;
        }

        if self.users.contains(principal.user_id()) {
            return true;
        }

        if self.is_unresolved() {
            return false;
        }

        principal
            .groups()
            .iter()
            .any(|group| self.groups.contains(group))
    }
}

/// Returns whether the caller may approve, deny, expire or delete the request.
///
/// Evaluated against the rule snapshot taken when the request was created.
#[must_use]
pub fn can_approve(request: &AccessRequest, principal: &Principal) -> bool {
    request.status().approval_rule().permits(principal)
}
