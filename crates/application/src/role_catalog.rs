use std::collections::{BTreeMap, BTreeSet};

use passage_core::{AppError, AppResult};
use passage_domain::{AccessRole, ApprovalRule};

/// Read-only catalog of roles and approval rules loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: Vec<AccessRole>,
    approval_rules: BTreeMap<String, ApprovalRule>,
}

impl RoleCatalog {
    /// Builds a validated catalog.
    ///
    /// Role names and rule names must be unique. A role's rule reference must
    /// be empty or name a rule in the catalog.
    pub fn new(roles: Vec<AccessRole>, approval_rules: Vec<ApprovalRule>) -> AppResult<Self> {
        let mut rules = BTreeMap::new();
        for rule in approval_rules {
            if rule.name().trim().is_empty() {
                return Err(AppError::Validation(
                    "approval rule name must not be empty".to_owned(),
                ));
            }
            let name = rule.name().to_owned();
            if rules.insert(name.clone(), rule).is_some() {
                return Err(AppError::Validation(format!(
                    "duplicate approval rule '{name}'"
                )));
            }
        }

        let mut role_names = BTreeSet::new();
        for role in &roles {
            role.validate()?;
            if !role_names.insert(role.name()) {
                return Err(AppError::Validation(format!(
                    "duplicate role '{}'",
                    role.name()
                )));
            }

            let rule_name = role.approval_rule_ref().name.as_str();
            if !rule_name.is_empty() && !rules.contains_key(rule_name) {
                return Err(AppError::Validation(format!(
                    "role '{}' references unknown approval rule '{rule_name}'",
                    role.name()
                )));
            }
        }

        Ok(Self {
            roles,
            approval_rules: rules,
        })
    }

    /// Returns roles in configured order.
    #[must_use]
    pub fn roles(&self) -> &[AccessRole] {
        &self.roles
    }

    /// Finds a role by name.
    #[must_use]
    pub fn role(&self, name: &str) -> Option<&AccessRole> {
        self.roles.iter().find(|role| role.name() == name)
    }

    /// Returns all approval rules.
    pub fn approval_rules(&self) -> impl Iterator<Item = &ApprovalRule> {
        self.approval_rules.values()
    }

    /// Returns the rule a role references, or the empty rule.
    #[must_use]
    pub fn approval_rule_for(&self, role: &AccessRole) -> ApprovalRule {
        self.approval_rules
            .get(role.approval_rule_ref().name.as_str())
            .cloned()
            .unwrap_or_default()
    }
}
