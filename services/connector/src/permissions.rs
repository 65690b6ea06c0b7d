use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Access scope attached to each materialized document.
///
/// Always derived from the source item's own permissions (a private mailbox
/// is visible to its owner only), never inherited from the connector's
/// broader user/team/org scope, which is always at least as wide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccess {
    pub user_emails: BTreeSet<String>,
}

impl ExternalAccess {
    /// No one can see the item (e.g. owner email unknown).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Visible to a single user.
    pub fn for_user(email: impl Into<String>) -> Self {
        let mut user_emails = BTreeSet::new();
        user_emails.insert(email.into());
        Self { user_emails }
    }

    pub fn is_empty(&self) -> bool {
        self.user_emails.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_user_scopes_to_one_email() {
        let access = ExternalAccess::for_user("owner@example.com");
        assert!(!access.is_empty());
        assert!(access.user_emails.contains("owner@example.com"));
        assert_eq!(access.user_emails.len(), 1);
    }

    #[test]
    fn empty_has_no_users() {
        assert!(ExternalAccess::empty().is_empty());
    }
}
