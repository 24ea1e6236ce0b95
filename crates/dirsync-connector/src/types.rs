//! Membership snapshot types

use serde::{Deserialize, Serialize};

/// Members of one external group at one point in time.
///
/// Usernames are deduplicated, first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMembership {
    /// External group name.
    pub group_name: String,
    /// Usernames in resolution order.
    pub usernames: Vec<String>,
}

impl ResolvedMembership {
    /// Build a snapshot, dropping duplicate and blank usernames.
    pub fn new(group: impl Into<String>, users: impl IntoIterator<Item = String>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for user in users {
            if !user.trim().is_empty() && !unique.contains(&user) {
                unique.push(user);
            }
        }
        Self {
            group_name: group.into(),
            usernames: unique,
        }
    }

    /// No members were resolved (including when resolution failed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.usernames.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.usernames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let membership = ResolvedMembership::new(
            "eng",
            vec![
                "bob".to_string(),
                "alice".to_string(),
                "bob".to_string(),
                " ".to_string(),
            ],
        );
        assert_eq!(membership.usernames, vec!["bob", "alice"]);
        assert_eq!(membership.len(), 2);
    }

    #[test]
    fn test_empty() {
        let membership = ResolvedMembership::new("ops", Vec::new());
        assert!(membership.is_empty());
    }
}
