//! Access-tier authorization: admin set, group allow-list, paid-tier rule.

use std::sync::Mutex;

use crate::domain::{ChatId, UserId};

/// Result of registering a group id. Duplicate registration is idempotent
/// and reported, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddGroupOutcome {
    Added,
    AlreadyAdded,
}

/// Authorization decisions for search tiers and admin commands.
///
/// The admin set is fixed at startup; the group allow-list is mutable at
/// runtime via `/addgroup` (admin-only, enforced by the command handler
/// through [`AccessPolicy::authorize_admin_command`]).
#[derive(Debug)]
pub struct AccessPolicy {
    admin_ids: Vec<i64>,
    groups: Mutex<Vec<i64>>,
}

impl AccessPolicy {
    pub fn new(admin_ids: Vec<i64>, initial_groups: Vec<i64>) -> Self {
        Self {
            admin_ids,
            groups: Mutex::new(initial_groups),
        }
    }

    /// True iff the identity is in the fixed admin set.
    pub fn authorize_admin_command(&self, user_id: UserId) -> bool {
        self.admin_ids.contains(&user_id.0)
    }

    /// Group-gated commands: an empty allow-list means "no restriction".
    pub fn authorize_group(&self, chat_id: ChatId) -> bool {
        let groups = self.groups.lock().expect("group set lock poisoned");
        groups.is_empty() || groups.contains(&chat_id.0)
    }

    /// Paid tier: admins are authorized everywhere; everyone else only in
    /// group contexts (`chat_id <= 0` — private chats carry positive ids).
    pub fn authorize_paid(&self, user_id: UserId, chat_id: ChatId) -> bool {
        self.authorize_admin_command(user_id) || chat_id.0 <= 0
    }

    pub fn add_group(&self, group_id: i64) -> AddGroupOutcome {
        let mut groups = self.groups.lock().expect("group set lock poisoned");
        if groups.contains(&group_id) {
            return AddGroupOutcome::AlreadyAdded;
        }
        groups.push(group_id);
        AddGroupOutcome::Added
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().expect("group set lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_group_list_means_no_restriction() {
        let p = AccessPolicy::new(vec![1], vec![]);
        assert!(p.authorize_group(ChatId(-100123)));
        assert!(p.authorize_group(ChatId(42)));
    }

    #[test]
    fn configured_group_list_is_a_membership_test() {
        let p = AccessPolicy::new(vec![1], vec![-100123]);
        assert!(p.authorize_group(ChatId(-100123)));
        assert!(!p.authorize_group(ChatId(-100999)));
    }

    #[test]
    fn paid_requires_admin_in_private_chats() {
        let p = AccessPolicy::new(vec![7], vec![]);

        // Admin is authorized anywhere.
        assert!(p.authorize_paid(UserId(7), ChatId(7)));
        assert!(p.authorize_paid(UserId(7), ChatId(-100123)));

        // Non-admin: group chat ok, private chat denied.
        assert!(p.authorize_paid(UserId(8), ChatId(-100123)));
        assert!(!p.authorize_paid(UserId(8), ChatId(8)));
    }

    #[test]
    fn admin_command_checks_fixed_set() {
        let p = AccessPolicy::new(vec![7, 9], vec![]);
        assert!(p.authorize_admin_command(UserId(9)));
        assert!(!p.authorize_admin_command(UserId(8)));
    }

    #[test]
    fn add_group_is_idempotent() {
        let p = AccessPolicy::new(vec![1], vec![]);
        assert_eq!(p.add_group(-100123), AddGroupOutcome::Added);
        assert_eq!(p.add_group(-100123), AddGroupOutcome::AlreadyAdded);
        assert_eq!(p.group_count(), 1);
    }
}
