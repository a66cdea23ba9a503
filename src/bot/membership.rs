//! Group membership verification. Every check queries the chat platform
//! live; the stored snapshot exists for admin inspection only and never
//! short-circuits a future check.

use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::UserId;
use tracing::warn;

use crate::config::RequiredGroup;

#[derive(Debug, Clone)]
pub struct GroupCheck {
    pub chat_id: i64,
    pub name: String,
    pub invite_link: String,
    pub member: bool,
}

/// Query membership in every required group. A failed query counts the
/// group as not joined rather than aborting the whole check.
pub async fn verify_membership(
    bot: &Bot,
    groups: &[RequiredGroup],
    user_id: i64,
) -> Vec<GroupCheck> {
    let mut checks = Vec::with_capacity(groups.len());
    for group in groups {
        let member = match bot
            .get_chat_member(ChatId(group.chat_id), UserId(user_id as u64))
            .await
        {
            // Restricted and left/banned members have not completed the
            // join requirement.
            Ok(m) => m.kind.is_privileged() || m.kind.is_member(),
            Err(e) => {
                warn!(
                    "Membership query failed for user {} in {} ({}): {}",
                    user_id, group.name, group.chat_id, e
                );
                false
            }
        };
        checks.push(GroupCheck {
            chat_id: group.chat_id,
            name: group.name.clone(),
            invite_link: group.invite_link.clone(),
            member,
        });
    }
    checks
}

pub fn all_joined(checks: &[GroupCheck]) -> bool {
    checks.iter().all(|c| c.member)
}

pub fn missing_groups(checks: &[GroupCheck]) -> Vec<&GroupCheck> {
    checks.iter().filter(|c| !c.member).collect()
}

/// Snapshot of the check keyed by chat id, persisted on the user row.
pub fn status_snapshot(checks: &[GroupCheck]) -> serde_json::Value {
    json!(checks
        .iter()
        .map(|c| (c.chat_id.to_string(), c.member))
        .collect::<std::collections::HashMap<_, _>>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(chat_id: i64, name: &str, member: bool) -> GroupCheck {
        GroupCheck {
            chat_id,
            name: name.to_string(),
            invite_link: format!("https://t.me/{name}"),
            member,
        }
    }

    #[test]
    fn one_missing_group_fails_the_whole_check() {
        let checks = vec![check(-100, "GroupA", true), check(-200, "GroupB", false)];
        assert!(!all_joined(&checks));
        let missing = missing_groups(&checks);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "GroupB");
    }

    #[test]
    fn all_member_passes() {
        let checks = vec![check(-100, "GroupA", true), check(-200, "GroupB", true)];
        assert!(all_joined(&checks));
        assert!(missing_groups(&checks).is_empty());
    }

    #[test]
    fn empty_group_list_trivially_passes() {
        assert!(all_joined(&[]));
    }

    #[test]
    fn snapshot_keyed_by_chat_id() {
        let checks = vec![check(-100, "GroupA", true), check(-200, "GroupB", false)];
        let snapshot = status_snapshot(&checks);
        assert_eq!(snapshot["-100"], true);
        assert_eq!(snapshot["-200"], false);
    }
}
