//! Emoji reactions on messages: at most one reaction per user per message.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
}

/// What a toggle did to the reaction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Added,
    Replaced,
    Removed,
}

/// Apply a user's reaction: the same emoji again removes it, a different
/// emoji replaces it, otherwise it is added.
pub fn toggle_reaction(
    reactions: &mut Vec<Reaction>,
    user_id: &str,
    emoji: &str,
) -> ReactionChange {
    match reactions.iter().position(|r| r.user_id == user_id) {
        Some(index) if reactions[index].emoji == emoji => {
            reactions.remove(index);
            ReactionChange::Removed
        }
        Some(index) => {
            reactions[index].emoji = emoji.to_string();
            ReactionChange::Replaced
        }
        None => {
            reactions.push(Reaction {
                user_id: user_id.to_string(),
                emoji: emoji.to_string(),
            });
            ReactionChange::Added
        }
    }
}
