use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

/// Value of `allowed_user_ids` that lets every user through.
pub const ALLOW_ALL: &str = "*";

/// Which users may talk to the bot.
///
/// Parsed from a single string: `*` allows everyone, anything else is split
/// on commas and compared by exact string equality. Entries are not trimmed,
/// so `"123, 456"` allows `"123"` and `" 456"`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum AllowList {
    #[default]
    All,
    Only(HashSet<String>),
}

impl AllowList {
    pub fn parse(spec: &str) -> Self {
        if spec == ALLOW_ALL {
            return AllowList::All;
        }
        AllowList::Only(spec.split(',').map(str::to_string).collect())
    }

    pub fn is_allowed(&self, user_id: &str) -> bool {
        match self {
            AllowList::All => true,
            AllowList::Only(ids) => ids.contains(user_id),
        }
    }
}

impl From<String> for AllowList {
    fn from(spec: String) -> Self {
        AllowList::parse(&spec)
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowList::All => write!(f, "all users"),
            AllowList::Only(ids) => {
                let mut ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                ids.sort_unstable();
                write!(f, "[{}]", ids.join(", "))
            }
        }
    }
}
