use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A joined member of a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomMember {
    pub user_id: String,
    pub display_name: Option<String>,
}

impl RoomMember {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name if set, the user id otherwise
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }

    /// HTML anchor pointing at the member's matrix.to permalink
    pub fn link(&self) -> String {
        format!(
            "<a href=\"https://matrix.to/#/{}\">{}</a>",
            self.user_id,
            self.name()
        )
    }
}

impl fmt::Display for RoomMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Server name of a user id: everything after the first `:`
pub fn server_name(user_id: &str) -> Option<&str> {
    user_id.split_once(':').map(|(_, server)| server)
}

/// Per-room power level table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLevels {
    #[serde(default)]
    pub users: HashMap<String, i64>,
    #[serde(default)]
    pub users_default: i64,
}

impl PowerLevels {
    pub fn get_user_level(&self, user_id: &str) -> i64 {
        self.users
            .get(user_id)
            .copied()
            .unwrap_or(self.users_default)
    }
}

/// Snapshot of a room as known from the client's room cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub name: Option<String>,
    /// user id -> display name
    pub users: BTreeMap<String, Option<String>>,
    pub power_levels: PowerLevels,
    /// Marked as a direct chat by the inviter
    pub is_direct: bool,
}

impl Room {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_member(mut self, user_id: impl Into<String>, display_name: Option<&str>) -> Self {
        self.users
            .insert(user_id.into(), display_name.map(str::to_string));
        self
    }

    pub fn with_power_level(mut self, user_id: impl Into<String>, level: i64) -> Self {
        self.power_levels.users.insert(user_id.into(), level);
        self
    }

    pub fn direct(mut self) -> Self {
        self.is_direct = true;
        self
    }

    pub fn member_count(&self) -> usize {
        self.users.len()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.room_id)
    }

    pub fn user_name<'a>(&'a self, user_id: &'a str) -> &'a str {
        self.users
            .get(user_id)
            .and_then(|n| n.as_deref())
            .unwrap_or(user_id)
    }

    pub fn members(&self) -> Vec<RoomMember> {
        self.users
            .iter()
            .map(|(id, name)| RoomMember {
                user_id: id.clone(),
                display_name: name.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_level_falls_back_to_default() {
        let mut levels = PowerLevels::default();
        levels.users.insert("@admin:h".into(), 100);
        levels.users_default = 5;
        assert_eq!(levels.get_user_level("@admin:h"), 100);
        assert_eq!(levels.get_user_level("@other:h"), 5);
    }

    #[test]
    fn server_name_is_suffix_after_first_colon() {
        assert_eq!(server_name("@alice:example.org"), Some("example.org"));
        assert_eq!(server_name("@bob:host:8448"), Some("host:8448"));
        assert_eq!(server_name("nobody"), None);
    }

    #[test]
    fn member_link_uses_display_name() {
        let member = RoomMember::new("@alice:h").with_display_name("Alice");
        assert_eq!(member.link(), "<a href=\"https://matrix.to/#/@alice:h\">Alice</a>");
    }
}
