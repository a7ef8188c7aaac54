//! Member lookup by display name or user id, and server bookkeeping
//! derived from the client's room cache

use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

use crate::application::errors::ConfigError;
use crate::domain::entities::room::server_name;
use crate::domain::entities::RoomMember;
use crate::domain::similarity::ratio;
use crate::domain::traits::ChatClient;

pub const DEFAULT_FUZZINESS: u8 = 75;

/// How closely a display name has to match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strictness {
    /// Exact match
    Strict,
    /// Case-insensitive match
    #[default]
    Loose,
    /// Best similarity ratio at or above the fuzziness threshold
    Fuzzy,
}

impl FromStr for Strictness {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Strictness::Strict),
            "loose" => Ok(Strictness::Loose),
            "fuzzy" => Ok(Strictness::Fuzzy),
            other => Err(ConfigError::InvalidValue(format!("strictness {}", other))),
        }
    }
}

async fn members_of(client: &dyn ChatClient, room_id: &str) -> Vec<RoomMember> {
    match client.joined_members(room_id).await {
        Ok(members) => members,
        Err(e) => {
            warn!("Could not fetch members of {}: {}", room_id, e);
            Vec::new()
        }
    }
}

/// Pick the member whose display name matches `display_name`
pub fn find_member(
    members: Vec<RoomMember>,
    display_name: &str,
    strictness: Strictness,
    fuzziness: u8,
) -> Option<RoomMember> {
    match strictness {
        Strictness::Strict => members
            .into_iter()
            .find(|m| m.display_name.as_deref() == Some(display_name)),
        Strictness::Loose => {
            let wanted = display_name.to_lowercase();
            members
                .into_iter()
                .find(|m| m.display_name.as_ref().map(|n| n.to_lowercase()) == Some(wanted.clone()))
        }
        Strictness::Fuzzy => {
            let wanted = display_name.to_lowercase();
            // keyed by score, equal scores overwrite earlier members
            let mut by_score: BTreeMap<u8, RoomMember> = BTreeMap::new();
            for member in members {
                let score = match &member.display_name {
                    Some(name) => ratio(&wanted, &name.to_lowercase()),
                    None => continue,
                };
                if score >= fuzziness {
                    by_score.insert(score, member);
                }
            }
            by_score.into_iter().next_back().map(|(_, member)| member)
        }
    }
}

pub async fn is_user_in_room(
    client: &dyn ChatClient,
    room_id: &str,
    display_name: &str,
    strictness: Strictness,
    fuzziness: u8,
) -> Option<RoomMember> {
    let members = members_of(client, room_id).await;
    find_member(members, display_name, strictness, fuzziness)
}

pub async fn is_user_id_in_room(client: &dyn ChatClient, room_id: &str, user_id: &str) -> Option<RoomMember> {
    members_of(client, room_id)
        .await
        .into_iter()
        .find(|m| m.user_id == user_id)
}

/// HTML link to the matching member, or `display_name` unchanged
pub async fn link_user(
    client: &dyn ChatClient,
    room_id: &str,
    display_name: &str,
    strictness: Strictness,
    fuzziness: u8,
) -> String {
    match is_user_in_room(client, room_id, display_name, strictness, fuzziness).await {
        Some(member) => member.link(),
        None => display_name.to_string(),
    }
}

pub async fn link_user_by_id(client: &dyn ChatClient, room_id: &str, user_id: &str) -> String {
    match is_user_id_in_room(client, room_id, user_id).await {
        Some(member) => member.link(),
        None => user_id.to_string(),
    }
}

pub async fn get_mx_user_id(
    client: &dyn ChatClient,
    room_id: &str,
    display_name: &str,
    strictness: Strictness,
    fuzziness: u8,
) -> Option<String> {
    is_user_in_room(client, room_id, display_name, strictness, fuzziness)
        .await
        .map(|m| m.user_id)
}

/// Rooms shared with at least one user of `server`
pub fn get_rooms_for_server(client: &dyn ChatClient, server: &str) -> Vec<String> {
    client
        .rooms()
        .into_values()
        .filter(|room| room.users.keys().any(|u| server_name(u) == Some(server)))
        .map(|room| room.room_id)
        .collect()
}

/// Sorted servers of all users in `rooms`, or in every known room
pub fn get_connected_servers(client: &dyn ChatClient, rooms: Option<&[String]>) -> Vec<String> {
    let mut servers: Vec<String> = Vec::new();
    for room in selected_rooms(client, rooms) {
        for user_id in room.users.keys() {
            if let Some(server) = server_name(user_id) {
                if !servers.iter().any(|s| s == server) {
                    servers.push(server.to_string());
                }
            }
        }
    }
    servers.sort();
    servers
}

/// Users of the given servers in `rooms` (or every known room), per server
pub fn get_users_on_servers(
    client: &dyn ChatClient,
    servers: &[String],
    rooms: Option<&[String]>,
) -> BTreeMap<String, Vec<String>> {
    let mut users: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for room in selected_rooms(client, rooms) {
        for user_id in room.users.keys() {
            let server = match server_name(user_id) {
                Some(s) if servers.iter().any(|wanted| wanted == s) => s,
                _ => continue,
            };
            let entry = users.entry(server.to_string()).or_default();
            if !entry.contains(user_id) {
                entry.push(user_id.clone());
            }
        }
    }
    users
}

fn selected_rooms(client: &dyn ChatClient, rooms: Option<&[String]>) -> Vec<crate::domain::entities::Room> {
    let all = client.rooms();
    match rooms {
        Some(ids) if !ids.is_empty() => ids.iter().filter_map(|id| all.get(id).cloned()).collect(),
        _ => all.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<RoomMember> {
        vec![
            RoomMember::new("@alice:h").with_display_name("Alice"),
            RoomMember::new("@alicia:h").with_display_name("Alicia"),
            RoomMember::new("@nobody:h"),
        ]
    }

    #[test]
    fn strict_requires_exact_name() {
        assert!(find_member(members(), "alice", Strictness::Strict, 75).is_none());
        let m = find_member(members(), "Alice", Strictness::Strict, 75).unwrap();
        assert_eq!(m.user_id, "@alice:h");
    }

    #[test]
    fn loose_ignores_case() {
        let m = find_member(members(), "ALICIA", Strictness::Loose, 75).unwrap();
        assert_eq!(m.user_id, "@alicia:h");
    }

    #[test]
    fn fuzzy_picks_highest_score() {
        let m = find_member(members(), "alise", Strictness::Fuzzy, 75).unwrap();
        assert_eq!(m.user_id, "@alice:h");
        assert!(find_member(members(), "bob", Strictness::Fuzzy, 75).is_none());
    }

    #[test]
    fn fuzzy_ties_go_to_last_member() {
        let twins = vec![
            RoomMember::new("@one:h").with_display_name("Sam"),
            RoomMember::new("@two:h").with_display_name("Sam"),
        ];
        let m = find_member(twins, "sam", Strictness::Fuzzy, 75).unwrap();
        assert_eq!(m.user_id, "@two:h");
    }

    #[test]
    fn parses_strictness() {
        assert_eq!("Fuzzy".parse::<Strictness>().unwrap(), Strictness::Fuzzy);
        assert!("exact".parse::<Strictness>().is_err());
    }
}
