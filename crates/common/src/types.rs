//! Common types used across Wagerline
//!
//! Bets and matches get engine-assigned UUIDs. Users and events are owned
//! by external systems, so their identifiers are opaque strings.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for bets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BetId(pub Uuid);

impl BetId {
    /// Create a new random BetId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a BetId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub Uuid);

impl MatchId {
    /// Create a new random MatchId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user account in the external identity system
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new UserId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a real-world event (e.g. a game) bets are placed on
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Create a new EventId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Currency classification of a wager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinKind {
    /// Practice coins with no real-world value
    Play,
    /// Coins with real-world value, subject to a daily usage cap
    Stakes,
}

impl CoinKind {
    /// Returns true if this kind is subject to the daily usage cap
    pub fn is_capped(&self) -> bool {
        matches!(self, CoinKind::Stakes)
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "play" => Some(CoinKind::Play),
            "stakes" => Some(CoinKind::Stakes),
            _ => None,
        }
    }

    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinKind::Play => "play",
            CoinKind::Stakes => "stakes",
        }
    }
}

impl std::fmt::Display for CoinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_id() {
        let id1 = BetId::new();
        let id2 = BetId::new();
        assert_ne!(id1, id2);

        let parsed: BetId = id1.to_string().parse().unwrap();
        assert_eq!(parsed, id1);
    }

    #[test]
    fn test_coin_kind() {
        assert_eq!(CoinKind::parse("STAKES"), Some(CoinKind::Stakes));
        assert_eq!(CoinKind::parse("play"), Some(CoinKind::Play));
        assert_eq!(CoinKind::parse("gold"), None);
        assert!(CoinKind::Stakes.is_capped());
        assert!(!CoinKind::Play.is_capped());
    }

    #[test]
    fn test_string_ids_serialize_transparently() {
        let event = EventId::new("nfl-2026-w7-kc-buf");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, "\"nfl-2026-w7-kc-buf\"");
    }
}
