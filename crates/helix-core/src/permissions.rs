//! Permission levels used by identity claims and event contexts.
//!
//! Levels are ordered: a session holding `UPDATE` may see anything that
//! requires `READ`, `CREATE` or `UPDATE`, but not `DELETE`. `ALL` is an alias
//! for `DELETE`, the highest level.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Access level, compared numerically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionLevel {
    /// View an entity.
    Read = 1,
    /// Create entities.
    Create = 2,
    /// Modify entities.
    Update = 3,
    /// Remove entities. Also spelled `ALL`.
    Delete = 5,
}

/// A permission string that names no known level.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown permission level: {0}")]
pub struct ParsePermissionError(pub String);

impl PermissionLevel {
    /// Numeric value of the level.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Whether holding `self` is enough for an operation needing `required`.
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        self >= required
    }

    fn from_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Read),
            2 => Some(Self::Create),
            3 => Some(Self::Update),
            5 => Some(Self::Delete),
            _ => None,
        }
    }
}

impl FromStr for PermissionLevel {
    type Err = ParsePermissionError;

    /// Accepts names case-insensitively (`read`, `ALL`, ...) or the numeric
    /// value (`"3"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "READ" => return Ok(Self::Read),
            "CREATE" => return Ok(Self::Create),
            "UPDATE" | "MODIFY" => return Ok(Self::Update),
            "DELETE" | "REMOVE" | "ALL" => return Ok(Self::Delete),
            _ => {}
        }
        trimmed
            .parse::<u64>()
            .ok()
            .and_then(Self::from_value)
            .ok_or_else(|| ParsePermissionError(s.to_owned()))
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PermissionLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PermissionLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn numeric_values() {
        assert_eq!(PermissionLevel::Read.value(), 1);
        assert_eq!(PermissionLevel::Create.value(), 2);
        assert_eq!(PermissionLevel::Update.value(), 3);
        assert_eq!(PermissionLevel::Delete.value(), 5);
    }

    #[test]
    fn parse_names_case_insensitive() {
        assert_eq!("read".parse(), Ok(PermissionLevel::Read));
        assert_eq!("Create".parse(), Ok(PermissionLevel::Create));
        assert_eq!("UPDATE".parse(), Ok(PermissionLevel::Update));
        assert_eq!(" delete ".parse(), Ok(PermissionLevel::Delete));
    }

    #[test]
    fn all_is_delete() {
        assert_eq!("ALL".parse(), Ok(PermissionLevel::Delete));
    }

    #[test]
    fn parse_numeric() {
        assert_eq!("1".parse(), Ok(PermissionLevel::Read));
        assert_eq!("5".parse(), Ok(PermissionLevel::Delete));
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_matches!("4".parse::<PermissionLevel>(), Err(ParsePermissionError(_)));
        assert_matches!("admin".parse::<PermissionLevel>(), Err(ParsePermissionError(_)));
        assert_matches!("".parse::<PermissionLevel>(), Err(_));
    }

    #[test]
    fn higher_level_satisfies_lower() {
        assert!(PermissionLevel::Delete.satisfies(PermissionLevel::Read));
        assert!(PermissionLevel::Update.satisfies(PermissionLevel::Update));
        assert!(!PermissionLevel::Read.satisfies(PermissionLevel::Create));
    }

    #[test]
    fn serde_uses_names() {
        let json = serde_json::to_string(&PermissionLevel::Update).unwrap();
        assert_eq!(json, "\"UPDATE\"");
        let back: PermissionLevel = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(back, PermissionLevel::Delete);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn level() -> impl Strategy<Value = PermissionLevel> {
            prop_oneof![
                Just(PermissionLevel::Read),
                Just(PermissionLevel::Create),
                Just(PermissionLevel::Update),
                Just(PermissionLevel::Delete),
            ]
        }

        proptest! {
            #[test]
            fn satisfies_matches_numeric_order(a in level(), b in level()) {
                prop_assert_eq!(a.satisfies(b), a.value() >= b.value());
            }

            #[test]
            fn display_parses_back(a in level()) {
                prop_assert_eq!(a.to_string().parse::<PermissionLevel>(), Ok(a));
            }
        }
    }
}
