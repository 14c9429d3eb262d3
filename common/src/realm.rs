//! Realm identifier validation.
//!
//! A realm namespaces ownership records and storage keys for one principal: `usr_<id>`
//! for a user's own namespace, `tkt_<id>` for a namespace scoped by a ticket. Aliases
//! (`@me`, `~`) are resolved to one of these canonical forms only at the authenticator
//! boundary on the server; this module only ever sees canonical forms, so it never needs
//! to know about aliases.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Realm(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RealmError {
    #[error("realm must start with usr_ or tkt_, got {0:?}")]
    UnknownPrefix(String),
    #[error("realm id part is empty")]
    EmptyId,
}

impl Realm {
    pub fn user(id: &str) -> Self {
        Realm(format!("usr_{id}"))
    }

    pub fn ticket(id: &str) -> Self {
        Realm(format!("tkt_{id}"))
    }

    pub fn parse(raw: &str) -> Result<Self, RealmError> {
        let id = raw
            .strip_prefix("usr_")
            .or_else(|| raw.strip_prefix("tkt_"))
            .ok_or_else(|| RealmError::UnknownPrefix(raw.to_string()))?;
        if id.is_empty() {
            return Err(RealmError::EmptyId);
        }
        Ok(Realm(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ticket(&self) -> bool {
        self.0.starts_with("tkt_")
    }

    pub fn is_user(&self) -> bool {
        self.0.starts_with("usr_")
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_user_and_ticket_prefixes() {
        assert!(Realm::parse("usr_abc").is_ok());
        assert!(Realm::parse("tkt_abc").is_ok());
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert_eq!(
            Realm::parse("agt_abc"),
            Err(RealmError::UnknownPrefix("agt_abc".to_string()))
        );
    }

    #[test]
    fn rejects_empty_id() {
        assert_eq!(Realm::parse("usr_"), Err(RealmError::EmptyId));
    }
}
