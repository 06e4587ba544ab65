//! Identity roster
//!
//! The static lookup table that maps a venue + email pair to an identity.
//! Loaded from TOML:
//!
//! ```toml
//! [[members]]
//! venue = "ADMIN"
//! email = "admin@example.com"
//! role = "admin"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Identity, Role};

/// One roster row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub venue: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

/// Error type for roster loading
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("Failed to read roster file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse roster TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Roster file not found: {0}")]
    NotFound(PathBuf),
    #[error("Roster entry for venue '{0}' has an empty email")]
    EmptyEmail(String),
    #[error("Duplicate roster entry: {venue} / {email}")]
    Duplicate { venue: String, email: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    #[serde(default)]
    members: Vec<RosterEntry>,
}

impl Roster {
    /// Build from entries, validating them
    pub fn from_entries(members: Vec<RosterEntry>) -> Result<Self, RosterError> {
        let roster = Self { members };
        roster.validate()?;
        Ok(roster)
    }

    /// Load a roster directly from TOML content
    pub fn from_toml(content: &str) -> Result<Self, RosterError> {
        let roster: Roster = toml::from_str(content)?;
        roster.validate()?;
        Ok(roster)
    }

    /// Load a roster file
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        if !path.exists() {
            return Err(RosterError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let roster = Self::from_toml(&content)?;
        debug!(path = %path.display(), members = roster.members.len(), "Roster loaded");
        Ok(roster)
    }

    fn validate(&self) -> Result<(), RosterError> {
        let mut seen = HashSet::new();
        for entry in &self.members {
            let email = normalize_email(&entry.email);
            if email.is_empty() {
                return Err(RosterError::EmptyEmail(entry.venue.clone()));
            }
            if !seen.insert((entry.venue.trim().to_string(), email.clone())) {
                return Err(RosterError::Duplicate {
                    venue: entry.venue.clone(),
                    email,
                });
            }
        }
        Ok(())
    }

    /// Resolve a venue + email pair.
    ///
    /// Venue must match exactly (surrounding whitespace ignored); email is
    /// compared trimmed and case-insensitively.
    pub fn resolve(&self, venue: &str, email: &str) -> Option<Identity> {
        let venue = venue.trim();
        let email = normalize_email(email);
        self.members
            .iter()
            .find(|m| m.venue.trim() == venue && normalize_email(&m.email) == email)
            .map(|m| Identity::new(m.email.trim(), m.venue.trim(), m.role))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"
[[members]]
venue = "ADMIN"
email = "admin@thh.com"
role = "admin"

[[members]]
venue = "College of Engineering Munnar"
email = "Someone@Example.com"
role = "user"

[[members]]
venue = "St. Joseph's College "
email = "joseph@example.com"
"#;

    #[test]
    fn test_resolve_case_insensitive_trimmed() {
        let roster = Roster::from_toml(ROSTER).unwrap();
        let who = roster
            .resolve("College of Engineering Munnar", "  someone@EXAMPLE.com ")
            .unwrap();
        assert_eq!(who.role, Role::User);
        assert_eq!(who.venue, "College of Engineering Munnar");
        assert!(!who.is_privileged());
    }

    #[test]
    fn test_resolve_admin() {
        let roster = Roster::from_toml(ROSTER).unwrap();
        let admin = roster.resolve("ADMIN", "admin@thh.com").unwrap();
        assert!(admin.is_privileged());
        assert_eq!(admin.quota_key(), None);
    }

    #[test]
    fn test_wrong_venue_not_found() {
        let roster = Roster::from_toml(ROSTER).unwrap();
        assert!(roster.resolve("ADMIN", "someone@example.com").is_none());
        assert!(roster.resolve("Nowhere", "admin@thh.com").is_none());
    }

    #[test]
    fn test_role_defaults_to_user_and_venue_trimmed() {
        let roster = Roster::from_toml(ROSTER).unwrap();
        let who = roster.resolve("St. Joseph's College", "joseph@example.com").unwrap();
        assert_eq!(who.role, Role::User);
        assert_eq!(who.venue, "St. Joseph's College");
    }

    #[test]
    fn test_duplicate_rejected() {
        let toml = r#"
[[members]]
venue = "A"
email = "x@y.z"

[[members]]
venue = "A"
email = "X@Y.Z"
"#;
        assert!(matches!(
            Roster::from_toml(toml),
            Err(RosterError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_empty_email_rejected() {
        let entries = vec![RosterEntry {
            venue: "A".into(),
            email: "  ".into(),
            role: Role::User,
        }];
        assert!(matches!(
            Roster::from_entries(entries),
            Err(RosterError::EmptyEmail(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Roster::load(&dir.path().join("roster.toml"));
        assert!(matches!(result, Err(RosterError::NotFound(_))));
    }
}
