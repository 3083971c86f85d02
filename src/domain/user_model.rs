use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserTableError {
    #[error("cannot read users file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed users document: {0}")]
    Parse(#[from] serde_yaml::Error),
}

// YAML types
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserEntry {
    pub groups: Option<Vec<String>>,
    pub password: Option<String>,
}

// Pure types for domain use
#[derive(Clone, Debug, PartialEq)]
pub struct UserRecord {
    pub name: String,
    pub groups: Vec<String>,
    pub password_hash: Option<String>,
}

/// Credential table. Entries missing `groups` or `password` take them from the
/// `default` entry when the document has one.
#[derive(Clone, Debug, Default)]
pub struct UserTable {
    users: Vec<UserRecord>,
}

impl UserTable {
    pub fn parse(text: &str) -> Result<Self, UserTableError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut doc: BTreeMap<String, Option<UserEntry>> = serde_yaml::from_str(text)?;
        let fallback = doc.remove("default").flatten().unwrap_or_default();

        let users = doc
            .into_iter()
            .map(|(name, entry)| {
                let entry = entry.unwrap_or_default();
                UserRecord {
                    name,
                    groups: entry
                        .groups
                        .or_else(|| fallback.groups.clone())
                        .unwrap_or_default(),
                    password_hash: entry.password.or_else(|| fallback.password.clone()),
                }
            })
            .collect();

        Ok(Self { users })
    }

    /// A missing file is an empty table, so a server with no users file
    /// simply has nobody able to log in.
    pub fn load(path: &Path) -> Result<Self, UserTableError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("no users file at {}", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(UserTableError::Read {
                path: path.display().to_string(),
                source: err,
            }),
        }
    }
}

impl UserTable {
    pub fn find(&self, username: &str) -> Option<&UserRecord> {
        self.users
            .iter()
            .find(|u| u.name.eq_ignore_ascii_case(username))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = r#"
default:
  groups: [guests]
alice:
  groups: [pilots]
  password: "$argon2id$alice"
Bob:
  password: "$argon2id$bob"
carol:
"#;

    #[test]
    fn defaults_fill_missing_fields() {
        let table = UserTable::parse(USERS).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.find("alice").unwrap().groups, vec!["pilots"]);
        assert_eq!(table.find("bob").unwrap().groups, vec!["guests"]);
        assert_eq!(table.find("carol").unwrap().password_hash, None);
        assert!(table.find("default").is_none());
    }

    #[test]
    fn lookup_ignores_case() {
        let table = UserTable::parse(USERS).unwrap();
        assert_eq!(table.find("BOB").unwrap().name, "Bob");
        assert_eq!(table.find("ALICE").unwrap().name, "alice");
    }

    #[test]
    fn empty_and_missing_documents_are_empty_tables() {
        assert!(UserTable::parse("").unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        assert!(UserTable::load(&dir.path().join("users.yml")).unwrap().is_empty());
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(UserTable::parse("alice: [unclosed").is_err());
    }
}
