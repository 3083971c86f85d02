use serde::Deserialize;
use serde::Serialize;

pub const SESSION_EXPIRES_IN_SECONDS: u64 = 86400;
pub const SESSION_COOKIE: &str = "token";

// Pure types for domain use
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user: String,
    pub groups: Vec<String>,
}

/// Identity attached to a request. An anonymous caller has no user and no
/// groups; it can still be granted view access by open missions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Caller {
    pub user: Option<String>,
    pub groups: Vec<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn named(user: &str, groups: &[&str]) -> Self {
        Self {
            user: Some(user.to_string()),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn is_identified(&self) -> bool {
        self.user.is_some()
    }

    pub fn listed_in(&self, users: Option<&[String]>) -> bool {
        match (&self.user, users) {
            (Some(user), Some(users)) => users.iter().any(|u| u == user),
            _ => false,
        }
    }

    pub fn shares_group(&self, groups: Option<&[String]>) -> bool {
        match groups {
            Some(groups) => self.groups.iter().any(|g| groups.contains(g)),
            None => false,
        }
    }
}

impl From<SessionClaims> for Caller {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user: Some(claims.user),
            groups: claims.groups,
        }
    }
}

// HTTP input types
#[derive(Deserialize)]
pub struct CredentialsInput {
    pub username: String,
    pub password: String,
}
