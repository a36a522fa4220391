//! Principal types: the two disjoint identities a session can carry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variant tag distinguishing donors from administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Donor,
    Admin,
}

impl PrincipalKind {
    /// Parse the tag persisted in credential storage.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "donor" => Some(Self::Donor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Tag string written to credential storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donor => "donor",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived view of the active session kind, including "nobody".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    Donor,
    Admin,
    None,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donor => "donor",
            Self::Admin => "admin",
            Self::None => "none",
        }
    }
}

impl From<PrincipalKind> for UserType {
    fn from(kind: PrincipalKind) -> Self {
        match kind {
            PrincipalKind::Donor => Self::Donor,
            PrincipalKind::Admin => Self::Admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donor {
    pub id: i64,
    pub username: String,
    pub age: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Administrator {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Donor(Donor),
    Admin(Administrator),
}

impl Principal {
    pub fn kind(&self) -> PrincipalKind {
        match self {
            Self::Donor(_) => PrincipalKind::Donor,
            Self::Admin(_) => PrincipalKind::Admin,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Donor(d) => d.id,
            Self::Admin(a) => a.id,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Donor(d) => &d.username,
            Self::Admin(a) => &a.username,
        }
    }
}

impl From<Donor> for Principal {
    fn from(donor: Donor) -> Self {
        Self::Donor(donor)
    }
}

impl From<Administrator> for Principal {
    fn from(admin: Administrator) -> Self {
        Self::Admin(admin)
    }
}
