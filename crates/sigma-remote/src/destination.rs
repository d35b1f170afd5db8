//! Remote host addressing.

use std::fmt;

/// Where a worker lives: `user@host`, or just `host` when no user is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub user: Option<String>,
}

impl Destination {
    pub fn new(host: impl Into<String>, user: Option<String>) -> Self {
        Self {
            host: host.into(),
            user,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{user}@{}", self.host),
            None => f.write_str(&self.host),
        }
    }
}
