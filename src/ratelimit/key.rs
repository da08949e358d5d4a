//! Client identity used as the rate limiting unit.

use std::fmt;

/// A key that uniquely identifies a client for quota purposes.
///
/// The key is composed of the request's source address and user agent.
/// Equality is exact: no case folding or whitespace trimming is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    /// Source address of the request
    pub address: String,
    /// User-Agent the request was sent with
    pub user_agent: String,
}

impl ClientKey {
    /// Create a new client key from an address and a user agent.
    pub fn new(address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.user_agent)
    }
}
