//! Authentication method handling
//!
//! The preferred authentication order is configured as a comma separated
//! list and validated against the methods SSH defines.

use crate::error::TransferError;
use std::fmt;
use std::str::FromStr;

/// SSH user authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// GSSAPI (Kerberos)
    GssapiWithMic,
    /// Public key
    PublicKey,
    /// Keyboard interactive
    KeyboardInteractive,
    /// Password
    Password,
}

impl AuthMethod {
    /// All known methods
    pub const ALL: [AuthMethod; 4] = [
        AuthMethod::GssapiWithMic,
        AuthMethod::PublicKey,
        AuthMethod::KeyboardInteractive,
        AuthMethod::Password,
    ];

    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::GssapiWithMic => "gssapi-with-mic",
            AuthMethod::PublicKey => "publickey",
            AuthMethod::KeyboardInteractive => "keyboard-interactive",
            AuthMethod::Password => "password",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuthMethod::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                TransferError::Validation(format!(
                    "Unknown authentication method '{}', expected one of: {}",
                    s,
                    AuthMethod::ALL
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// Parse a comma separated preferred method list
///
/// Whitespace around entries is ignored; empty entries are rejected along
/// with unknown method names.
pub fn parse_auth_methods(list: &str) -> Result<Vec<AuthMethod>, TransferError> {
    let mut methods = Vec::new();
    for raw in list.split(',') {
        let method: AuthMethod = raw.trim().parse()?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}
