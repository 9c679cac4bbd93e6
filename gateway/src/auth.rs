//! Request authentication context and API secret matching.

use subtle::ConstantTimeEq;

use crate::config::AuthApiSecret;

/// Authenticated caller, inserted into request extensions by the auth middleware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    /// Id of the matched API secret. `None` when authentication is disabled.
    pub id: Option<String>,
}

impl Auth {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Find the id of the API secret equal to `token`.
///
/// Every configured secret is compared in constant time, and the scan does
/// not stop at the first match.
pub fn match_api_secret_id<'a>(token: &str, secrets: &'a [AuthApiSecret]) -> Option<&'a str> {
    let mut matched = None;
    for entry in secrets {
        if bool::from(token.as_bytes().ct_eq(entry.secret.as_bytes())) && matched.is_none() {
            matched = Some(entry.id.as_str());
        }
    }
    matched
}
