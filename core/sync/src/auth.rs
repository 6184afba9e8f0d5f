//! Shared-secret check for inbound sync triggers.

use subtle::ConstantTimeEq;

use crmsync_common::{Error, Result, SecretString};

/// Secret callers must present. Unset means every request is accepted.
#[derive(Clone, Default)]
pub struct SharedSecret(Option<SecretString>);

impl SharedSecret {
    /// An empty or whitespace-only secret counts as unset.
    pub fn new(secret: Option<String>) -> Self {
        Self(
            secret
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(SecretString::new),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_some()
    }

    /// Token of an `Authorization: Bearer <token>` header value.
    pub fn bearer_token(authorization: &str) -> Option<&str> {
        let (scheme, token) = authorization.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// Accept the request if either presented value matches the secret.
    ///
    /// # Errors
    /// - `Error::Unauthorized` if a secret is configured and neither value matches
    pub fn verify(&self, bearer: Option<&str>, header: Option<&str>) -> Result<()> {
        let Some(secret) = &self.0 else {
            return Ok(());
        };
        let expected = secret.expose().as_bytes();
        let matches = |candidate: Option<&str>| {
            candidate.map_or(false, |c| bool::from(c.trim().as_bytes().ct_eq(expected)))
        };

        if matches(bearer) || matches(header) {
            Ok(())
        } else {
            Err(Error::Unauthorized("invalid or missing sync secret".to_string()))
        }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedSecret")
            .field(&self.is_configured())
            .finish()
    }
}
