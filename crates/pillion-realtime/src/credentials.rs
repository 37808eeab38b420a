//! Credential provider seam.
//!
//! Token storage and refresh belong to the host application. The connection
//! manager asks for a credential once per handshake so the token it embeds is
//! always the freshest one the host can produce.

use async_trait::async_trait;

use crate::errors::RealtimeError;

/// Supplies the bearer token for the broker handshake.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A freshly validated token, or `None` for anonymous sessions.
    ///
    /// Return [`RealtimeError::Credential`] when a token is required but
    /// cannot be produced; the connect attempt fails without touching the
    /// network.
    async fn credential(&self) -> Result<Option<String>, RealtimeError>;
}

/// A fixed token.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    /// Always hand out `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// No credential.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Result<Option<String>, RealtimeError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials() {
        assert_eq!(
            StaticCredentials::new("t").credential().await.unwrap().as_deref(),
            Some("t")
        );
        assert!(StaticCredentials::anonymous().credential().await.unwrap().is_none());
    }
}
