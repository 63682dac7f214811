mod direct;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

pub use direct::DirectMediaPresigner;
pub use http::HttpPresigner;

#[derive(Error, Debug)]
pub enum PresignError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Presign request failed with status: {0}")]
    StatusError(u16),

    #[error("Malformed presign response: {0}")]
    MalformedResponse(String),
}

/// Exchanges an opaque storage key for a directly fetchable URL.
///
/// `Ok(None)` means the backend answered but gave no usable URL.
#[async_trait]
pub trait Presigner: Send + Sync {
    async fn presign(&self, key: &str) -> Result<Option<String>, PresignError>;
}

/// Bearer token shared by every request of a session. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SessionToken {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.filter(|t| !t.is_empty()))),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        *self.token.write() = if token.is_empty() { None } else { Some(token) };
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_shared_between_clones() {
        let token = SessionToken::new(None);
        let other = token.clone();
        assert_eq!(token.get(), None);

        other.set("abc");
        assert_eq!(token.get().as_deref(), Some("abc"));

        token.set("");
        assert_eq!(other.get(), None);

        token.set("def");
        other.clear();
        assert_eq!(token.get(), None);
    }
}
