use async_trait::async_trait;

use super::{PresignError, Presigner};

/// Maps storage keys onto the public media route without a backend exchange.
pub struct DirectMediaPresigner {
    media_base_url: String,
}

impl DirectMediaPresigner {
    pub fn new(media_base_url: &str) -> Self {
        Self {
            media_base_url: media_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn build_url(&self, key: &str) -> String {
        if key.starts_with("/media/") {
            format!("{}{}", self.media_base_url, key)
        } else if key.starts_with("media/") {
            format!("{}/{}", self.media_base_url, key)
        } else {
            format!("{}/media/{}", self.media_base_url, urlencoding::encode(key))
        }
    }
}

#[async_trait]
impl Presigner for DirectMediaPresigner {
    async fn presign(&self, key: &str) -> Result<Option<String>, PresignError> {
        Ok(Some(self.build_url(key)))
    }
}
