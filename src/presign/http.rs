use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{PresignError, Presigner, SessionToken};

const PRESIGN_DOWNLOAD_PATH: &str = "/files/presign-download";

#[derive(Debug, Serialize)]
struct PresignDownloadRequest<'a> {
    file_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct PresignDownloadResponse {
    download_url: Option<String>,
}

/// Presigner backed by the API's `POST /files/presign-download` endpoint.
pub struct HttpPresigner {
    client: Client,
    base_url: String,
    token: SessionToken,
}

impl HttpPresigner {
    /// `base_url` is the API host root, i.e. the API base without its `/api` suffix.
    pub fn new(
        base_url: &str,
        token: SessionToken,
        timeout: u64,
        user_agent: &str,
    ) -> Result<Self, PresignError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(user_agent)
            .build()?;

        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: &str, token: SessionToken) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, PRESIGN_DOWNLOAD_PATH)
    }
}

#[async_trait]
impl Presigner for HttpPresigner {
    async fn presign(&self, key: &str) -> Result<Option<String>, PresignError> {
        debug!("Requesting presigned download URL for '{}'", key);

        let mut request = self
            .client
            .post(self.endpoint())
            .json(&PresignDownloadRequest { file_key: key });

        if let Some(token) = self.token.get() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!("Presign request for '{}' failed with status {}. Body: {}", key, status, body);
            return Err(PresignError::StatusError(status.as_u16()));
        }

        let body = response.text().await?;
        let parsed: PresignDownloadResponse = serde_json::from_str(&body)
            .map_err(|e| PresignError::MalformedResponse(e.to_string()))?;

        Ok(parsed.download_url.filter(|url| !url.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn presigner(server: &mockito::ServerGuard, token: Option<&str>) -> HttpPresigner {
        HttpPresigner::new(
            &server.url(),
            SessionToken::new(token.map(str::to_string)),
            5,
            "mediaref-test",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_presign_sends_key_and_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/files/presign-download")
            .match_header("authorization", "Bearer secret-token")
            .match_body(Matcher::Json(json!({ "file_key": "props/42/cover.jpg" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"download_url":"https://cdn.test/x/signed?sig=1"}"#)
            .create_async()
            .await;

        let url = presigner(&server, Some("secret-token"))
            .presign("props/42/cover.jpg")
            .await
            .unwrap();

        assert_eq!(url.as_deref(), Some("https://cdn.test/x/signed?sig=1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_presign_without_token_omits_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/files/presign-download")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"download_url":"https://cdn.test/open"}"#)
            .create_async()
            .await;

        let url = presigner(&server, None).presign("k").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://cdn.test/open"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_presign_missing_or_empty_url_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _empty = server
            .mock("POST", "/files/presign-download")
            .match_body(Matcher::Json(json!({ "file_key": "empty" })))
            .with_status(200)
            .with_body(r#"{"download_url":""}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("POST", "/files/presign-download")
            .match_body(Matcher::Json(json!({ "file_key": "missing" })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let presigner = presigner(&server, None);
        assert_eq!(presigner.presign("empty").await.unwrap(), None);
        assert_eq!(presigner.presign("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_presign_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/files/presign-download")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let err = presigner(&server, None).presign("k").await.unwrap_err();
        assert!(matches!(err, PresignError::StatusError(403)));
    }

    #[tokio::test]
    async fn test_presign_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/files/presign-download")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let err = presigner(&server, None).presign("k").await.unwrap_err();
        assert!(matches!(err, PresignError::MalformedResponse(_)));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let presigner =
            HttpPresigner::with_client(Client::new(), "https://host.test/", SessionToken::default());
        assert_eq!(presigner.endpoint(), "https://host.test/files/presign-download");
    }
}
