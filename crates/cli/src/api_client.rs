use crate::uploader::{RemoteFile, UploadError, UploadTransport};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use stowage_core::{FileDescriptor, FileId, FileRecord};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Serialize)]
struct ImportRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a FileDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub stores: usize,
}

impl ApiClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::builder()
                .user_agent(concat!("stowagectl/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("failed to build HTTP client")?,
            base_url,
            user_id: None,
        })
    }

    /// Act as `user_id` for store permission checks.
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    fn url(&self, path: &str) -> Result<Url, UploadError> {
        self.base_url
            .join(path)
            .map_err(|e| UploadError::Transport(format!("failed to build API URL: {e}")))
    }

    fn file_url(&self, store: &str, id: FileId, suffix: &str) -> Result<Url, UploadError> {
        self.url(&format!("/v1/stores/{store}/files/{id}{suffix}"))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, UploadError> {
        let req = match &self.user_id {
            Some(user) => req.header("x-user-id", user),
            None => req,
        };
        let response = req
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(UploadError::from_status(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, UploadError> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| UploadError::Transport(format!("invalid response body: {e}")))
    }

    pub async fn health(&self) -> Result<HealthResponse, UploadError> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    /// Current state of a file.
    pub async fn get_file(
        &self,
        store: &str,
        id: FileId,
        token: &str,
    ) -> Result<FileRecord, UploadError> {
        let url = self.file_url(store, id, "")?;
        self.send_json(self.http.get(url).query(&[("token", token)]))
            .await
    }

    pub async fn delete_file(&self, store: &str, id: FileId, token: &str) -> Result<(), UploadError> {
        let url = self.file_url(store, id, "")?;
        self.send(self.http.delete(url).query(&[("token", token)]))
            .await?;
        Ok(())
    }

    /// Have the server fetch `source` into `store`.
    pub async fn import(
        &self,
        store: &str,
        source: &str,
        file: Option<&FileDescriptor>,
    ) -> Result<FileRecord, UploadError> {
        let url = self.url(&format!("/v1/stores/{store}/import"))?;
        let body = ImportRequest { url: source, file };
        self.send_json(self.http.post(url).json(&body)).await
    }
}

#[async_trait]
impl UploadTransport for ApiClient {
    async fn create(
        &self,
        store: &str,
        descriptor: &FileDescriptor,
    ) -> Result<RemoteFile, UploadError> {
        let url = self.url(&format!("/v1/stores/{store}/files"))?;
        self.send_json(self.http.post(url).json(descriptor)).await
    }

    async fn send_chunk(
        &self,
        file: &RemoteFile,
        data: Bytes,
        progress: f64,
    ) -> Result<(), UploadError> {
        let url = Url::parse(&file.url)
            .map_err(|e| UploadError::Transport(format!("invalid upload URL: {e}")))?;
        let progress = progress.to_string();
        let req = self
            .http
            .post(url)
            .query(&[("token", file.token.as_str()), ("progress", progress.as_str())])
            .header("content-type", "application/octet-stream")
            .body(data);
        self.send(req).await?;
        Ok(())
    }

    async fn complete(&self, store: &str, file: &RemoteFile) -> Result<FileRecord, UploadError> {
        let url = self.file_url(store, file.file_id, "/complete")?;
        let body = TokenRequest { token: &file.token };
        self.send_json(self.http.post(url).json(&body)).await
    }

    async fn stop(&self, store: &str, file: &RemoteFile) -> Result<(), UploadError> {
        let url = self.file_url(store, file.file_id, "/stop")?;
        let body = TokenRequest { token: &file.token };
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn delete(&self, store: &str, file: &RemoteFile) -> Result<(), UploadError> {
        self.delete_file(store, file.file_id, &file.token).await
    }
}
