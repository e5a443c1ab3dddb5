use std::time::Duration;

use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use bytes::Bytes;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::types::*;
use crate::models::{ProjectListItem, ProjectRecord, Template};
use crate::sse::EventStream;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Validation(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Http(e.to_string())
    }
}

/// HTTP client for the generation backend. A response is classified as
/// success purely by status; success bodies parse as JSON except for the
/// binary export payload, and failure bodies surface as the error detail.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        // No overall request timeout: streaming calls stay open until the
        // backend finishes. Only connection establishment is bounded.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build HTTP client");
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        handle_json(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        handle_json(response).await
    }

    async fn open_stream(&self, request: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }
        Ok(response)
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>, ApiError> {
        let data: TemplateListResponse = self.get_json("/template").await?;
        Ok(data.templates)
    }

    pub async fn save_template(&self, draft: &TemplateDraft) -> Result<Template, ApiError> {
        let data: TemplateSaveResponse = self.post_json("/template/save", draft).await?;
        Ok(data.template)
    }

    /// Open the style-analysis stream for a set of reference images.
    pub async fn analyze_template_stream(
        &self,
        files: Vec<StyleImage>,
    ) -> Result<EventStream<StyleEvent>, ApiError> {
        if files.is_empty() {
            return Err(ApiError::Validation(
                "at least one reference image is required".into(),
            ));
        }
        let mut form = multipart::Form::new();
        for file in files {
            let part = multipart::Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.content_type)
                .map_err(|e| ApiError::Validation(format!("invalid content type: {}", e)))?;
            form = form.part("files", part);
        }
        let response = self
            .open_stream(
                self.http
                    .post(self.url("/template/analyze-stream"))
                    .multipart(form),
            )
            .await?;
        Ok(EventStream::new(response.bytes_stream()))
    }

    /// Open the outline generation stream. Input is validated before any
    /// network call.
    pub async fn generate_outline_stream(
        &self,
        request: &OutlineRequest,
    ) -> Result<EventStream<OutlineEvent>, ApiError> {
        if request.text.trim().is_empty() {
            return Err(ApiError::Validation("source text is required".into()));
        }
        if !(1..=40).contains(&request.slide_count) {
            return Err(ApiError::Validation(
                "slide count must be between 1 and 40".into(),
            ));
        }
        let response = self
            .open_stream(
                self.http
                    .post(self.url("/outline/generate-stream"))
                    .json(request),
            )
            .await?;
        Ok(EventStream::new(response.bytes_stream()))
    }

    pub async fn generate_slide(
        &self,
        request: &SlideGenerateRequest,
    ) -> Result<SlideGenerateResponse, ApiError> {
        self.post_json("/slide/generate", request).await
    }

    pub async fn batch_generate(
        &self,
        request: &BatchGenerateRequest,
    ) -> Result<BatchResult, ApiError> {
        self.post_json("/slide/batch/generate", request).await
    }

    pub async fn batch_status(&self, batch_id: &str) -> Result<BatchStatus, ApiError> {
        let request = BatchStatusRequest {
            batch_id: batch_id.to_string(),
        };
        self.post_json("/slide/batch/status", &request).await
    }

    /// Export the deck; returns the presentation file bytes uninterpreted.
    pub async fn export_pptx(&self, request: &ExportRequest) -> Result<Bytes, ApiError> {
        let response = self
            .http
            .post(self.url("/export/pptx"))
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        handle_bytes(response).await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectListItem>, ApiError> {
        self.get_json("/projects").await
    }

    pub async fn save_project(&self, record: &ProjectRecord) -> Result<ProjectRecord, ApiError> {
        self.post_json("/projects/save", record).await
    }

    pub async fn get_project(&self, id: &str) -> Result<ProjectRecord, ApiError> {
        self.get_json(&format!("/projects/{}", id)).await
    }

    pub async fn delete_project(&self, id: &str) -> Result<DeleteResponse, ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/projects/{}", id)))
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        handle_json(response).await
    }

    pub async fn get_config(&self) -> Result<RuntimeConfig, ApiError> {
        self.get_json("/config").await
    }

    pub async fn update_config(&self, config: &RuntimeConfig) -> Result<RuntimeConfig, ApiError> {
        self.post_json("/config", config).await
    }

    /// Probe the configured AI provider. Transient failures (429/5xx or a
    /// network error) are retried briefly; 4xx responses are not.
    pub async fn test_connection(
        &self,
        request: &ConnectionTestRequest,
    ) -> Result<ConnectionTestResponse, ApiError> {
        let operation = || async {
            let response = self
                .http
                .post(self.url("/config/test"))
                .json(request)
                .send()
                .await
                .map_err(|e| BackoffError::transient(ApiError::Http(e.to_string())))?;

            let status = response.status();
            if status.is_success() {
                let parsed: ConnectionTestResponse = response
                    .json()
                    .await
                    .map_err(|e| BackoffError::permanent(ApiError::InvalidResponse(e.to_string())))?;
                Ok(parsed)
            } else {
                let message = response.text().await.unwrap_or_default();
                let error = ApiError::Status {
                    status: status.as_u16(),
                    message,
                };
                match status {
                    StatusCode::TOO_MANY_REQUESTS => Err(BackoffError::transient(error)),
                    _ if status.as_u16() >= 500 => Err(BackoffError::transient(error)),
                    _ => Err(BackoffError::permanent(error)),
                }
            }
        };

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(4),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, operation).await
    }
}

async fn handle_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    } else {
        Err(status_error(status, response).await)
    }
}

async fn handle_bytes(response: Response) -> Result<Bytes, ApiError> {
    let status = response.status();
    if status.is_success() {
        response
            .bytes()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))
    } else {
        Err(status_error(status, response).await)
    }
}

async fn status_error(status: StatusCode, response: Response) -> ApiError {
    let message = response.text().await.unwrap_or_default();
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}
