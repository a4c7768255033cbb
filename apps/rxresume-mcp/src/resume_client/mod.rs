//! Reactive Resume REST client.
//!
//! Every operation runs on a client created by [`ReactiveResumeClient::login`];
//! the session cookie set by `/auth/login` is carried by reqwest's cookie store
//! for the lifetime of that client.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Client, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod sections;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ResumeClientError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed with status code {0}")]
    Auth(u16),

    #[error("Failed to {action} with status code {status}{}", body_suffix(.body))]
    Status {
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("PDF URL not found in response: {0}")]
    MissingPdfUrl(String),

    #[error("Unexpected response: {0}")]
    Parse(#[from] serde_json::Error),
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(". Response: {}", truncate(body, 200))
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Login identity for one Reactive Resume account.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub base_url: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

/// An authenticated session against one Reactive Resume instance.
pub struct ReactiveResumeClient {
    client: Client,
    base_url: String,
}

impl ReactiveResumeClient {
    /// Authenticates and returns a client carrying the session cookie.
    pub async fn login(credentials: &Credentials) -> Result<Self, ResumeClientError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = credentials.base_url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{base_url}/auth/login"))
            .json(&LoginRequest {
                identifier: &credentials.email,
                password: &credentials.password,
            })
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            warn!("Reactive Resume login returned {}", response.status());
            return Err(ResumeClientError::Auth(response.status().as_u16()));
        }

        debug!("Authenticated against {base_url}");
        Ok(Self { client, base_url })
    }

    /// Public site root: the API base without its trailing `/api`.
    pub fn public_base_url(&self) -> &str {
        self.base_url
            .strip_suffix("/api")
            .unwrap_or(&self.base_url)
    }

    pub async fn current_user(&self) -> Result<Value, ResumeClientError> {
        let response = self
            .client
            .get(format!("{}/user/me", self.base_url))
            .send()
            .await?;
        json_or_status(response, "get user profile").await
    }

    pub async fn list_resumes(&self) -> Result<Vec<Value>, ResumeClientError> {
        let response = self
            .client
            .get(format!("{}/resume", self.base_url))
            .send()
            .await?;
        let body = json_or_status(response, "get resumes").await?;
        Ok(match body {
            Value::Array(items) => items,
            other => serde_json::from_value(other)?,
        })
    }

    pub async fn get_resume(&self, resume_id: &str) -> Result<Value, ResumeClientError> {
        let response = self
            .client
            .get(format!("{}/resume/{resume_id}", self.base_url))
            .send()
            .await?;
        json_or_status(response, "get resume").await
    }

    pub async fn create_resume(&self, body: &Value) -> Result<Value, ResumeClientError> {
        let response = self
            .client
            .post(format!("{}/resume", self.base_url))
            .json(body)
            .send()
            .await?;
        json_or_status(response, "create resume").await
    }

    pub async fn update_resume(
        &self,
        resume_id: &str,
        body: &Value,
    ) -> Result<Value, ResumeClientError> {
        let response = self
            .client
            .patch(format!("{}/resume/{resume_id}", self.base_url))
            .json(body)
            .send()
            .await?;
        json_or_status(response, "update resume").await
    }

    /// Fetches the rendered PDF.
    ///
    /// `/resume/print/{id}` answers either with JSON `{ "url": ... }` pointing
    /// at the rendered file or with the PDF itself; any other content type
    /// falls back to `/resume/export/{id}`.
    pub async fn download_pdf(&self, resume_id: &str) -> Result<Bytes, ResumeClientError> {
        let response = self
            .client
            .get(format!("{}/resume/print/{resume_id}", self.base_url))
            .send()
            .await?;
        let response = ensure_success(response, "get PDF URL").await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.contains("application/json") {
            let body: Value = response.json().await?;
            let url = body
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| ResumeClientError::MissingPdfUrl(body.to_string()))?
                .to_string();
            info!("Downloading rendered PDF for resume {resume_id}");
            let download = self.client.get(&url).send().await?;
            let download = ensure_success(download, "download PDF").await?;
            return Ok(download.bytes().await?);
        }

        if content_type.contains("application/pdf") {
            return Ok(response.bytes().await?);
        }

        debug!("Print endpoint returned '{content_type}', trying export endpoint");
        let export = self
            .client
            .get(format!("{}/resume/export/{resume_id}", self.base_url))
            .send()
            .await?;
        let export = ensure_success(export, "export resume").await?;
        Ok(export.bytes().await?)
    }
}

async fn ensure_success(
    response: Response,
    action: &'static str,
) -> Result<Response, ResumeClientError> {
    let status = response.status();
    if status == reqwest::StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ResumeClientError::Status {
        action,
        status: status.as_u16(),
        body,
    })
}

async fn json_or_status(
    response: Response,
    action: &'static str,
) -> Result<Value, ResumeClientError> {
    let response = ensure_success(response, action).await?;
    Ok(response.json().await?)
}
