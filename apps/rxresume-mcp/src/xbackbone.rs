//! Upload relay to an XBackbone file host.

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum XBackboneError {
    #[error("XBackbone upload failed - {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to upload to XBackbone with status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse XBackbone upload response: {0}")]
    InvalidResponse(String),
}

/// Links returned for one uploaded file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadedFile {
    pub url: String,
    pub raw_url: String,
    pub delete_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

pub struct XBackboneClient {
    client: Client,
    base_url: String,
    token: String,
}

impl XBackboneClient {
    pub fn new(
        base_url: &str,
        token: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self, XBackboneError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Posts the file as multipart `upload` with the account `token`.
    pub async fn upload(
        &self,
        file_name: &str,
        content: Bytes,
    ) -> Result<UploadedFile, XBackboneError> {
        let part = Part::bytes(content.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new()
            .part("upload", part)
            .text("token", self.token.clone());

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !matches!(status.as_u16(), 200 | 201) {
            return Err(XBackboneError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: UploadResponse = serde_json::from_str(&body)
            .map_err(|_| XBackboneError::InvalidResponse(body.chars().take(200).collect()))?;

        info!("Uploaded {file_name} to XBackbone");
        Ok(UploadedFile {
            raw_url: format!("{}/raw", parsed.url),
            delete_url: format!("{}/delete/{}", parsed.url, self.token),
            url: parsed.url,
        })
    }
}
