//! Reactive Resume tools.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{required_str, Tool, ToolContext, ToolError};
use crate::resume_client::sections::{apply_section_change, build_update_payload, SectionOperation};
use crate::resume_client::ReactiveResumeClient;
use crate::xbackbone::XBackboneClient;

const RESUME_ID_REQUIRED: &str = "Resume ID is required";

fn auth_schema() -> Value {
    json!({
        "type": "object",
        "description": "Optional Reactive Resume credentials; defaults come from the server environment",
        "properties": {
            "email": { "type": "string" },
            "password": { "type": "string" },
            "base_url": { "type": "string" }
        }
    })
}

async fn login(ctx: &ToolContext, args: &Value) -> Result<ReactiveResumeClient, ToolError> {
    let credentials = ctx.credentials(args)?;
    Ok(ReactiveResumeClient::login(&credentials).await?)
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Compact listing entry; public resumes get a shareable URL.
fn summarize_resume(resume: &Value, username: Option<&str>, public_base: &str) -> Value {
    let id = str_field(resume, "id");
    let visibility = resume
        .get("visibility")
        .and_then(Value::as_str)
        .unwrap_or("private");

    let mut entry = json!({
        "id": id,
        "title": str_field(resume, "title"),
        "slug": str_field(resume, "slug"),
        "visibility": visibility,
        "created_at": resume.get("createdAt").cloned().unwrap_or(Value::Null),
        "updated_at": resume.get("updatedAt").cloned().unwrap_or(Value::Null),
    });

    if let (Some(username), "public") = (username, visibility) {
        let short_id: String = id.chars().take(8).collect();
        entry["public_url"] = json!(format!("{public_base}/{username}/resume-{short_id}"));
    }
    entry
}

/// PATCH body for `update_resume`: current document with the given
/// overrides. `basics` is merged key by key.
fn merge_resume_update(current: &Value, args: &Value) -> Value {
    let mut data = current.get("data").cloned().unwrap_or_else(|| json!({}));

    if let Some(Value::Object(patch)) = args.get("basics") {
        let basics = data
            .as_object_mut()
            .map(|d| d.entry("basics").or_insert_with(|| json!({})));
        if let Some(Value::Object(basics)) = basics {
            for (key, value) in patch {
                basics.insert(key.clone(), value.clone());
            }
        }
    }

    let pick = |key: &str| {
        args.get(key)
            .filter(|v| !v.is_null())
            .or_else(|| current.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    };

    json!({
        "title": pick("title"),
        "slug": pick("slug"),
        "visibility": pick("visibility"),
        "data": data,
    })
}

pub struct ListResumes {
    ctx: Arc<ToolContext>,
}

impl ListResumes {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ListResumes {
    fn name(&self) -> &'static str {
        "list_resumes"
    }

    fn description(&self) -> &'static str {
        "List all resumes for the authenticated Reactive Resume user"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "include_public_urls": {
                    "type": "boolean",
                    "description": "Add public URLs for resumes with public visibility",
                    "default": true
                },
                "auth": auth_schema()
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let include_public_urls = args
            .get("include_public_urls")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let client = login(&self.ctx, &args).await?;

        let username = if include_public_urls {
            match client.current_user().await {
                Ok(user) => user
                    .get("username")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                Err(e) => {
                    warn!("Could not resolve username for public URLs: {e}");
                    None
                }
            }
        } else {
            None
        };

        let resumes: Vec<Value> = client
            .list_resumes()
            .await?
            .iter()
            .map(|r| summarize_resume(r, username.as_deref(), client.public_base_url()))
            .collect();

        Ok(json!({ "count": resumes.len(), "resumes": resumes }))
    }
}

pub struct GetResume {
    ctx: Arc<ToolContext>,
}

impl GetResume {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GetResume {
    fn name(&self) -> &'static str {
        "get_resume"
    }

    fn description(&self) -> &'static str {
        "Get the full document of one resume by ID"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resume_id": { "type": "string", "description": "ID of the resume" },
                "auth": auth_schema()
            },
            "required": ["resume_id"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let resume_id = required_str(&args, "resume_id", RESUME_ID_REQUIRED)?;
        let client = login(&self.ctx, &args).await?;
        Ok(client.get_resume(resume_id).await?)
    }
}

pub struct CreateResume {
    ctx: Arc<ToolContext>,
}

impl CreateResume {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for CreateResume {
    fn name(&self) -> &'static str {
        "create_resume"
    }

    fn description(&self) -> &'static str {
        "Create a new, empty resume"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Title of the resume" },
                "slug": { "type": "string", "description": "URL slug; generated when omitted" },
                "visibility": {
                    "type": "string",
                    "enum": ["private", "public"],
                    "default": "private"
                },
                "auth": auth_schema()
            },
            "required": ["title"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let title = required_str(&args, "title", "Resume title is required")?;
        let slug = args
            .get("slug")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let hex = Uuid::new_v4().simple().to_string();
                format!("resume-{}", &hex[..8])
            });
        let visibility = args
            .get("visibility")
            .and_then(Value::as_str)
            .unwrap_or("private");
        if !matches!(visibility, "private" | "public") {
            return Err(ToolError::InvalidArguments(
                "Visibility must be 'private' or 'public'".into(),
            ));
        }

        let client = login(&self.ctx, &args).await?;
        let created = client
            .create_resume(&json!({ "title": title, "slug": slug, "visibility": visibility }))
            .await?;
        let id = str_field(&created, "id");
        info!("Created resume {id}");

        Ok(json!({
            "message": format!("Resume created: {title} (ID: {id})"),
            "id": id,
            "title": title,
            "slug": created.get("slug").cloned().unwrap_or(json!(slug)),
            "visibility": visibility,
        }))
    }
}

pub struct UpdateResume {
    ctx: Arc<ToolContext>,
}

impl UpdateResume {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for UpdateResume {
    fn name(&self) -> &'static str {
        "update_resume"
    }

    fn description(&self) -> &'static str {
        "Update a resume's title, slug, visibility or basics"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resume_id": { "type": "string" },
                "title": { "type": "string" },
                "slug": { "type": "string" },
                "visibility": { "type": "string", "enum": ["private", "public"] },
                "basics": {
                    "type": "object",
                    "description": "Fields merged into the resume's basics (name, headline, email, ...)"
                },
                "auth": auth_schema()
            },
            "required": ["resume_id"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let resume_id = required_str(&args, "resume_id", RESUME_ID_REQUIRED)?;
        let client = login(&self.ctx, &args).await?;

        let current = client.get_resume(resume_id).await?;
        let payload = merge_resume_update(&current, &args);
        let updated = client.update_resume(resume_id, &payload).await?;
        info!("Updated resume {resume_id}");

        let title = updated
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_else(|| str_field(&payload, "title"));
        Ok(json!({
            "message": format!("Resume updated: {title} (ID: {resume_id})"),
            "id": resume_id,
            "title": title,
            "updated_at": updated.get("updatedAt").cloned().unwrap_or(Value::Null),
        }))
    }
}

pub struct UpdateResumeSection {
    ctx: Arc<ToolContext>,
}

impl UpdateResumeSection {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for UpdateResumeSection {
    fn name(&self) -> &'static str {
        "update_resume_section"
    }

    fn description(&self) -> &'static str {
        "Update, add or remove items in one section of a resume"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resume_id": { "type": "string" },
                "section_name": {
                    "type": "string",
                    "description": "Section to change, e.g. experience, education, skills, summary"
                },
                "operation": { "type": "string", "enum": ["update", "add", "remove"] },
                "data": {
                    "type": "object",
                    "description": "{\"items\": [...]} for list sections, {\"content\": \"...\"} for summary"
                },
                "auth": auth_schema()
            },
            "required": ["resume_id", "section_name", "operation", "data"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let resume_id = required_str(&args, "resume_id", RESUME_ID_REQUIRED)?;
        let section_name = required_str(&args, "section_name", "Section name is required")?;
        let operation: SectionOperation =
            required_str(&args, "operation", "Operation is required")?.parse()?;
        let data = args
            .get("data")
            .filter(|d| d.is_object())
            .ok_or_else(|| ToolError::InvalidArguments("Data is required".into()))?;

        let client = login(&self.ctx, &args).await?;
        let current = client.get_resume(resume_id).await?;

        let mut payload = build_update_payload(&current);
        let mut sections = match payload["data"]["sections"].take() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        apply_section_change(&mut sections, section_name, operation, data)?;
        payload["data"]["sections"] = Value::Object(sections);

        let updated = client.update_resume(resume_id, &payload).await?;
        info!("Applied {operation} to section {section_name} of resume {resume_id}");

        Ok(json!({
            "message": format!("Resume section updated: {section_name} ({operation})"),
            "resume_id": resume_id,
            "section": section_name,
            "operation": operation.to_string(),
            "timestamp": updated.get("updatedAt").cloned().unwrap_or(Value::Null),
        }))
    }
}

pub struct DownloadResumePdf {
    ctx: Arc<ToolContext>,
}

impl DownloadResumePdf {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }

    fn output_path(&self, args: &Value) -> PathBuf {
        match args.get("output_path").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Path::new(&self.ctx.resume.pdf_output_dir).join("resume.pdf"),
        }
    }

    /// Upload target: explicit arguments win over configuration. Returns
    /// `None` when uploading is not requested.
    fn upload_target(&self, args: &Value) -> Result<Option<(String, String)>, ToolError> {
        let pick = |key: &str, fallback: Option<&String>| {
            args.get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| fallback.cloned())
        };
        let url = pick("xbackbone_url", self.ctx.xbackbone.url.as_ref());
        let token = pick("xbackbone_token", self.ctx.xbackbone.token.as_ref());

        let requested = args.get("upload_to_xbackbone").and_then(Value::as_bool);
        match (requested, url, token) {
            (Some(false), _, _) => Ok(None),
            (_, Some(url), Some(token)) => Ok(Some((url, token))),
            (Some(true), _, _) => Err(ToolError::InvalidArguments(
                "XBackbone upload requested but URL or token is not configured".into(),
            )),
            (None, _, _) => Ok(None),
        }
    }
}

#[async_trait]
impl Tool for DownloadResumePdf {
    fn name(&self) -> &'static str {
        "download_resume_pdf"
    }

    fn description(&self) -> &'static str {
        "Download a resume as PDF, save it locally and optionally upload it to XBackbone"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resume_id": { "type": "string" },
                "output_path": {
                    "type": "string",
                    "description": "Where to save the PDF; defaults to resume.pdf in the output directory"
                },
                "upload_to_xbackbone": {
                    "type": "boolean",
                    "description": "Upload the PDF to XBackbone; defaults to true when XBackbone is configured"
                },
                "xbackbone_url": { "type": "string" },
                "xbackbone_token": { "type": "string" },
                "return_base64": {
                    "type": "boolean",
                    "description": "Include the PDF as base64 in the result",
                    "default": false
                },
                "auth": auth_schema()
            },
            "required": ["resume_id"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let resume_id = required_str(&args, "resume_id", RESUME_ID_REQUIRED)?;
        let output_path = self.output_path(&args);
        let upload_target = self.upload_target(&args)?;
        let return_base64 = args
            .get("return_base64")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let client = login(&self.ctx, &args).await?;
        let pdf = client.download_pdf(resume_id).await?;

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&output_path, &pdf).await?;
        let saved_path = tokio::fs::canonicalize(&output_path).await?;
        info!(
            "Saved resume {resume_id} PDF ({} bytes) to {}",
            pdf.len(),
            saved_path.display()
        );

        let mut result = json!({
            "message": format!("Resume PDF downloaded to {}", saved_path.display()),
            "resume_id": resume_id,
            "file_path": saved_path.display().to_string(),
            "size_bytes": pdf.len(),
        });

        if let Some((url, token)) = upload_target {
            let file_name = output_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("resume.pdf");
            let uploader = XBackboneClient::new(
                &url,
                &token,
                self.ctx.xbackbone.accept_invalid_certs,
            )?;
            let uploaded = uploader.upload(file_name, pdf.clone()).await?;
            result["message"] = json!(format!(
                "Resume PDF downloaded to {} and uploaded to {}",
                saved_path.display(),
                uploaded.url
            ));
            result["xbackbone_url"] = json!(uploaded.url);
            result["xbackbone_raw_url"] = json!(uploaded.raw_url);
            result["xbackbone_delete_url"] = json!(uploaded.delete_url);
        }

        if return_base64 {
            result["base64_data"] = json!(STANDARD.encode(&pdf));
            result["mime_type"] = json!("application/pdf");
        }

        Ok(result)
    }
}
