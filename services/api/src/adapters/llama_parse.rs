//! services/api/src/adapters/llama_parse.rs
//!
//! This module contains the adapter for the LlamaParse document-parsing API.
//! It implements the `DocumentParsingService` port: upload the file, poll the
//! job until it finishes, then fetch the markdown result.

use std::time::Duration;

use async_trait::async_trait;
use autorfp_core::domain::ParsingConnection;
use autorfp_core::pipeline::ParsedDocument;
use autorfp_core::ports::{DocumentParsingService, PortError, PortResult};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use crate::adapters::retry::{with_retry, AttemptError};
use crate::config::RetryPolicy;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 150;

#[derive(Debug, Deserialize)]
struct JobResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MarkdownResponse {
    markdown: String,
    #[serde(default)]
    job_metadata: Option<JobMetadata>,
}

#[derive(Debug, Deserialize)]
struct JobMetadata {
    #[serde(default)]
    job_pages: Option<u32>,
}

#[derive(Debug, PartialEq)]
enum JobState {
    Pending,
    Succeeded,
    Failed(String),
}

impl JobState {
    fn from_status(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "SUCCESS" => JobState::Succeeded,
            "ERROR" | "CANCELED" | "CANCELLED" => JobState::Failed(status.to_string()),
            _ => JobState::Pending,
        }
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct LlamaParseAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl LlamaParseAdapter {
    pub fn new(base_url: String, api_key: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            retry,
        }
    }

    fn api_key(&self) -> PortResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            PortError::External("The document-parsing service is not configured".to_string())
        })
    }

    async fn upload(
        &self,
        file_name: &str,
        data: &[u8],
        connection: Option<&ParsingConnection>,
    ) -> PortResult<String> {
        let api_key = self.api_key()?;
        let url = format!("{}/api/v1/parsing/upload", self.base_url);
        let project_id = connection.map(|c| c.project_id.clone());

        let job: JobResponse = with_retry(&self.retry, "parse upload", || {
            let form = Form::new().part(
                "file",
                Part::bytes(data.to_vec()).file_name(file_name.to_string()),
            );
            let mut request = self.http.post(&url).bearer_auth(api_key).multipart(form);
            if let Some(project_id) = &project_id {
                request = request.query(&[("project_id", project_id)]);
            }
            async move { send_json(request).await }
        })
        .await?;

        Ok(job.id)
    }

    async fn wait_for_job(&self, job_id: &str) -> PortResult<()> {
        let api_key = self.api_key()?;
        let url = format!("{}/api/v1/parsing/job/{}", self.base_url, job_id);

        for poll in 1..=MAX_POLLS {
            let job: JobResponse = with_retry(&self.retry, "parse status", || {
                let request = self.http.get(&url).bearer_auth(api_key);
                async move { send_json(request).await }
            })
            .await?;

            match JobState::from_status(&job.status) {
                JobState::Succeeded => return Ok(()),
                JobState::Failed(status) => {
                    return Err(PortError::External(format!(
                        "Parsing job {} ended with status {}",
                        job_id, status
                    )))
                }
                JobState::Pending => {
                    debug!(job_id, poll, "parsing job still running");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        Err(PortError::External(format!(
            "Parsing job {} did not finish in time",
            job_id
        )))
    }

    async fn fetch_markdown(&self, job_id: &str) -> PortResult<ParsedDocument> {
        let api_key = self.api_key()?;
        let url = format!("{}/api/v1/parsing/job/{}/result/markdown", self.base_url, job_id);

        let result: MarkdownResponse = with_retry(&self.retry, "parse result", || {
            let request = self.http.get(&url).bearer_auth(api_key);
            async move { send_json(request).await }
        })
        .await?;

        Ok(ParsedDocument {
            content: result.markdown,
            page_count: result.job_metadata.and_then(|m| m.job_pages),
        })
    }
}

/// Sends one request and decodes a JSON body, classifying failures for the retry loop.
async fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, AttemptError> {
    let response = request.send().await.map_err(AttemptError::from)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AttemptError::from_status(status.as_u16(), &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AttemptError::Fatal(format!("unexpected response body: {}", e)))
}

//=========================================================================================
// `DocumentParsingService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentParsingService for LlamaParseAdapter {
    async fn parse_document(
        &self,
        file_name: &str,
        data: &[u8],
        connection: Option<&ParsingConnection>,
    ) -> PortResult<ParsedDocument> {
        let job_id = self.upload(file_name, data, connection).await?;
        info!(job_id, file_name, bytes = data.len(), "document uploaded for parsing");

        self.wait_for_job(&job_id).await?;
        self.fetch_markdown(&job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_states() {
        assert_eq!(JobState::from_status("SUCCESS"), JobState::Succeeded);
        assert_eq!(JobState::from_status("pending"), JobState::Pending);
        assert!(matches!(JobState::from_status("ERROR"), JobState::Failed(_)));
        assert!(matches!(JobState::from_status("CANCELED"), JobState::Failed(_)));
    }

    #[test]
    fn markdown_result_carries_page_count() {
        let body = r##"{"markdown": "# RFP", "job_metadata": {"job_pages": 12, "credits_used": 3}}"##;
        let result: MarkdownResponse = serde_json::from_str(body).unwrap();
        assert_eq!(result.markdown, "# RFP");
        assert_eq!(result.job_metadata.and_then(|m| m.job_pages), Some(12));

        let bare: MarkdownResponse = serde_json::from_str(r#"{"markdown": ""}"#).unwrap();
        assert!(bare.job_metadata.is_none());
    }

    #[tokio::test]
    async fn missing_api_key_is_an_external_failure() {
        let adapter = LlamaParseAdapter::new(
            "http://localhost:9".to_string(),
            None,
            RetryPolicy::default(),
        );
        let result = adapter.parse_document("rfp.pdf", b"%PDF", None).await;
        assert!(matches!(result, Err(PortError::External(_))));
    }
}
