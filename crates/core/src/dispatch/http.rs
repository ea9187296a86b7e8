//! HTTP dispatcher over the conversion API.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::item::{ConversionItem, ItemSource};

use super::endpoints::{resolve, BATCH_PATH};
use super::error::DispatchError;
use super::traits::Dispatcher;
use super::types::{
    BatchUrlItem, DispatchOutcome, DispatchedJob, ErrorEnvelope, SuccessEnvelope,
    UrlConversionRequest,
};

/// Dispatcher implementation over the conversion service's HTTP API.
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
}

impl HttpDispatcher {
    /// Create a new HttpDispatcher with the given configuration.
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Submit a single item to its kind's endpoint.
    async fn dispatch_one(
        &self,
        item: &ConversionItem,
        credential: Option<&str>,
    ) -> Result<DispatchedJob, DispatchError> {
        let endpoint = self.endpoint(resolve(item.kind));
        debug!(item = %item.name, kind = %item.kind, endpoint = %endpoint, "Dispatching item");

        let request = match &item.source {
            ItemSource::Url { url } => {
                let body = UrlConversionRequest {
                    url,
                    name: &item.name,
                    options: &item.options,
                };
                self.client.post(&endpoint).json(&body)
            }
            ItemSource::File { path } => {
                let bytes =
                    tokio::fs::read(path)
                        .await
                        .map_err(|e| DispatchError::File {
                            path: path.clone(),
                            reason: e.to_string(),
                        })?;
                let options_json =
                    serde_json::to_string(&item.options).expect("options serialize");
                let form = Form::new()
                    .part("file", Part::bytes(bytes).file_name(item.name.clone()))
                    .text("options", options_json);
                self.client.post(&endpoint).multipart(form)
            }
        };

        let request = attach_credential(request, item.requires_credential, credential);
        let response = request.send().await.map_err(DispatchError::from_reqwest)?;
        let job_id = parse_job_response(response).await?;

        Ok(DispatchedJob::single(job_id, item.id.clone()))
    }

    /// Submit all items as one multipart batch.
    ///
    /// Files go out first under the `files` field, then one `items` JSON
    /// field describing URL-kind entries; the server's `jobs` array follows
    /// that order.
    async fn dispatch_batch(
        &self,
        items: &[ConversionItem],
        credential: Option<&str>,
    ) -> Result<Vec<DispatchedJob>, DispatchError> {
        let mut form = Form::new();
        let mut file_ids: Vec<String> = Vec::new();
        let mut url_ids: Vec<String> = Vec::new();
        let mut url_entries: Vec<BatchUrlItem> = Vec::new();

        for item in items {
            match &item.source {
                ItemSource::File { path } => {
                    let bytes =
                        tokio::fs::read(path)
                            .await
                            .map_err(|e| DispatchError::File {
                                path: path.clone(),
                                reason: e.to_string(),
                            })?;
                    form = form.part("files", Part::bytes(bytes).file_name(item.name.clone()));
                    file_ids.push(item.id.clone());
                }
                ItemSource::Url { url } => {
                    url_entries.push(BatchUrlItem {
                        url: url.clone(),
                        name: item.name.clone(),
                        options: item.options.clone(),
                    });
                    url_ids.push(item.id.clone());
                }
            }
        }

        form = form.text(
            "items",
            serde_json::to_string(&url_entries).expect("items serialize"),
        );

        let ordered_ids: Vec<String> = file_ids.into_iter().chain(url_ids).collect();
        let endpoint = self.endpoint(BATCH_PATH);
        debug!(
            items = ordered_ids.len(),
            urls = url_entries.len(),
            endpoint = %endpoint,
            "Dispatching batch"
        );

        let needs_credential = items.iter().any(|i| i.requires_credential);
        let request = attach_credential(
            self.client.post(&endpoint).multipart(form),
            needs_credential,
            credential,
        );

        let response = request.send().await.map_err(DispatchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body));
        }

        let envelope: SuccessEnvelope = response
            .json()
            .await
            .map_err(|e| DispatchError::ResponseFormat(format!("batch response: {}", e)))?;

        jobs_from_envelope(envelope, &ordered_ids)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn dispatch(
        &self,
        items: &[ConversionItem],
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchOutcome>, DispatchError> {
        if use_batch_mode(items) {
            let jobs = tokio::select! {
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                res = self.dispatch_batch(items, credential) => res?,
            };
            Ok(jobs.into_iter().map(DispatchOutcome::Accepted).collect())
        } else {
            let futures: Vec<_> = items
                .iter()
                .map(|item| async move {
                    let result = self.dispatch_one(item, credential).await;
                    (item.id.clone(), result)
                })
                .collect();

            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                res = join_all(futures) => res,
            };

            Ok(results
                .into_iter()
                .map(|(item_id, result)| match result {
                    Ok(job) => DispatchOutcome::Accepted(job),
                    Err(e) => {
                        warn!(item = %item_id, error = %e, "Item dispatch failed");
                        DispatchOutcome::Rejected { item_id, error: e }
                    }
                })
                .collect())
        }
    }
}

/// Whether an item set goes out as one multipart batch.
///
/// More than one item, and not all of them plain documents.
pub fn use_batch_mode(items: &[ConversionItem]) -> bool {
    items.len() > 1 && !items.iter().all(|i| i.kind.is_plain_document())
}

/// Attach the bearer credential to credential-gated requests.
fn attach_credential(
    request: reqwest::RequestBuilder,
    gated: bool,
    credential: Option<&str>,
) -> reqwest::RequestBuilder {
    match credential {
        Some(token) if gated => request.bearer_auth(token),
        _ => request,
    }
}

/// Parse a per-item response down to its job id.
async fn parse_job_response(response: reqwest::Response) -> Result<String, DispatchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        return Err(error_from_body(status.as_u16(), &body));
    }

    let envelope: SuccessEnvelope = response
        .json()
        .await
        .map_err(|e| DispatchError::ResponseFormat(format!("accept response: {}", e)))?;

    if envelope.success == Some(false) {
        return Err(DispatchError::Api {
            status: status.as_u16(),
            code: None,
            message: envelope
                .message
                .unwrap_or_else(|| "conversion request rejected".to_string()),
        });
    }

    envelope.job_id.ok_or(DispatchError::MissingJobId)
}

/// Parse an error body in either documented shape.
fn error_from_body(status: u16, body: &[u8]) -> DispatchError {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        let (code, message) = envelope.into_parts();
        if code.is_some() || message.is_some() {
            return DispatchError::Api {
                status,
                code,
                message: message.unwrap_or_else(|| format!("HTTP {}", status)),
            };
        }
    }

    let text = String::from_utf8_lossy(body);
    DispatchError::Api {
        status,
        code: None,
        message: format!("HTTP {}: {}", status, text.chars().take(200).collect::<String>()),
    }
}

/// Map a batch success envelope onto dispatched jobs.
///
/// Canonical shape: a `jobs` array with one entry per item in submission
/// order. Legacy shape: a single collective `job_id` covering every item.
/// Anything else is a response-format error.
fn jobs_from_envelope(
    envelope: SuccessEnvelope,
    ordered_ids: &[String],
) -> Result<Vec<DispatchedJob>, DispatchError> {
    if envelope.success == Some(false) {
        return Err(DispatchError::Api {
            status: 200,
            code: None,
            message: envelope
                .message
                .unwrap_or_else(|| "batch rejected".to_string()),
        });
    }

    if let Some(jobs) = envelope.jobs {
        if jobs.len() != ordered_ids.len() {
            return Err(DispatchError::ResponseFormat(format!(
                "batch returned {} job ids for {} items",
                jobs.len(),
                ordered_ids.len()
            )));
        }
        return Ok(jobs
            .into_iter()
            .zip(ordered_ids)
            .map(|(job, item_id)| DispatchedJob::single(job.job_id, item_id.clone()))
            .collect());
    }

    if let Some(job_id) = envelope.job_id {
        return Ok(vec![DispatchedJob {
            job_id,
            item_ids: ordered_ids.to_vec(),
        }]);
    }

    Err(DispatchError::MissingJobId)
}
