//! Remote Reconciliation API Client
//!
//! Thin reqwest client for the `/tasks` endpoints the core reconciles
//! against. The remote service is consumed, not defined, here.
//!
//! # Failure Semantics
//!
//! Every failure mode - unreachable host, non-2xx status, a content type
//! other than `application/json`, or an unparseable body - maps to
//! [`SyncError::RemoteUnavailable`]. The caller treats that as "offline for
//! this operation only": the operation stays queued and is retried on a
//! later cycle.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::Task;

/// Client for the remote `/tasks` API
#[derive(Debug, Clone)]
pub struct RemoteApi {
    client: Client,
    base_url: String,
}

impl RemoteApi {
    /// Create a client for the configured API base URL
    pub fn new(config: &SyncConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    /// `GET /tasks` - authoritative remote state
    pub async fn list_tasks(&self) -> Result<Vec<Task>, SyncError> {
        let response = self.client.get(self.url("/tasks")).send().await?;
        let response = Self::require_json(response)?;
        Ok(response.json().await?)
    }

    /// `POST /tasks` - create a task remotely
    pub async fn create_task(&self, task: &Task) -> Result<Task, SyncError> {
        let response = self
            .client
            .post(self.url("/tasks"))
            .json(task)
            .send()
            .await?;
        let response = Self::require_json(response)?;
        Ok(response.json().await?)
    }

    /// `PUT /tasks/{id}` - update a task remotely
    pub async fn update_task(&self, task: &Task) -> Result<Task, SyncError> {
        let response = self
            .client
            .put(self.url(&format!("/tasks/{}", task.id)))
            .json(task)
            .send()
            .await?;
        let response = Self::require_json(response)?;
        Ok(response.json().await?)
    }

    /// `DELETE /tasks/{id}` - delete a task remotely, no body expected
    pub async fn delete_task(&self, task_id: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .delete(self.url(&format!("/tasks/{}", task_id)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::remote(format!(
                "DELETE returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Reject non-2xx statuses and non-JSON bodies
    fn require_json(response: Response) -> Result<Response, SyncError> {
        if !response.status().is_success() {
            return Err(SyncError::remote(format!(
                "service returned {}",
                response.status()
            )));
        }
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        if !is_json {
            return Err(SyncError::remote("response is not application/json"));
        }
        Ok(response)
    }
}
