//! HTTP client for the central store.
//!
//! Each entity type lives under a fixed base path (`/products`, `/sales`, ...):
//!
//! | call                | request                                   |
//! |---------------------|-------------------------------------------|
//! | create              | `POST {base}`                             |
//! | update / put        | `PUT {base}/{id}`                         |
//! | delete              | `DELETE {base}/{id}`                      |
//! | get                 | `GET {base}/{id}` (404 = absent)          |
//! | delta               | `GET {base}?modified_since=<rfc3339>`     |
//! | health              | `GET /health`                             |

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use till_core::{EntityType, Record};
use tracing::debug;

use crate::error::{RemoteError, StoreError, StoreResult};
use crate::health::HealthCheck;
use crate::remote::{Mutation, RemoteExecutor, Verb};
use crate::store::{in_window, sort_by_modification, RecordStore};

const MAX_ERROR_BODY: usize = 500;

#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("building HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn classify(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            // connect, request and body errors all mean the call never landed
            RemoteError::Unreachable(e.to_string())
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        req.send().await.map_err(|e| self.classify(e))
    }

    /// Turn a non-success response into a classified error, keeping a
    /// truncated copy of the body for the operator to read.
    async fn error_for(response: Response) -> RemoteError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = if body.chars().count() > MAX_ERROR_BODY {
            let head: String = body.chars().take(MAX_ERROR_BODY).collect();
            format!("{head}... (truncated)")
        } else {
            body
        };
        RemoteError::from_status(status, message)
    }

    async fn expect_success(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.send(req).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_for(response).await)
        }
    }
}

#[async_trait]
impl RemoteExecutor for HttpRemote {
    async fn execute(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        let (verb, path) = mutation.route();
        let url = self.url(&path);
        debug!(kind = %mutation.kind, entity = %mutation.entity, id = %mutation.record.id, %url, "remote execute");

        let req = match verb {
            Verb::Post => self.client.post(&url).json(&mutation.record),
            Verb::Put => self.client.put(&url).json(&mutation.record),
            Verb::Delete => self.client.delete(&url),
        };

        let response = self.send(req).await?;
        let status = response.status();
        if status.is_success() || (verb == Verb::Delete && status == StatusCode::NOT_FOUND) {
            Ok(())
        } else {
            Err(Self::error_for(response).await)
        }
    }
}

#[async_trait]
impl RecordStore for HttpRemote {
    async fn get(&self, entity: EntityType, id: &str) -> StoreResult<Option<Record>> {
        let url = self.url(&format!("{}/{id}", entity.base_path()));
        let response = self.send(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await.into());
        }
        response
            .json::<Record>()
            .await
            .map(Some)
            .map_err(|e| StoreError::record(id, format!("decoding remote record: {e}")))
    }

    async fn put(&self, entity: EntityType, record: &Record) -> StoreResult<()> {
        let url = self.url(&format!("{}/{}", entity.base_path(), record.id));
        self.expect_success(self.client.put(&url).json(record))
            .await?;
        Ok(())
    }

    async fn delete(&self, entity: EntityType, id: &str) -> StoreResult<bool> {
        let url = self.url(&format!("{}/{id}", entity.base_path()));
        let response = self.send(self.client.delete(&url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(Self::error_for(response).await.into()),
        }
    }

    async fn modified_since(
        &self,
        entity: EntityType,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Record>> {
        let url = self.url(entity.base_path());
        let cursor = since.to_rfc3339_opts(SecondsFormat::Micros, true);
        let req = self
            .client
            .request(Method::GET, &url)
            .query(&[("modified_since", cursor.as_str())]);

        let response = self.expect_success(req).await?;
        let mut records: Vec<Record> = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(format!("{entity} delta: {e}")))?;

        // servers that treat the cursor as inclusive would otherwise echo
        // back the boundary record on every pass
        records.retain(|r| in_window(r, since));
        sort_by_modification(&mut records);
        debug!(entity = %entity, count = records.len(), %cursor, "remote delta fetched");
        Ok(records)
    }
}

#[async_trait]
impl HealthCheck for HttpRemote {
    async fn check(&self) -> anyhow::Result<()> {
        self.expect_success(self.client.get(self.url("/health")))
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("remote health check failed: {e}"))
    }
}
