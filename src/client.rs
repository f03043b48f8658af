use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{CalculationRecord, Operation};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Deserialize)]
struct ApiError {
    error: String,
}

#[derive(Deserialize)]
struct ResultBody {
    result: f64,
}

#[derive(Deserialize)]
struct DeleteBody {
    deleted: Option<CalculationRecord>,
}

#[derive(Deserialize)]
struct HealthBody {
    status: String,
}

#[derive(Deserialize)]
struct VersionBody {
    version: String,
}

/// HTTP client for a running abacus server.
#[derive(Debug, Clone)]
pub struct AbacusClient {
    http: reqwest::Client,
    base_url: String,
}

impl AbacusClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http: reqwest::Client::new(), base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn calculate(&self, operation: Operation, a: f64, b: f64) -> Result<f64, ClientError> {
        let res = self.http
        .get(self.url(&format!("/{}", operation)))
        .query(&[("num1", a.to_string()), ("num2", b.to_string())])
        .send()
        .await?;
        decode::<ResultBody>(res).await.map(|body| body.result)
    }

    pub async fn history(&self, operation: Option<Operation>) -> Result<Vec<CalculationRecord>, ClientError> {
        let mut req = self.http.get(self.url("/history"));
        if let Some(op) = operation {
            req = req.query(&[("operation", op.name())]);
        }
        decode(req.send().await?).await
    }

    /// `None` when the server has no such record.
    pub async fn get(&self, id: Uuid) -> Result<Option<CalculationRecord>, ClientError> {
        let res = self.http.get(self.url(&format!("/history/{}", id))).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(res).await.map(Some)
    }

    pub async fn update(&self, id: Uuid, operation: Operation, a: f64, b: f64) -> Result<CalculationRecord, ClientError> {
        let res = self.http
        .put(self.url(&format!("/history/{}", id)))
        .query(&[
            ("num1", a.to_string()),
            ("num2", b.to_string()),
            ("operation", operation.to_string()),
        ])
        .send()
        .await?;
        decode(res).await
    }

    /// Returns the removed record, or `None` if nothing matched.
    pub async fn delete(&self, id: Uuid) -> Result<Option<CalculationRecord>, ClientError> {
        let res = self.http.delete(self.url(&format!("/history/{}", id))).send().await?;
        decode::<DeleteBody>(res).await.map(|body| body.deleted)
    }

    pub async fn health(&self) -> Result<String, ClientError> {
        let res = self.http.get(self.url("/health")).send().await?;
        decode::<HealthBody>(res).await.map(|body| body.status)
    }

    pub async fn version(&self) -> Result<String, ClientError> {
        let res = self.http.get(self.url("/version")).send().await?;
        decode::<VersionBody>(res).await.map(|body| body.version)
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res.json::<T>().await?);
    }

    let message = match res.json::<ApiError>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(ClientError::Api { status: status.as_u16(), message })
}
