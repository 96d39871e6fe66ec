use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::context::TenantContext;
use crate::models::{Donation, Seva, TenantUser};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const USER_AGENT: &str = "temple-events/0.1";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    Url(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
}

/// Thin wrapper over the tenant-scoped REST endpoints.
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|err| ApiError::Url(format!("{base_url}: {err}")))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ApiError::Http(err.to_string()))?;
        Ok(Self { base_url, client })
    }

    pub fn endpoint(&self, ctx: &TenantContext, resource: &str) -> Result<Url, ApiError> {
        let raw = format!("{}/{}", self.base_url, resource.trim_matches('/'));
        let mut url = Url::parse(&raw).map_err(|err| ApiError::Url(format!("{raw}: {err}")))?;
        url.query_pairs_mut().extend_pairs(ctx.scope_params());
        Ok(url)
    }

    /// Raw event rows, left untyped for the normalizer.
    pub async fn list_events(&self, ctx: &TenantContext) -> Result<Value, ApiError> {
        let body = self.get_json(ctx, "events").await?;
        Ok(unwrap_collection(body))
    }

    pub async fn list_sevas(&self, ctx: &TenantContext) -> Result<Vec<Seva>, ApiError> {
        decode_list(self.get_json(ctx, "sevas").await?)
    }

    pub async fn list_donations(&self, ctx: &TenantContext) -> Result<Vec<Donation>, ApiError> {
        decode_list(self.get_json(ctx, "donations").await?)
    }

    pub async fn list_tenant_users(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<TenantUser>, ApiError> {
        decode_list(self.get_json(ctx, "users").await?)
    }

    async fn get_json(&self, ctx: &TenantContext, resource: &str) -> Result<Value, ApiError> {
        let url = self.endpoint(ctx, resource)?;
        let mut request = self.client.get(url.clone());
        if let Some(token) = &ctx.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ApiError::Http(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ApiError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        tracing::debug!(%url, bytes = text.len(), "fetched {resource}");
        serde_json::from_str(&text).map_err(|err| ApiError::Parse(err.to_string()))
    }
}

/// List endpoints answer with either a bare array or `{ "data": [...] }`.
fn unwrap_collection(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode_list<T: DeserializeOwned>(body: Value) -> Result<Vec<T>, ApiError> {
    match unwrap_collection(body) {
        Value::Null => Ok(Vec::new()),
        list => serde_json::from_value(list).map_err(|err| ApiError::Parse(err.to_string())),
    }
}
