//! Token-introspection REST client.
//!
//! Uses reqwest to ask the backend which scopes an account's token carries.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::debug;

use scopegate_core::config::IntrospectionConfig;
use scopegate_core::{ScopeLevel, ServiceType};

use super::ScopeIntrospector;
use super::types::{IntrospectionResponse, ScopeCheck};

/// Introspection client errors.
#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Introspection API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Token-introspection REST client.
#[derive(Debug)]
pub struct IntrospectionClient {
    http: reqwest::Client,
    base_url: String,
}

impl IntrospectionClient {
    pub fn new(config: &IntrospectionConfig) -> Result<Self, IntrospectionError> {
        if config.base_url.is_empty() {
            return Err(IntrospectionError::Config("base_url is empty".into()));
        }
        Url::parse(&config.base_url)
            .map_err(|e| IntrospectionError::Config(format!("Invalid base_url: {e}")))?;

        let mut headers = HeaderMap::new();
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let token_val = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| IntrospectionError::Config("Invalid token format".into()))?;
            headers.insert(AUTHORIZATION, token_val);
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// Build the check URL for a batch of scopes.
    pub(crate) fn check_url(
        &self,
        account_id: &str,
        service: ServiceType,
        scopes: &[ScopeLevel],
    ) -> Result<Url, IntrospectionError> {
        let mut url = Url::parse(&format!("{}/permissions/check", self.base_url))
            .map_err(|e| IntrospectionError::Config(format!("Invalid base_url: {e}")))?;
        let joined = scopes
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut()
            .append_pair("accountId", account_id)
            .append_pair("service", service.as_str())
            .append_pair("scopeLevels", &joined);
        Ok(url)
    }

    fn check_status(resp: &reqwest::Response) -> Result<(), IntrospectionError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(IntrospectionError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ScopeIntrospector for IntrospectionClient {
    async fn check_scopes(
        &self,
        account_id: &str,
        service: ServiceType,
        scopes: &[ScopeLevel],
    ) -> Result<HashMap<ScopeLevel, ScopeCheck>, IntrospectionError> {
        let url = self.check_url(account_id, service, scopes)?;
        debug!(account_id, %service, scopes = scopes.len(), "Checking scopes remotely");
        let resp = self.http.get(url).send().await?;
        Self::check_status(&resp)?;
        let body: IntrospectionResponse = resp.json().await?;
        Ok(body.into_checks())
    }
}
