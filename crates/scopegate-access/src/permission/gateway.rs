//! Authorization gateway.
//!
//! Sends the user to the provider's consent endpoint for scopes that are
//! still missing. The transport is abstract: [`RedirectGateway`] builds the
//! consent URL and hands it to a [`Redirector`], which performs a full-page
//! navigation in a browser host or records the URL elsewhere.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::info;

use scopegate_core::config::ConsentConfig;
use scopegate_core::{ScopeLevel, ServiceType};

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid permission base URL: {0}")]
    Url(String),

    #[error("Redirect failed: {0}")]
    Redirect(String),
}

/// Drives an account through the provider's consent step.
#[async_trait]
pub trait AuthorizationGateway: Send + Sync {
    /// Ask the provider to grant every scope in `missing` in one request.
    async fn request_missing_permissions(
        &self,
        account_id: &str,
        service: ServiceType,
        missing: &[ScopeLevel],
    ) -> Result<(), GatewayError>;
}

/// Navigation host for consent redirects.
pub trait Redirector: Send + Sync {
    /// Path of the page the user is on; the provider returns here.
    fn current_path(&self) -> String;

    /// Leave the current page for `url`.
    fn redirect(&self, url: &Url) -> Result<(), GatewayError>;
}

/// Gateway performing one full-page redirect per request.
pub struct RedirectGateway<R> {
    permission_base_url: String,
    redirector: R,
}

impl<R: Redirector> RedirectGateway<R> {
    pub fn new(config: &ConsentConfig, redirector: R) -> Self {
        Self {
            permission_base_url: config.permission_base_url.trim_end_matches('/').to_string(),
            redirector,
        }
    }

    pub const fn redirector(&self) -> &R {
        &self.redirector
    }

    /// `{base}/{service}/{scope,scope}?redirectUrl={path}&accountId={id}`
    pub fn consent_url(
        &self,
        account_id: &str,
        service: ServiceType,
        missing: &[ScopeLevel],
    ) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.permission_base_url)
            .map_err(|e| GatewayError::Url(format!("{}: {e}", self.permission_base_url)))?;
        let scopes = missing
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        url.path_segments_mut()
            .map_err(|()| GatewayError::Url(self.permission_base_url.clone()))?
            .pop_if_empty()
            .push(service.as_str())
            .push(&scopes);
        url.query_pairs_mut()
            .append_pair("redirectUrl", &self.redirector.current_path())
            .append_pair("accountId", account_id);
        Ok(url)
    }
}

#[async_trait]
impl<R: Redirector> AuthorizationGateway for RedirectGateway<R> {
    async fn request_missing_permissions(
        &self,
        account_id: &str,
        service: ServiceType,
        missing: &[ScopeLevel],
    ) -> Result<(), GatewayError> {
        if missing.is_empty() {
            return Ok(());
        }
        let url = self.consent_url(account_id, service, missing)?;
        info!(
            account_id,
            %service,
            scopes = ?missing,
            "Redirecting to provider consent"
        );
        self.redirector.redirect(&url)
    }
}

/// Redirector for hosts without a browser: logs and remembers each URL.
#[derive(Debug)]
pub struct LogRedirector {
    current_path: String,
    visited: Mutex<Vec<Url>>,
}

impl LogRedirector {
    pub fn new(current_path: impl Into<String>) -> Self {
        Self {
            current_path: current_path.into(),
            visited: Mutex::new(Vec::new()),
        }
    }

    /// URLs handed to this redirector so far.
    pub fn visited(&self) -> Vec<Url> {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Redirector for LogRedirector {
    fn current_path(&self) -> String {
        self.current_path.clone()
    }

    fn redirect(&self, url: &Url) -> Result<(), GatewayError> {
        info!(%url, "Open this URL to grant the missing permissions");
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> RedirectGateway<LogRedirector> {
        let config = ConsentConfig {
            permission_base_url: base.into(),
            return_path: "/mail/inbox".into(),
        };
        RedirectGateway::new(&config, LogRedirector::new(config.return_path.clone()))
    }

    #[test]
    fn consent_url_combines_scopes_and_return_target() {
        let gateway = gateway("https://suite.example/api/auth/google/permissions/");
        let url = gateway
            .consent_url(
                "acct1",
                ServiceType::Mail,
                &[ScopeLevel::Send, ScopeLevel::Compose],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://suite.example/api/auth/google/permissions/mail/send,compose?redirectUrl=%2Fmail%2Finbox&accountId=acct1"
        );
    }

    #[test]
    fn bad_base_url_is_an_error() {
        let gateway = gateway("not a url");
        assert!(matches!(
            gateway.consent_url("acct1", ServiceType::Mail, &[ScopeLevel::Send]),
            Err(GatewayError::Url(_))
        ));
    }

    #[tokio::test]
    async fn request_redirects_once_for_whole_batch() {
        let gateway = gateway("https://suite.example/permissions");
        gateway
            .request_missing_permissions(
                "acct1",
                ServiceType::Drive,
                &[ScopeLevel::File, ScopeLevel::Metadata],
            )
            .await
            .unwrap();

        let visited = gateway.redirector().visited();
        assert_eq!(visited.len(), 1);
        assert_eq!(visited[0].path(), "/permissions/drive/file,metadata");
    }

    #[tokio::test]
    async fn empty_request_does_not_redirect() {
        let gateway = gateway("https://suite.example/permissions");
        gateway
            .request_missing_permissions("acct1", ServiceType::Drive, &[])
            .await
            .unwrap();
        assert!(gateway.redirector().visited().is_empty());
    }
}
