//! Service permission façade.
//!
//! Feature code (mail, contacts, calendar data access) holds one
//! [`ServicePermissions`] per account and service. It answers "may I call
//! this endpoint?" from the cache, runs full verification on demand, and is
//! told to forget a grant when the provider rejects a call for lack of scope.
//!
//! A cached `full` grant satisfies every scope of its service.

use std::sync::Arc;

use tracing::{debug, warn};

use scopegate_core::scopes::{is_valid_scope, valid_scopes_for};
use scopegate_core::{PermissionCache, ScopeLevel, ServiceType};

use super::pending::ConsentCoordinator;
use super::types::{ConsentError, VerificationResult};
use super::verifier::AccessVerifier;

/// Errors surfaced by the façade.
#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error(transparent)]
    Cache(#[from] scopegate_core::Error),

    #[error(transparent)]
    Consent(#[from] ConsentError),
}

/// Shared services every façade is built from.
#[derive(Clone)]
pub struct AccessLayer {
    cache: Arc<PermissionCache>,
    verifier: Arc<AccessVerifier>,
    consent: ConsentCoordinator,
}

impl AccessLayer {
    pub const fn new(
        cache: Arc<PermissionCache>,
        verifier: Arc<AccessVerifier>,
        consent: ConsentCoordinator,
    ) -> Self {
        Self {
            cache,
            verifier,
            consent,
        }
    }

    pub const fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    pub const fn verifier(&self) -> &Arc<AccessVerifier> {
        &self.verifier
    }

    pub const fn consent(&self) -> &ConsentCoordinator {
        &self.consent
    }

    /// Façade bound to one account (if signed in) and service.
    pub fn service_permissions(
        &self,
        account_id: Option<&str>,
        service: ServiceType,
    ) -> ServicePermissions {
        ServicePermissions {
            account_id: account_id.map(String::from),
            service,
            layer: self.clone(),
        }
    }
}

/// Permission checks for one (account, service) pair.
pub struct ServicePermissions {
    account_id: Option<String>,
    service: ServiceType,
    layer: AccessLayer,
}

impl ServicePermissions {
    pub const fn service(&self) -> ServiceType {
        self.service
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Verify every scope of the service, optionally sending the user to
    /// grant the ones still missing.
    ///
    /// Without an account nothing is checked and an empty result returned.
    /// When `full` turns out to be granted nothing is requested. Only a
    /// failed redirect started by this call is returned as an error.
    pub async fn check_all_service_permissions(
        &self,
        request_missing: bool,
    ) -> Result<VerificationResult, FacadeError> {
        let Some(account_id) = self.account_id.as_deref() else {
            warn!(service = %self.service, "No account selected, skipping permission check");
            return Ok(VerificationResult::default());
        };

        let result = self
            .layer
            .verifier
            .verify_service_access(
                account_id,
                self.service,
                valid_scopes_for(self.service).iter().copied(),
            )
            .await?;

        if request_missing && !result.is_complete() && !result.is_granted(ScopeLevel::Full) {
            let started = self
                .layer
                .consent
                .request_missing_permissions(account_id, self.service, &result.missing_permissions)
                .await;
            // Scopes another caller is already requesting stay with that caller.
            if let Some(own) = started {
                own.wait().await?;
            }
        }

        Ok(result)
    }

    /// Whether the cache currently grants `scope` (or `full`).
    ///
    /// Never consults the network. Scopes the service does not define are
    /// always refused.
    pub async fn has_required_permission(&self, scope: ScopeLevel) -> bool {
        if !is_valid_scope(self.service, scope) {
            warn!(service = %self.service, %scope, "Scope not valid for service");
            return false;
        }
        let Some(account_id) = self.account_id.as_deref() else {
            debug!(service = %self.service, %scope, "No account selected");
            return false;
        };

        let cache = &self.layer.cache;
        let full = cache.get(account_id, self.service, ScopeLevel::Full).await;
        if PermissionCache::is_valid(full.as_ref()) {
            return true;
        }
        let entry = cache.get(account_id, self.service, scope).await;
        PermissionCache::is_valid(entry.as_ref())
    }

    /// Forget a grant after the provider rejected a call for lack of scope.
    pub async fn invalidate_service_permission(
        &self,
        scope: ScopeLevel,
    ) -> Result<(), FacadeError> {
        if !is_valid_scope(self.service, scope) {
            warn!(service = %self.service, %scope, "Cannot invalidate scope not valid for service");
            return Ok(());
        }
        let Some(account_id) = self.account_id.as_deref() else {
            warn!(service = %self.service, %scope, "Cannot invalidate without an account");
            return Ok(());
        };
        self.layer
            .cache
            .invalidate(account_id, self.service, scope)
            .await?;
        Ok(())
    }
}
