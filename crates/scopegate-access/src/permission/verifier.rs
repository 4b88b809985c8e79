//! Access verifier.
//!
//! Splits requested scopes into those already granted in the cache and the
//! gaps, checks every gap with one remote call, and writes the outcome back.

use std::sync::Arc;

use tracing::{debug, warn};

use scopegate_core::scopes::is_valid_scope;
use scopegate_core::{PermissionCache, ScopeLevel, ServiceType};

use crate::introspection::ScopeIntrospector;

use super::types::VerificationResult;

/// Verifies scope grants against the cache and the introspection endpoint.
pub struct AccessVerifier {
    cache: Arc<PermissionCache>,
    introspector: Arc<dyn ScopeIntrospector>,
}

impl AccessVerifier {
    pub fn new(cache: Arc<PermissionCache>, introspector: Arc<dyn ScopeIntrospector>) -> Self {
        Self {
            cache,
            introspector,
        }
    }

    /// Determine which of `scopes` are granted for the account and service.
    ///
    /// Scopes the service does not define are dropped with a warning and
    /// appear in neither part of the result. A failed remote check counts as
    /// a denial of the whole batch. Only storage faults are returned as
    /// errors.
    pub async fn verify_service_access(
        &self,
        account_id: &str,
        service: ServiceType,
        scopes: impl IntoIterator<Item = ScopeLevel>,
    ) -> scopegate_core::Result<VerificationResult> {
        let mut requested: Vec<ScopeLevel> = Vec::new();
        for scope in scopes {
            if !is_valid_scope(service, scope) {
                warn!(
                    account_id,
                    %service,
                    %scope,
                    "Dropping scope not valid for service"
                );
                continue;
            }
            if !requested.contains(&scope) {
                requested.push(scope);
            }
        }

        let mut result = VerificationResult::default();
        let mut batch = Vec::new();
        for scope in requested {
            let entry = self.cache.get(account_id, service, scope).await;
            if PermissionCache::is_valid(entry.as_ref()) {
                result.granted_permissions.insert(scope, true);
            } else {
                batch.push(scope);
            }
        }

        if batch.is_empty() {
            debug!(account_id, %service, "All requested scopes cached");
            return Ok(result);
        }

        match self
            .introspector
            .check_scopes(account_id, service, &batch)
            .await
        {
            Ok(checks) => {
                for scope in batch {
                    let has_access = checks.get(&scope).is_some_and(|c| c.has_access);
                    self.cache
                        .update(account_id, service, scope, has_access)
                        .await?;
                    result.granted_permissions.insert(scope, has_access);
                    if !has_access {
                        result.missing_permissions.push(scope);
                    }
                }
            }
            Err(e) => {
                warn!(
                    account_id,
                    %service,
                    error = %e,
                    "Remote scope check failed, treating batch as denied"
                );
                for scope in batch {
                    self.cache.invalidate(account_id, service, scope).await?;
                    result.granted_permissions.insert(scope, false);
                    result.missing_permissions.push(scope);
                }
            }
        }

        debug!(
            account_id,
            %service,
            missing = result.missing_permissions.len(),
            "Verification complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::introspection::{IntrospectionError, ScopeCheck};

    /// Answers from a fixed grant table and counts calls.
    struct StaticIntrospector {
        grants: HashMap<ScopeLevel, bool>,
        fail: bool,
        calls: AtomicUsize,
        last_batch: std::sync::Mutex<Vec<ScopeLevel>>,
    }

    impl StaticIntrospector {
        fn new(grants: &[(ScopeLevel, bool)]) -> Self {
            Self {
                grants: grants.iter().copied().collect(),
                fail: false,
                calls: AtomicUsize::new(0),
                last_batch: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[])
            }
        }
    }

    #[async_trait]
    impl ScopeIntrospector for StaticIntrospector {
        async fn check_scopes(
            &self,
            _account_id: &str,
            _service: ServiceType,
            scopes: &[ScopeLevel],
        ) -> Result<HashMap<ScopeLevel, ScopeCheck>, IntrospectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_batch.lock().unwrap() = scopes.to_vec();
            if self.fail {
                return Err(IntrospectionError::Api {
                    status: 503,
                    message: "Service Unavailable".into(),
                });
            }
            Ok(scopes
                .iter()
                .filter_map(|s| {
                    self.grants.get(s).map(|&has_access| {
                        (
                            *s,
                            ScopeCheck {
                                has_access,
                                required_scope: None,
                            },
                        )
                    })
                })
                .collect())
        }
    }

    fn verifier(introspector: &Arc<StaticIntrospector>) -> (Arc<PermissionCache>, AccessVerifier) {
        let cache = Arc::new(PermissionCache::in_memory());
        let verifier = AccessVerifier::new(Arc::clone(&cache), introspector.clone());
        (cache, verifier)
    }

    #[tokio::test]
    async fn mixed_remote_result_is_cached_and_reported() {
        let remote = Arc::new(StaticIntrospector::new(&[
            (ScopeLevel::Readonly, true),
            (ScopeLevel::Send, false),
        ]));
        let (cache, verifier) = verifier(&remote);

        let result = verifier
            .verify_service_access(
                "acct1",
                ServiceType::Mail,
                [ScopeLevel::Readonly, ScopeLevel::Send],
            )
            .await
            .unwrap();

        assert!(result.is_granted(ScopeLevel::Readonly));
        assert_eq!(
            result.granted_permissions.get(&ScopeLevel::Send),
            Some(&false)
        );
        assert_eq!(result.missing_permissions, vec![ScopeLevel::Send]);

        let readonly = cache
            .get("acct1", ServiceType::Mail, ScopeLevel::Readonly)
            .await
            .unwrap();
        let send = cache
            .get("acct1", ServiceType::Mail, ScopeLevel::Send)
            .await
            .unwrap();
        assert!(readonly.has_access);
        assert!(!send.has_access);
    }

    #[tokio::test]
    async fn cached_grants_skip_remote_check() {
        let remote = Arc::new(StaticIntrospector::new(&[]));
        let (cache, verifier) = verifier(&remote);
        cache
            .update("acct1", ServiceType::Mail, ScopeLevel::Readonly, true)
            .await
            .unwrap();

        let result = verifier
            .verify_service_access("acct1", ServiceType::Mail, Some(ScopeLevel::Readonly))
            .await
            .unwrap();

        assert!(result.is_complete());
        assert!(result.is_granted(ScopeLevel::Readonly));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gaps_are_checked_in_one_batch() {
        let remote = Arc::new(StaticIntrospector::new(&[
            (ScopeLevel::Send, true),
            (ScopeLevel::Compose, true),
        ]));
        let (cache, verifier) = verifier(&remote);
        cache
            .update("acct1", ServiceType::Mail, ScopeLevel::Readonly, true)
            .await
            .unwrap();

        let result = verifier
            .verify_service_access(
                "acct1",
                ServiceType::Mail,
                [ScopeLevel::Readonly, ScopeLevel::Send, ScopeLevel::Compose],
            )
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *remote.last_batch.lock().unwrap(),
            vec![ScopeLevel::Send, ScopeLevel::Compose]
        );
    }

    #[tokio::test]
    async fn invalid_scopes_are_dropped_silently() {
        let remote = Arc::new(StaticIntrospector::new(&[(ScopeLevel::Event, true)]));
        let (cache, verifier) = verifier(&remote);

        let result = verifier
            .verify_service_access(
                "acct1",
                ServiceType::Calendar,
                [ScopeLevel::Send, ScopeLevel::Event],
            )
            .await
            .unwrap();

        assert!(!result.granted_permissions.contains_key(&ScopeLevel::Send));
        assert!(!result.missing_permissions.contains(&ScopeLevel::Send));
        assert_eq!(*remote.last_batch.lock().unwrap(), vec![ScopeLevel::Event]);
        assert!(
            cache
                .get("acct1", ServiceType::Calendar, ScopeLevel::Send)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn only_invalid_scopes_means_no_remote_call() {
        let remote = Arc::new(StaticIntrospector::new(&[]));
        let (_cache, verifier) = verifier(&remote);

        let result = verifier
            .verify_service_access("acct1", ServiceType::Drive, [ScopeLevel::Send])
            .await
            .unwrap();

        assert_eq!(result, VerificationResult::default());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn absent_result_counts_as_denied() {
        let remote = Arc::new(StaticIntrospector::new(&[(ScopeLevel::Readonly, true)]));
        let (_cache, verifier) = verifier(&remote);

        let result = verifier
            .verify_service_access(
                "acct1",
                ServiceType::Contacts,
                [ScopeLevel::Readonly, ScopeLevel::OtherReadonly],
            )
            .await
            .unwrap();

        assert_eq!(result.missing_permissions, vec![ScopeLevel::OtherReadonly]);
    }

    #[tokio::test]
    async fn remote_failure_denies_and_invalidates_batch() {
        let remote = Arc::new(StaticIntrospector::failing());
        let (cache, verifier) = verifier(&remote);
        // A stale denial recorded earlier stays denied.
        cache
            .update("acct1", ServiceType::Drive, ScopeLevel::File, false)
            .await
            .unwrap();
        cache
            .update("acct1", ServiceType::Drive, ScopeLevel::Readonly, true)
            .await
            .unwrap();

        let result = verifier
            .verify_service_access(
                "acct1",
                ServiceType::Drive,
                [ScopeLevel::Readonly, ScopeLevel::File, ScopeLevel::Metadata],
            )
            .await
            .unwrap();

        assert!(result.is_granted(ScopeLevel::Readonly));
        assert_eq!(
            result.missing_permissions,
            vec![ScopeLevel::File, ScopeLevel::Metadata]
        );
        assert!(
            !cache
                .get("acct1", ServiceType::Drive, ScopeLevel::File)
                .await
                .unwrap()
                .has_access
        );
        // Invalidation never creates entries.
        assert!(
            cache
                .get("acct1", ServiceType::Drive, ScopeLevel::Metadata)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_scopes_are_checked_once() {
        let remote = Arc::new(StaticIntrospector::new(&[(ScopeLevel::Created, true)]));
        let (_cache, verifier) = verifier(&remote);

        let result = verifier
            .verify_service_access(
                "acct1",
                ServiceType::Meet,
                [ScopeLevel::Created, ScopeLevel::Created],
            )
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(*remote.last_batch.lock().unwrap(), vec![ScopeLevel::Created]);
    }
}
