//! In-flight consent tracking.
//!
//! At most one consent flow runs per (service, scope). A caller asking for a
//! grant that is already being requested joins the running flow and receives
//! the same [`PendingConsent`] handle; the outcome fans out to every holder.
//! Entries exist only in memory and are removed as soon as the flow settles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use scopegate_core::{ScopeLevel, ServiceType};

use super::gateway::AuthorizationGateway;
use super::types::{ConsentError, ConsentPrompt, ConsentRequest, PermissionErrorPayload};

/// The user dismissed or declined a consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("consent declined")]
pub struct ConsentDenied;

/// Interactive prompt shown before leaving for the provider.
#[async_trait]
pub trait ConsentUi: Send + Sync {
    /// Resolves on approval; fails on dismissal or denial.
    async fn request_consent(&self, prompt: &ConsentPrompt) -> Result<(), ConsentDenied>;
}

type Outcome = Option<Result<bool, ConsentError>>;
type PendingKey = (ServiceType, ScopeLevel);

/// Shared handle to a consent flow.
#[derive(Debug)]
pub struct PendingConsent {
    outcome: watch::Receiver<Outcome>,
}

impl PendingConsent {
    fn settled(result: Result<bool, ConsentError>) -> Self {
        let (_tx, rx) = watch::channel(Some(result));
        Self { outcome: rx }
    }

    /// Wait for the flow to settle. `Ok(true)` once the grant was requested.
    pub async fn wait(&self) -> Result<bool, ConsentError> {
        let mut rx = self.outcome.clone();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ConsentError::Abandoned)?;
        settled.clone().unwrap_or(Err(ConsentError::Abandoned))
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// The driving task went away without reporting.
    fn is_abandoned(&self) -> bool {
        self.outcome.has_changed().is_err() && !self.is_settled()
    }
}

enum Flow {
    /// Prompt first, then redirect for the single scope.
    Prompted(ConsentRequest),
    /// Redirect straight away for every claimed scope.
    Direct {
        account_id: String,
        service: ServiceType,
        scopes: Vec<ScopeLevel>,
    },
}

/// Coordinates consent flows and de-duplicates concurrent requests.
#[derive(Clone)]
pub struct ConsentCoordinator {
    ui: Arc<dyn ConsentUi>,
    gateway: Arc<dyn AuthorizationGateway>,
    pending: Arc<Mutex<HashMap<PendingKey, Arc<PendingConsent>>>>,
}

impl ConsentCoordinator {
    pub fn new(ui: Arc<dyn ConsentUi>, gateway: Arc<dyn AuthorizationGateway>) -> Self {
        Self {
            ui,
            gateway,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle an insufficient-permission error raised by a data call.
    ///
    /// `error_payload` is the structured JSON attached to the error;
    /// `account_id` is used when the payload names no account. A payload
    /// that cannot be resolved yields an already-rejected handle.
    pub async fn request_permission(
        &self,
        account_id: &str,
        error_payload: &str,
    ) -> Arc<PendingConsent> {
        let request = match PermissionErrorPayload::parse(error_payload)
            .and_then(|payload| payload.into_request(account_id))
        {
            Ok(request) => request,
            Err(e) => {
                warn!(account_id, error = %e, "Cannot request permission");
                return Arc::new(PendingConsent::settled(Err(e)));
            }
        };
        self.request_consent(request).await
    }

    /// Start, or join, the prompted consent flow for one grant.
    pub async fn request_consent(&self, request: ConsentRequest) -> Arc<PendingConsent> {
        let key = (request.service, request.scope);
        let mut pending = self.pending.lock().await;
        if let Some(existing) = pending.get(&key).filter(|p| !p.is_abandoned()) {
            debug!(
                service = %request.service,
                scope = %request.scope,
                "Joining in-flight consent request"
            );
            return Arc::clone(existing);
        }

        let (tx, rx) = watch::channel(None);
        let handle = Arc::new(PendingConsent { outcome: rx });
        pending.insert(key, Arc::clone(&handle));
        drop(pending);

        info!(
            account_id = %request.account_id,
            service = %request.service,
            scope = %request.scope,
            "Starting consent flow"
        );
        self.spawn_flow(Flow::Prompted(request), vec![key], tx);
        handle
    }

    /// Redirect for `missing` scopes that have no flow in progress.
    ///
    /// Scopes already being requested are left to their running flow and
    /// its caller. Returns the handle of the redirect started here, or
    /// `None` when nothing was left to request. That flow never prompts, so
    /// it can only fail on the redirect itself.
    pub async fn request_missing_permissions(
        &self,
        account_id: &str,
        service: ServiceType,
        missing: &[ScopeLevel],
    ) -> Option<Arc<PendingConsent>> {
        let mut pending = self.pending.lock().await;
        let mut claimed = Vec::new();
        for &scope in missing {
            let in_flight = pending
                .get(&(service, scope))
                .is_some_and(|p| !p.is_abandoned());
            if !in_flight && !claimed.contains(&scope) {
                claimed.push(scope);
            }
        }

        if claimed.is_empty() {
            drop(pending);
            debug!(account_id, %service, "Missing permissions already being requested");
            return None;
        }

        let (tx, rx) = watch::channel(None);
        let handle = Arc::new(PendingConsent { outcome: rx });
        let keys: Vec<PendingKey> = claimed.iter().map(|&scope| (service, scope)).collect();
        for key in &keys {
            pending.insert(*key, Arc::clone(&handle));
        }
        drop(pending);

        debug!(account_id, %service, scopes = ?claimed, "Requesting missing permissions");
        self.spawn_flow(
            Flow::Direct {
                account_id: account_id.to_string(),
                service,
                scopes: claimed,
            },
            keys,
            tx,
        );
        Some(handle)
    }

    /// Number of (service, scope) pairs with a flow in progress.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn spawn_flow(&self, flow: Flow, keys: Vec<PendingKey>, tx: watch::Sender<Outcome>) {
        let ui = Arc::clone(&self.ui);
        let gateway = Arc::clone(&self.gateway);
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            let outcome = run_flow(ui.as_ref(), gateway.as_ref(), flow).await;

            // Deregister before publishing so a later request starts afresh.
            let mut guard = pending.lock().await;
            for key in &keys {
                guard.remove(key);
            }
            drop(guard);

            tx.send_replace(Some(outcome));
        });
    }
}

async fn run_flow(
    ui: &dyn ConsentUi,
    gateway: &dyn AuthorizationGateway,
    flow: Flow,
) -> Result<bool, ConsentError> {
    let (account_id, service, scopes) = match flow {
        Flow::Prompted(request) => {
            let prompt = ConsentPrompt::for_scope(request.service, request.scope);
            if ui.request_consent(&prompt).await.is_err() {
                info!(
                    account_id = %request.account_id,
                    service = %request.service,
                    scope = %request.scope,
                    "Consent declined"
                );
                return Err(ConsentError::Denied {
                    service: request.service,
                    scope: request.scope,
                });
            }
            (request.account_id, request.service, vec![request.scope])
        }
        Flow::Direct {
            account_id,
            service,
            scopes,
        } => (account_id, service, scopes),
    };

    gateway
        .request_missing_permissions(&account_id, service, &scopes)
        .await
        .map_err(|e| {
            warn!(%account_id, %service, error = %e, "Consent redirect failed");
            ConsentError::Redirect(e.to_string())
        })?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::permission::gateway::GatewayError;

    /// Holds every prompt until released, then answers with `approve`.
    struct GatedUi {
        approve: bool,
        prompts: AtomicUsize,
        release: Notify,
    }

    impl GatedUi {
        fn new(approve: bool) -> Arc<Self> {
            Arc::new(Self {
                approve,
                prompts: AtomicUsize::new(0),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl ConsentUi for GatedUi {
        async fn request_consent(&self, _prompt: &ConsentPrompt) -> Result<(), ConsentDenied> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            if self.approve { Ok(()) } else { Err(ConsentDenied) }
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        requests: std::sync::Mutex<Vec<(String, ServiceType, Vec<ScopeLevel>)>>,
    }

    #[async_trait]
    impl AuthorizationGateway for RecordingGateway {
        async fn request_missing_permissions(
            &self,
            account_id: &str,
            service: ServiceType,
            missing: &[ScopeLevel],
        ) -> Result<(), GatewayError> {
            self.requests
                .lock()
                .unwrap()
                .push((account_id.to_string(), service, missing.to_vec()));
            Ok(())
        }
    }

    const SEND_PAYLOAD: &str = r#"{"service":"mail","scope":"send"}"#;

    #[tokio::test]
    async fn concurrent_requests_share_one_flow() {
        let ui = GatedUi::new(true);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui.clone(), gateway.clone());

        let first = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        let second = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(coordinator.pending_count().await, 1);

        // Let the spawned flow reach the prompt before releasing it.
        while ui.prompts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        ui.release.notify_one();

        assert_eq!(first.wait().await, Ok(true));
        assert_eq!(second.wait().await, Ok(true));
        assert_eq!(ui.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.requests.lock().unwrap().len(), 1);
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn denial_rejects_every_waiter_and_clears_entry() {
        let ui = GatedUi::new(false);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui.clone(), gateway.clone());

        let first = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        let second = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        while ui.prompts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        ui.release.notify_one();

        let denied = ConsentError::Denied {
            service: ServiceType::Mail,
            scope: ScopeLevel::Send,
        };
        assert_eq!(first.wait().await, Err(denied.clone()));
        assert_eq!(second.wait().await, Err(denied));
        assert!(gateway.requests.lock().unwrap().is_empty());
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn settled_flow_is_not_reused() {
        let ui = GatedUi::new(true);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui.clone(), gateway.clone());

        let first = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        while ui.prompts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        ui.release.notify_one();
        first.wait().await.unwrap();

        let second = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_settled());
    }

    #[tokio::test]
    async fn different_scopes_get_separate_flows() {
        let ui = GatedUi::new(true);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui, gateway);

        let send = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        let compose = coordinator
            .request_permission("acct1", r#"{"service":"mail","scope":"compose"}"#)
            .await;
        assert!(!Arc::ptr_eq(&send, &compose));
        assert_eq!(coordinator.pending_count().await, 2);
    }

    #[tokio::test]
    async fn malformed_payload_rejects_without_prompt() {
        let ui = GatedUi::new(true);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui.clone(), gateway);

        let handle = coordinator.request_permission("acct1", "403 Forbidden").await;
        assert!(handle.is_settled());
        assert!(matches!(
            handle.wait().await,
            Err(ConsentError::MalformedPayload(_))
        ));
        assert_eq!(ui.prompts.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn missing_permissions_skip_scopes_already_in_flight() {
        let ui = GatedUi::new(true);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui.clone(), gateway.clone());

        // `send` is held open by a prompted flow.
        let prompted = coordinator.request_permission("acct1", SEND_PAYLOAD).await;

        let direct = coordinator
            .request_missing_permissions(
                "acct1",
                ServiceType::Mail,
                &[ScopeLevel::Send, ScopeLevel::Compose],
            )
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&prompted, &direct));
        assert_eq!(direct.wait().await, Ok(true));
        assert!(!prompted.is_settled());

        let requests = gateway.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![(
                "acct1".to_string(),
                ServiceType::Mail,
                vec![ScopeLevel::Compose]
            )]
        );
    }

    #[tokio::test]
    async fn missing_permissions_all_in_flight_start_nothing() {
        let ui = GatedUi::new(false);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui.clone(), gateway.clone());

        let prompted = coordinator.request_permission("acct1", SEND_PAYLOAD).await;
        let direct = coordinator
            .request_missing_permissions("acct1", ServiceType::Mail, &[ScopeLevel::Send])
            .await;
        assert!(direct.is_none());
        assert_eq!(coordinator.pending_count().await, 1);

        // The decline reaches the prompted caller only.
        while ui.prompts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        ui.release.notify_one();
        assert!(matches!(
            prompted.wait().await,
            Err(ConsentError::Denied { .. })
        ));
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_missing_starts_nothing() {
        let ui = GatedUi::new(true);
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator = ConsentCoordinator::new(ui, gateway.clone());

        let handle = coordinator
            .request_missing_permissions("acct1", ServiceType::Mail, &[])
            .await;
        assert!(handle.is_none());
        assert!(gateway.requests.lock().unwrap().is_empty());
    }
}
