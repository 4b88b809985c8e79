//! Service permission gating.
//!
//! Verifies provider scopes against the persisted cache and the
//! introspection endpoint, and routes missing grants through a single
//! consent flow per (service, scope).

mod facade;
mod gateway;
mod pending;
mod types;
mod verifier;

pub use facade::{AccessLayer, FacadeError, ServicePermissions};
pub use gateway::{AuthorizationGateway, GatewayError, LogRedirector, RedirectGateway, Redirector};
pub use pending::{ConsentCoordinator, ConsentDenied, ConsentUi, PendingConsent};
pub use types::{
    ConsentError, ConsentPrompt, ConsentRequest, PermissionErrorPayload, VerificationResult,
};
pub use verifier::AccessVerifier;
