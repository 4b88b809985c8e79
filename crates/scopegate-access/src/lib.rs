//! `scopegate` access layer
//!
//! Permission gating for feature code that calls a third-party provider:
//! - Batched scope verification against the token-introspection endpoint
//! - De-duplicated consent flows with redirect to the provider
//! - Per-service façade with cached boolean checks and invalidation

pub mod introspection;
pub mod permission;

pub use introspection::{IntrospectionClient, ScopeIntrospector};
pub use permission::{AccessLayer, AccessVerifier, ConsentCoordinator, ServicePermissions};
