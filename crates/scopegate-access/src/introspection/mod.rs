//! Token-introspection integration.
//!
//! Remote scope checks answer "does this account's token currently carry
//! these scopes?" for one service at a time. The verifier talks to the
//! [`ScopeIntrospector`] trait; [`IntrospectionClient`] is the reqwest-based
//! implementation against the suite's backend.

mod client;
pub mod types;


use std::collections::HashMap;

use async_trait::async_trait;

use scopegate_core::{ScopeLevel, ServiceType};

pub use client::{IntrospectionClient, IntrospectionError};
pub use types::{IntrospectionResponse, ScopeCheck};

/// Remote source of truth for granted scopes.
#[async_trait]
pub trait ScopeIntrospector: Send + Sync {
    /// Check a batch of scopes for one account and service in a single call.
    ///
    /// Scopes missing from the returned map are to be treated as not granted.
    async fn check_scopes(
        &self,
        account_id: &str,
        service: ServiceType,
        scopes: &[ScopeLevel],
    ) -> Result<HashMap<ScopeLevel, ScopeCheck>, IntrospectionError>;
}
