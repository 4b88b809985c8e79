//! `scopegate` Core Library
//!
//! Shared functionality for `scopegate` components:
//! - Scope registry mapping provider services to their permission scopes
//! - Persisted per-account permission cache
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod cache;
pub mod config;
pub mod error;
pub mod scopes;
pub mod storage;
pub mod tracing_init;

pub use cache::{GrantState, PermissionCache, PermissionCacheEntry, PermissionMap};
pub use config::Config;
pub use error::{Error, Result};
pub use scopes::{ScopeLevel, ServiceType};
pub use storage::{FileStorage, MemoryStorage, PermissionStorage};
