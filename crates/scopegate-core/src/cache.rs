//! Persisted permission cache.
//!
//! Tracks, per account, service and scope, whether the provider has granted
//! access. A `hasAccess == true` entry is trusted until invalidated; a false
//! entry carries no weight and is always re-verified. Every mutation is
//! serialized behind one write lock and written through to storage before
//! the lock is released; a mutation storage rejects leaves the cache as it
//! was.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::scopes::{ScopeLevel, ServiceType, is_valid_scope};
use crate::storage::{MemoryStorage, PermissionStorage};

/// One grant record for an (account, service, scope) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCacheEntry {
    pub has_access: bool,
    /// Unix timestamp in milliseconds. Informational only.
    pub last_checked: i64,
}

/// `account → service → scope → entry`.
pub type PermissionMap =
    BTreeMap<String, BTreeMap<ServiceType, BTreeMap<ScopeLevel, PermissionCacheEntry>>>;

/// Externally meaningful state of a cached scope.
///
/// Only `Granted` counts as access; `Unknown` and `Denied` are both falsy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    /// Never checked (no entry).
    Unknown,
    Granted,
    /// Checked and refused, or invalidated after an authorization failure.
    Denied,
}

impl GrantState {
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl From<Option<&PermissionCacheEntry>> for GrantState {
    fn from(entry: Option<&PermissionCacheEntry>) -> Self {
        match entry {
            None => Self::Unknown,
            Some(e) if e.has_access => Self::Granted,
            Some(_) => Self::Denied,
        }
    }
}

/// Current time as a Unix timestamp in milliseconds.
#[allow(clippy::cast_possible_truncation)]
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Process-wide permission cache with write-through persistence.
pub struct PermissionCache {
    permissions: RwLock<PermissionMap>,
    storage: Arc<dyn PermissionStorage>,
}

impl std::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCache").finish_non_exhaustive()
    }
}

impl PermissionCache {
    /// Open the cache, restoring whatever the storage holds.
    ///
    /// Fails only when the stored document is unreadable.
    pub fn open(storage: Arc<dyn PermissionStorage>) -> Result<Self> {
        let permissions = storage.load()?.unwrap_or_default();
        debug!(accounts = permissions.len(), "Permission cache loaded");
        Ok(Self {
            permissions: RwLock::new(permissions),
            storage,
        })
    }

    /// Cache backed by [`MemoryStorage`], starting empty.
    pub fn in_memory() -> Self {
        Self {
            permissions: RwLock::new(PermissionMap::new()),
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    /// An entry counts only when present and granted.
    pub fn is_valid(entry: Option<&PermissionCacheEntry>) -> bool {
        entry.is_some_and(|e| e.has_access)
    }

    pub async fn get(
        &self,
        account_id: &str,
        service: ServiceType,
        scope: ScopeLevel,
    ) -> Option<PermissionCacheEntry> {
        self.permissions
            .read()
            .await
            .get(account_id)?
            .get(&service)?
            .get(&scope)
            .copied()
    }

    pub async fn grant_state(
        &self,
        account_id: &str,
        service: ServiceType,
        scope: ScopeLevel,
    ) -> GrantState {
        GrantState::from(self.get(account_id, service, scope).await.as_ref())
    }

    /// Record the outcome of a check, stamping `lastChecked` with now.
    ///
    /// Pairs the registry does not know for the service are never stored.
    pub async fn update(
        &self,
        account_id: &str,
        service: ServiceType,
        scope: ScopeLevel,
        has_access: bool,
    ) -> Result<()> {
        if !is_valid_scope(service, scope) {
            warn!(
                account_id,
                %service,
                %scope,
                "Refusing to cache scope not valid for service"
            );
            return Ok(());
        }

        let mut guard = self.permissions.write().await;
        let mut next = guard.clone();
        next.entry(account_id.to_string())
            .or_default()
            .entry(service)
            .or_default()
            .insert(
                scope,
                PermissionCacheEntry {
                    has_access,
                    last_checked: unix_millis(),
                },
            );
        self.commit(&mut guard, next).await?;
        drop(guard);

        debug!(account_id, %service, %scope, has_access, "Updated permission cache");
        Ok(())
    }

    /// Mark an existing entry as no longer granted. No-op when absent.
    pub async fn invalidate(
        &self,
        account_id: &str,
        service: ServiceType,
        scope: ScopeLevel,
    ) -> Result<()> {
        let mut guard = self.permissions.write().await;
        let mut next = guard.clone();
        let Some(entry) = next
            .get_mut(account_id)
            .and_then(|services| services.get_mut(&service))
            .and_then(|scopes| scopes.get_mut(&scope))
        else {
            return Ok(());
        };
        entry.has_access = false;
        self.commit(&mut guard, next).await?;
        drop(guard);

        info!(account_id, %service, %scope, "Invalidated cached permission");
        Ok(())
    }

    /// Forget everything cached for one account.
    pub async fn clear_account_permissions(&self, account_id: &str) -> Result<()> {
        let mut guard = self.permissions.write().await;
        if guard.contains_key(account_id) {
            let mut next = guard.clone();
            next.remove(account_id);
            self.commit(&mut guard, next).await?;
        }
        drop(guard);

        info!(account_id, "Cleared account permissions");
        Ok(())
    }

    /// Reset the whole cache. Safe to call repeatedly.
    pub async fn clear_all_permissions(&self) -> Result<()> {
        let mut guard = self.permissions.write().await;
        self.commit(&mut guard, PermissionMap::new()).await?;
        drop(guard);

        info!("Cleared all permissions");
        Ok(())
    }

    /// Save `next` on the blocking pool, then make it the live map.
    ///
    /// The live map is left untouched when storage rejects the document.
    async fn commit(
        &self,
        live: &mut RwLockWriteGuard<'_, PermissionMap>,
        next: PermissionMap,
    ) -> Result<()> {
        let storage = Arc::clone(&self.storage);
        let next = tokio::task::spawn_blocking(move || storage.save(&next).map(|()| next))
            .await
            .map_err(|e| Error::Storage(format!("Save task failed: {e}")))??;
        **live = next;
        Ok(())
    }

    /// Copy of the full map, for inspection.
    pub async fn snapshot(&self) -> PermissionMap {
        self.permissions.read().await.clone()
    }
}
