//! Subcommand definitions and handlers.
//!
//! Handlers write their report to the given writer so `main` can pass
//! stdout and tests can pass a buffer.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};

use scopegate_access::permission::{
    AuthorizationGateway, ConsentError, ConsentUi, LogRedirector, RedirectGateway,
    VerificationResult,
};
use scopegate_access::{AccessLayer, AccessVerifier, ConsentCoordinator, IntrospectionClient};
use scopegate_core::scopes::{describe_scope, provider_scope, valid_scopes_for};
use scopegate_core::{Config, GrantState, PermissionCache, ScopeLevel, ServiceType};

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// List the scopes each service defines.
    Scopes {
        /// Only this service.
        #[arg(short, long)]
        service: Option<ServiceType>,
    },
    /// Print cached grants.
    Show {
        /// Only this account.
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Answer from the cache whether a scope is usable.
    ///
    /// A cached `full` grant satisfies every scope of its service.
    Check {
        account: String,
        service: ServiceType,
        scope: ScopeLevel,
    },
    /// Verify scopes against the introspection endpoint.
    Verify {
        account: String,
        service: ServiceType,
        /// Scopes to verify, comma separated (default: every scope of the service).
        #[arg(short, long = "scope", value_delimiter = ',')]
        scopes: Vec<ScopeLevel>,
        /// Print a consent URL for the scopes still missing.
        #[arg(long)]
        request_missing: bool,
    },
    /// Request consent for the grant named by a permission-error payload.
    Request {
        /// Account used when the payload names none.
        account: String,
        /// JSON payload, e.g. '{"service":"mail","scope":"send"}'.
        payload: String,
    },
    /// Forget a cached grant after the provider rejected a call.
    Invalidate {
        account: String,
        service: ServiceType,
        scope: ScopeLevel,
    },
    /// Drop cached grants for one account, or for every account.
    Clear {
        #[arg(short, long)]
        account: Option<String>,
    },
}

/// Wiring for commands that talk to the backend.
pub struct Session {
    pub layer: AccessLayer,
    pub gateway: Arc<RedirectGateway<LogRedirector>>,
}

impl Session {
    /// Build the access layer over `cache` from the resolved configuration.
    pub fn connect(
        config: &Config,
        cache: Arc<PermissionCache>,
        ui: Arc<dyn ConsentUi>,
    ) -> Result<Self> {
        let client = IntrospectionClient::new(&config.introspection)
            .context("Failed to create introspection client")?;
        let gateway = Arc::new(RedirectGateway::new(
            &config.consent,
            LogRedirector::new(config.consent.return_path.clone()),
        ));
        let verifier = Arc::new(AccessVerifier::new(Arc::clone(&cache), Arc::new(client)));
        let redirects: Arc<dyn AuthorizationGateway> = Arc::clone(&gateway) as _;
        let consent = ConsentCoordinator::new(ui, redirects);
        Ok(Self {
            layer: AccessLayer::new(cache, verifier, consent),
            gateway,
        })
    }

    fn write_redirects(&self, out: &mut impl Write) -> Result<()> {
        for url in self.gateway.redirector().visited() {
            writeln!(out, "Grant missing permissions at: {url}")?;
        }
        Ok(())
    }
}

pub fn scopes(out: &mut impl Write, service: Option<ServiceType>) -> Result<()> {
    let services = service.map_or_else(|| ServiceType::ALL.to_vec(), |s| vec![s]);
    for service in services {
        writeln!(out, "{} ({service})", service.display_name())?;
        for &scope in valid_scopes_for(service) {
            writeln!(
                out,
                "  {:<16} {}",
                scope.as_str(),
                describe_scope(service, scope)
            )?;
            if let Some(provider) = provider_scope(service, scope) {
                writeln!(out, "  {:<16} {provider}", "")?;
            }
        }
    }
    Ok(())
}

pub async fn show(
    out: &mut impl Write,
    cache: &PermissionCache,
    account: Option<&str>,
) -> Result<()> {
    let snapshot = cache.snapshot().await;
    let mut rows = 0usize;
    for (account_id, services) in &snapshot {
        if account.is_some_and(|a| a != account_id) {
            continue;
        }
        for (service, scopes) in services {
            for (scope, entry) in scopes {
                if rows == 0 {
                    writeln!(
                        out,
                        "{:<24} {:<10} {:<16} {:<8} {}",
                        "ACCOUNT", "SERVICE", "SCOPE", "STATE", "CHECKED"
                    )?;
                }
                writeln!(
                    out,
                    "{:<24} {:<10} {:<16} {:<8} {}",
                    account_id,
                    service.as_str(),
                    scope.as_str(),
                    state_str(GrantState::from(Some(entry))),
                    entry.last_checked
                )?;
                rows += 1;
            }
        }
    }
    if rows == 0 {
        writeln!(out, "No cached permissions.")?;
    }
    Ok(())
}

pub async fn check(
    out: &mut impl Write,
    layer: &AccessLayer,
    account: &str,
    service: ServiceType,
    scope: ScopeLevel,
) -> Result<bool> {
    let permitted = layer
        .service_permissions(Some(account), service)
        .has_required_permission(scope)
        .await;
    let state = layer.cache().grant_state(account, service, scope).await;
    writeln!(
        out,
        "{service}/{scope}: {} (cached: {})",
        if permitted { "permitted" } else { "not permitted" },
        state_str(state)
    )?;
    Ok(permitted)
}

pub async fn verify(
    out: &mut impl Write,
    session: &Session,
    account: &str,
    service: ServiceType,
    scopes: Vec<ScopeLevel>,
    request_missing: bool,
) -> Result<VerificationResult> {
    let layer = &session.layer;
    let result = if scopes.is_empty() {
        layer
            .service_permissions(Some(account), service)
            .check_all_service_permissions(request_missing)
            .await?
    } else {
        let result = layer
            .verifier()
            .verify_service_access(account, service, scopes)
            .await?;
        if request_missing && !result.is_complete() {
            let started = layer
                .consent()
                .request_missing_permissions(account, service, &result.missing_permissions)
                .await;
            if let Some(own) = started {
                own.wait().await?;
            }
        }
        result
    };

    for (scope, granted) in &result.granted_permissions {
        writeln!(
            out,
            "{:<16} {}",
            scope.as_str(),
            if *granted { "granted" } else { "missing" }
        )?;
    }
    session.write_redirects(out)?;
    Ok(result)
}

pub async fn request(
    out: &mut impl Write,
    session: &Session,
    account: &str,
    payload: &str,
) -> Result<bool> {
    let pending = session.layer.consent().request_permission(account, payload).await;
    match pending.wait().await {
        Ok(requested) => {
            session.write_redirects(out)?;
            Ok(requested)
        }
        Err(e @ ConsentError::Denied { .. }) => {
            writeln!(out, "{e}")?;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn invalidate(
    out: &mut impl Write,
    layer: &AccessLayer,
    account: &str,
    service: ServiceType,
    scope: ScopeLevel,
) -> Result<()> {
    layer
        .service_permissions(Some(account), service)
        .invalidate_service_permission(scope)
        .await?;
    writeln!(out, "Invalidated {service}/{scope} for {account}")?;
    Ok(())
}

pub async fn clear(
    out: &mut impl Write,
    cache: &PermissionCache,
    account: Option<&str>,
) -> Result<()> {
    match account {
        Some(account) => {
            cache.clear_account_permissions(account).await?;
            writeln!(out, "Cleared cached permissions for {account}")?;
        }
        None => {
            cache.clear_all_permissions().await?;
            writeln!(out, "Cleared all cached permissions")?;
        }
    }
    Ok(())
}

const fn state_str(state: GrantState) -> &'static str {
    match state {
        GrantState::Unknown => "unknown",
        GrantState::Granted => "granted",
        GrantState::Denied => "denied",
    }
}
