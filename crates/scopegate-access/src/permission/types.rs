//! Permission layer types.

use std::collections::BTreeMap;

use serde::Deserialize;

use scopegate_core::scopes::{describe_scope, is_valid_scope};
use scopegate_core::{ScopeLevel, ServiceType};

/// Outcome of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    /// Every checked scope with its current grant.
    pub granted_permissions: BTreeMap<ScopeLevel, bool>,
    /// Scopes that are still not granted, in request order.
    pub missing_permissions: Vec<ScopeLevel>,
}

impl VerificationResult {
    pub fn is_granted(&self, scope: ScopeLevel) -> bool {
        self.granted_permissions.get(&scope).copied().unwrap_or(false)
    }

    pub fn is_complete(&self) -> bool {
        self.missing_permissions.is_empty()
    }
}

/// Text shown to the user before sending them to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentPrompt {
    pub title: String,
    pub message: String,
}

impl ConsentPrompt {
    pub fn for_scope(service: ServiceType, scope: ScopeLevel) -> Self {
        Self {
            title: format!("{} permission required", service.display_name()),
            message: format!(
                "To continue, allow this app to {}. You will be taken to your provider to grant access.",
                describe_scope(service, scope)
            ),
        }
    }
}

/// Why a consent flow did not end in a grant.
///
/// `Clone` so one outcome can be handed to every caller sharing the flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsentError {
    /// The user declined. Not retryable; surface a "permission required" state.
    #[error("Permission denied by user: {service}/{scope}")]
    Denied {
        service: ServiceType,
        scope: ScopeLevel,
    },

    #[error("Malformed permission error payload: {0}")]
    MalformedPayload(String),

    #[error("Scope {scope} is not valid for service {service}")]
    InvalidScope { service: String, scope: String },

    #[error("Authorization redirect failed: {0}")]
    Redirect(String),

    /// The flow ended without reporting an outcome.
    #[error("Consent flow abandoned")]
    Abandoned,
}

/// A request for one (service, scope) grant on behalf of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub account_id: String,
    pub service: ServiceType,
    pub scope: ScopeLevel,
}

/// Structured payload attached to an insufficient-permission API error.
///
/// Accepted either bare or wrapped in an `error` object; `scopeLevel` is an
/// alias of `scope`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionErrorPayload {
    pub service: String,
    #[serde(alias = "scopeLevel")]
    pub scope: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadShape {
    Wrapped { error: PermissionErrorPayload },
    Bare(PermissionErrorPayload),
}

impl PermissionErrorPayload {
    pub fn parse(raw: &str) -> Result<Self, ConsentError> {
        match serde_json::from_str::<PayloadShape>(raw) {
            Ok(PayloadShape::Wrapped { error } | PayloadShape::Bare(error)) => Ok(error),
            Err(e) => Err(ConsentError::MalformedPayload(e.to_string())),
        }
    }

    /// Resolve into a typed request. The payload's account wins over
    /// `default_account`.
    pub fn into_request(self, default_account: &str) -> Result<ConsentRequest, ConsentError> {
        let invalid = || ConsentError::InvalidScope {
            service: self.service.clone(),
            scope: self.scope.clone(),
        };
        let service: ServiceType = self.service.parse().map_err(|_| invalid())?;
        let scope: ScopeLevel = self.scope.parse().map_err(|_| invalid())?;
        if !is_valid_scope(service, scope) {
            return Err(invalid());
        }
        let account_id = self
            .account_id
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| default_account.to_string());
        if account_id.is_empty() {
            return Err(ConsentError::MalformedPayload(
                "no account to request permission for".into(),
            ));
        }
        Ok(ConsentRequest {
            account_id,
            service,
            scope,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_payload_with_scope_level_alias() {
        let payload =
            PermissionErrorPayload::parse(r#"{"service":"mail","scopeLevel":"send"}"#).unwrap();
        let request = payload.into_request("acct1").unwrap();
        assert_eq!(request.service, ServiceType::Mail);
        assert_eq!(request.scope, ScopeLevel::Send);
        assert_eq!(request.account_id, "acct1");
    }

    #[test]
    fn parses_wrapped_payload_and_prefers_its_account() {
        let payload = PermissionErrorPayload::parse(
            r#"{"error":{"service":"drive","scope":"file","accountId":"acct9","message":"insufficient scope"}}"#,
        )
        .unwrap();
        let request = payload.into_request("acct1").unwrap();
        assert_eq!(request.account_id, "acct9");
        assert_eq!(request.scope, ScopeLevel::File);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            PermissionErrorPayload::parse("Request failed with status 403"),
            Err(ConsentError::MalformedPayload(_))
        ));
    }

    #[test]
    fn scope_outside_service_is_invalid() {
        let payload =
            PermissionErrorPayload::parse(r#"{"service":"calendar","scope":"send"}"#).unwrap();
        assert!(matches!(
            payload.into_request("acct1"),
            Err(ConsentError::InvalidScope { .. })
        ));
    }

    #[test]
    fn missing_account_is_malformed() {
        let payload =
            PermissionErrorPayload::parse(r#"{"service":"mail","scope":"send"}"#).unwrap();
        assert!(matches!(
            payload.into_request(""),
            Err(ConsentError::MalformedPayload(_))
        ));
    }

    #[test]
    fn prompt_uses_registry_description() {
        let prompt = ConsentPrompt::for_scope(ServiceType::Mail, ScopeLevel::Send);
        assert_eq!(prompt.title, "Mail permission required");
        assert!(prompt.message.contains("send email on your behalf"));
    }
}
