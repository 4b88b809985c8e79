//! Wire types for the token-introspection endpoint.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use scopegate_core::ScopeLevel;

/// Per-scope outcome of a remote check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeCheck {
    pub has_access: bool,
    /// Provider scope that would have to be granted, when access is missing.
    #[serde(default)]
    pub required_scope: Option<String>,
}

/// A single-scope answer as returned by older endpoint versions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleScopeRecord {
    #[serde(default)]
    pub service: Option<String>,
    pub scope_level: String,
    pub has_access: bool,
    #[serde(default)]
    pub required_scope: Option<String>,
}

/// Response body of `GET /permissions/check`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IntrospectionResponse {
    Batch {
        #[serde(rename = "scopeResults")]
        scope_results: HashMap<String, ScopeCheck>,
    },
    Single(SingleScopeRecord),
}

impl IntrospectionResponse {
    /// Key the results by scope, skipping tags this client does not know.
    pub fn into_checks(self) -> HashMap<ScopeLevel, ScopeCheck> {
        let entries: Vec<(String, ScopeCheck)> = match self {
            Self::Batch { scope_results } => scope_results.into_iter().collect(),
            Self::Single(record) => vec![(
                record.scope_level,
                ScopeCheck {
                    has_access: record.has_access,
                    required_scope: record.required_scope,
                },
            )],
        };

        entries
            .into_iter()
            .filter_map(|(tag, check)| match tag.parse::<ScopeLevel>() {
                Ok(scope) => Some((scope, check)),
                Err(_) => {
                    debug!(scope = %tag, "Ignoring unknown scope in introspection response");
                    None
                }
            })
            .collect()
    }
}
