use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The identity every operation is attributed to. Replaces scattered
/// `"system"` defaults with one explicit value threaded through call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub actor_id: String,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
        }
    }

    /// Background/maintenance identity for operations with no acting user.
    pub fn system() -> Self {
        Self::new("system")
    }
}

/// The acting user as the scope resolver sees them: an id plus whatever
/// metadata the identity layer stored (companyId/companyIds keys included).
#[derive(Debug, Clone, Default)]
pub struct ActingUser {
    pub id: String,
    pub metadata: Map<String, Value>,
}

/// Visibility filter for the provider-facing path. Derived per request,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderScope {
    pub provider_id: Option<String>,
    pub company_ids: Vec<String>,
}

impl ProviderScope {
    /// An empty scope must surface zero rows, never all rows.
    pub fn is_empty(&self) -> bool {
        self.provider_id.is_none() && self.company_ids.is_empty()
    }

    /// OR semantics across the scope dimensions: a record owned by either
    /// the provider's own id or any of their companies is visible.
    pub fn covers(&self, provider_id: Option<&str>, company_id: Option<&str>) -> bool {
        if self.is_empty() {
            return false;
        }
        let provider_match = match (&self.provider_id, provider_id) {
            (Some(own), Some(theirs)) => own == theirs,
            _ => false,
        };
        let company_match =
            company_id.is_some_and(|c| self.company_ids.iter().any(|mine| mine == c));
        provider_match || company_match
    }
}
