//! Provider scope resolution.
//!
//! The provider-facing path never trusts a caller-supplied scope: it is
//! derived per request from the acting user's id, their identity metadata,
//! and the company ownership recorded in the order/service read-model.

use crate::domain::ports::OrderDirectoryRef;
use crate::domain::scope::{ActingUser, ProviderScope};
use crate::error::Result;
use serde_json::Value;

pub struct ScopeResolver {
    directory: OrderDirectoryRef,
}

impl ScopeResolver {
    pub fn new(directory: OrderDirectoryRef) -> Self {
        Self { directory }
    }

    /// Union of the user's own provider id, any `companyId`/`companyIds`
    /// metadata keys, and the companies the read-model says they own.
    /// Entries are trimmed, empties dropped, duplicates removed. The result
    /// may legitimately be empty; callers treat that as zero visibility.
    pub async fn resolve(&self, user: &ActingUser) -> Result<ProviderScope> {
        let provider_id = Some(user.id.trim().to_string()).filter(|id| !id.is_empty());

        let mut company_ids: Vec<String> = Vec::new();
        let mut push = |raw: &str| {
            let trimmed = raw.trim();
            if !trimmed.is_empty() && !company_ids.iter().any(|c| c == trimmed) {
                company_ids.push(trimmed.to_string());
            }
        };

        if let Some(Value::String(company)) = user.metadata.get("companyId") {
            push(company);
        }
        if let Some(Value::Array(companies)) = user.metadata.get("companyIds") {
            for entry in companies {
                if let Value::String(company) = entry {
                    push(company);
                }
            }
        }
        if let Some(id) = &provider_id {
            for company in self.directory.companies_owned_by(id).await? {
                push(&company);
            }
        }

        Ok(ProviderScope {
            provider_id,
            company_ids,
        })
    }
}
