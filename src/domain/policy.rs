use crate::domain::money::DEFAULT_CURRENCY;
use crate::domain::patch::Patch;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A named rule set governing when escrowed funds may be released.
///
/// The normalized shape is identical whichever backend holds it: the
/// platform-wide settings document or the provider-scoped row store.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(default)]
pub struct ReleasePolicy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub auto_release_days: i64,
    pub requires_dual_approval: bool,
    pub max_amount: Option<Decimal>,
    pub notify_roles: Vec<String>,
    pub document_checklist: Vec<String>,
    pub release_conditions: Vec<String>,
}

/// Partial policy payload. Present fields merge onto the existing entry so
/// unspecified fields survive an update; `max_amount` distinguishes "leave
/// alone" from "clear the cap".
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PolicyDraft {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub auto_release_days: Option<i64>,
    pub requires_dual_approval: Option<bool>,
    pub max_amount: Patch<Decimal>,
    pub notify_roles: Option<Vec<String>>,
    pub document_checklist: Option<Vec<String>>,
    pub release_conditions: Option<Vec<String>>,
}

impl ReleasePolicy {
    /// Merges a draft onto this policy, normalizing list fields.
    pub fn merge_draft(&mut self, draft: &PolicyDraft) {
        if let Some(name) = &draft.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = &draft.description {
            self.description = description.trim().to_string();
        }
        if let Some(days) = draft.auto_release_days {
            self.auto_release_days = days;
        }
        if let Some(dual) = draft.requires_dual_approval {
            self.requires_dual_approval = dual;
        }
        match &draft.max_amount {
            Patch::Absent => {}
            Patch::Null => self.max_amount = None,
            Patch::Value(cap) => self.max_amount = Some(*cap),
        }
        if let Some(roles) = &draft.notify_roles {
            self.notify_roles = dedupe_preserving_order(roles, true);
        }
        if let Some(checklist) = &draft.document_checklist {
            self.document_checklist = dedupe_preserving_order(checklist, false);
        }
        if let Some(conditions) = &draft.release_conditions {
            self.release_conditions = dedupe_preserving_order(conditions, false);
        }
    }
}

/// The whole escrow settings document held by the platform settings store.
/// Read-modify-write as a unit; lenient defaults tolerate older documents.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct EscrowSettings {
    pub policies: Vec<ReleasePolicy>,
    pub allowed_currencies: Vec<String>,
    pub default_currency: String,
}

impl Default for EscrowSettings {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            allowed_currencies: vec!["GBP".into(), "USD".into(), "EUR".into()],
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

/// Lowercases and hyphenates a policy name into a slug. May come back empty
/// for names with no alphanumeric content; the caller falls back to
/// `policy-<n>`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for ch in name.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Appends `-2`, `-3`, ... until the candidate no longer collides.
pub fn uniquify_id(base: &str, existing: &[String]) -> String {
    if !existing.iter().any(|id| id == base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !existing.iter().any(|id| *id == candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Trims entries, drops empties, and de-duplicates preserving first-seen
/// order. Case-insensitive comparison keeps the original casing of the first
/// occurrence.
pub fn dedupe_preserving_order(items: &[String], case_insensitive: bool) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut result = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = if case_insensitive {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        };
        if !seen.contains(&key) {
            seen.push(key);
            result.push(trimmed.to_string());
        }
    }
    result
}
