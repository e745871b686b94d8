//! Back-office and provider escrow listing.
//!
//! The stores only answer structural filters; everything needing the order
//! join (free-text search, provider scoping) plus pagination and the summary
//! block is assembled here.

use crate::application::engine::EscrowView;
use crate::application::policies::PlatformPolicyRegistry;
use crate::domain::escrow::{Escrow, EscrowStatus};
use crate::domain::policy::{EscrowSettings, ReleasePolicy};
use crate::domain::ports::{EscrowFilter, EscrowStoreRef, OrderDirectoryRef, OrderSummary};
use crate::domain::scope::ProviderScope;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Loosely-typed listing request, as deserialized straight off the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EscrowQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<String>,
    pub policy_id: Option<String>,
    /// Accepts a JSON bool or the strings `"true"`/`"false"`.
    pub on_hold: Option<Value>,
    pub search: Option<String>,
}

/// The filters that were actually applied, echoed back in the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedFilters {
    pub status: Option<EscrowStatus>,
    pub policy_id: Option<String>,
    pub on_hold: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

/// Aggregate figures over the full filtered set, not just the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuerySummary {
    pub total_amount: Decimal,
    pub on_hold: i64,
    pub disputed: i64,
    pub ready_for_release: i64,
}

#[derive(Debug, Serialize)]
pub struct EscrowPage {
    pub items: Vec<EscrowView>,
    pub pagination: Pagination,
    pub summary: QuerySummary,
    pub filters: AppliedFilters,
    pub policies: Vec<ReleasePolicy>,
    pub settings: EscrowSettings,
}

pub struct QueryAggregator {
    store: EscrowStoreRef,
    directory: OrderDirectoryRef,
    policies: Arc<PlatformPolicyRegistry>,
}

impl QueryAggregator {
    pub fn new(
        store: EscrowStoreRef,
        directory: OrderDirectoryRef,
        policies: Arc<PlatformPolicyRegistry>,
    ) -> Self {
        Self {
            store,
            directory,
            policies,
        }
    }

    /// Lists escrows for the back office (no scope) or a provider (scope
    /// applied, empty scope sees nothing). Filters are AND-composed; the
    /// summary covers the same filtered set before pagination.
    pub async fn list(
        &self,
        query: &EscrowQuery,
        scope: Option<&ProviderScope>,
    ) -> Result<EscrowPage> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let filters = AppliedFilters {
            status: parse_status_filter(query.status.as_deref())?,
            policy_id: query
                .policy_id
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            on_hold: parse_bool_filter(query.on_hold.as_ref()),
            search: query
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };
        let structural = EscrowFilter {
            status: filters.status,
            policy_id: filters.policy_id.clone(),
            on_hold: filters.on_hold,
        };

        let mut escrows = self.store.select(&structural).await?;

        // One order lookup per distinct order id; reused for scoping, search
        // and hydration.
        let mut orders: HashMap<String, Option<OrderSummary>> = HashMap::new();
        for escrow in &escrows {
            if !orders.contains_key(&escrow.order_id) {
                let summary = self.directory.order_summary(&escrow.order_id).await?;
                orders.insert(escrow.order_id.clone(), summary);
            }
        }

        if let Some(scope) = scope {
            escrows.retain(|e| {
                orders
                    .get(&e.order_id)
                    .and_then(|o| o.as_ref())
                    .is_some_and(|o| {
                        scope.covers(o.provider_id.as_deref(), o.company_id.as_deref())
                    })
            });
        }

        if let Some(needle) = &filters.search {
            let needle = needle.to_lowercase();
            // The order join turns inner while searching: an escrow whose
            // order summary is missing cannot match.
            escrows.retain(|e| {
                let Some(order) = orders.get(&e.order_id).and_then(|o| o.as_ref()) else {
                    return false;
                };
                matches_search(e, order, &needle)
            });
        }

        escrows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let summary = summarize(&escrows);
        let total_items = escrows.len() as i64;
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + page_size - 1) / page_size
        };

        let start = ((page - 1) * page_size) as usize;
        let items = escrows
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .map(|e| {
                let order = orders.get(&e.order_id).cloned().flatten();
                EscrowView::assemble(e, order)
            })
            .collect();

        let settings = self.policies.load_settings().await?;
        Ok(EscrowPage {
            items,
            pagination: Pagination {
                page,
                page_size,
                total_items,
                total_pages,
            },
            summary,
            filters,
            policies: settings.policies.clone(),
            settings,
        })
    }
}

fn parse_status_filter(raw: Option<&str>) -> Result<Option<EscrowStatus>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => Ok(Some(EscrowStatus::parse(s)?)),
    }
}

fn parse_bool_filter(raw: Option<&Value>) -> Option<bool> {
    match raw {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Case-insensitive substring match, OR-ed across escrow identifiers and the
/// joined order's buyer/service fields.
fn matches_search(escrow: &Escrow, order: &OrderSummary, needle: &str) -> bool {
    let mut haystacks: Vec<String> = vec![
        escrow.id.to_string(),
        escrow.order_id.clone(),
        order.buyer_id.clone(),
        order.buyer_name.clone(),
        order.service_id.clone(),
        order.service_title.clone(),
    ];
    if let Some(reference) = &escrow.external_reference {
        haystacks.push(reference.clone());
    }
    if let Some(policy_id) = &escrow.policy_id {
        haystacks.push(policy_id.clone());
    }
    haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(needle))
}

fn summarize(escrows: &[Escrow]) -> QuerySummary {
    let mut summary = QuerySummary::default();
    for escrow in escrows {
        summary.total_amount += escrow.amount;
        if escrow.on_hold {
            summary.on_hold += 1;
        }
        if escrow.status == EscrowStatus::Disputed {
            summary.disputed += 1;
        }
        if escrow.status == EscrowStatus::Funded && !escrow.on_hold {
            summary.ready_for_release += 1;
        }
    }
    summary
}
