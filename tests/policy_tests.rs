//! Release policy registries and the policy-driven escrow rules.

use escrow_core::application::engine::EscrowEngine;
use escrow_core::application::policies::PlatformPolicyRegistry;
use escrow_core::domain::patch::{CreateEscrow, EscrowPatch};
use escrow_core::domain::policy::PolicyDraft;
use escrow_core::domain::ports::{OrderSummary, ReleasePolicyRepository};
use escrow_core::domain::scope::ActorContext;
use escrow_core::infrastructure::in_memory::{
    InMemoryEscrowStore, InMemoryOrderDirectory, InMemorySettingsStore,
};
use serde_json::json;
use std::sync::Arc;

fn setup() -> (EscrowEngine, Arc<PlatformPolicyRegistry>, Arc<InMemoryOrderDirectory>) {
    let directory = Arc::new(InMemoryOrderDirectory::new());
    let policies = Arc::new(PlatformPolicyRegistry::new(Arc::new(
        InMemorySettingsStore::new(),
    )));
    let engine = EscrowEngine::new(
        Arc::new(InMemoryEscrowStore::new()),
        directory.clone(),
        policies.clone(),
    );
    (engine, policies, directory)
}

fn register(directory: &InMemoryOrderDirectory, order_id: &str) {
    directory.register_order(OrderSummary {
        order_id: order_id.to_string(),
        ..Default::default()
    });
}

fn create_cmd(order: &str, amount: i64, policy: &str) -> CreateEscrow {
    serde_json::from_value(json!({
        "order_id": order,
        "amount": amount,
        "policy_id": policy,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_slug_uniquification_survives_reload() {
    let (_, policies, _) = setup();
    let actor = ActorContext::system();
    let draft = |name: &str| PolicyDraft {
        name: Some(name.to_string()),
        ..Default::default()
    };

    assert_eq!(
        policies.create(None, draft("Standard Release"), &actor).await.unwrap().id,
        "standard-release"
    );
    assert_eq!(
        policies.create(None, draft("Standard Release"), &actor).await.unwrap().id,
        "standard-release-2"
    );

    // The ids come back from the persisted document, not registry state.
    let ids: Vec<String> = policies
        .list(None)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec!["standard-release", "standard-release-2"]);
}

#[tokio::test]
async fn test_policy_forces_dual_approval_and_deadline() {
    let (engine, policies, directory) = setup();
    let actor = ActorContext::system();
    register(&directory, "O1");

    let policy = policies
        .create(
            None,
            serde_json::from_value::<PolicyDraft>(json!({
                "name": "Standard Release",
                "auto_release_days": 14,
                "requires_dual_approval": true,
            }))
            .unwrap(),
            &actor,
        )
        .await
        .unwrap();

    let view = engine
        .create(create_cmd("O1", 100, &policy.id), &actor)
        .await
        .unwrap();
    assert!(view.requires_dual_approval);
    let deadline = view.auto_release_at.expect("deadline should be armed");
    let days = (deadline - view.created_at).num_days();
    assert!((13..=14).contains(&days));

    // Clearing the deadline sticks: unrelated updates must not re-arm it.
    let view = engine
        .update(
            view.id,
            serde_json::from_value::<EscrowPatch>(json!({ "auto_release_at": null })).unwrap(),
            &actor,
            None,
        )
        .await
        .unwrap();
    assert_eq!(view.auto_release_at, None);

    let view = engine
        .update(
            view.id,
            serde_json::from_value::<EscrowPatch>(json!({ "status": "funded" })).unwrap(),
            &actor,
            None,
        )
        .await
        .unwrap();
    assert_eq!(view.auto_release_at, None);

    // Re-attaching the policy arms it again.
    let view = engine
        .update(
            view.id,
            serde_json::from_value::<EscrowPatch>(json!({ "policy_id": policy.id })).unwrap(),
            &actor,
            None,
        )
        .await
        .unwrap();
    assert!(view.auto_release_at.is_some());
}

#[tokio::test]
async fn test_policy_cap_rejects_large_amounts() {
    let (engine, policies, directory) = setup();
    let actor = ActorContext::system();
    register(&directory, "O1");
    register(&directory, "O2");

    let policy = policies
        .create(
            None,
            serde_json::from_value::<PolicyDraft>(json!({
                "name": "Capped",
                "max_amount": "500",
            }))
            .unwrap(),
            &actor,
        )
        .await
        .unwrap();

    let err = engine
        .create(create_cmd("O1", 900, &policy.id), &actor)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("cap"));

    let view = engine
        .create(create_cmd("O2", 400, &policy.id), &actor)
        .await
        .unwrap();

    // Raising the amount above the cap on update also fails.
    let err = engine
        .update(
            view.id,
            serde_json::from_value::<EscrowPatch>(json!({ "amount": 600 })).unwrap(),
            &actor,
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_unknown_policy_reference_is_accepted() {
    let (engine, _, directory) = setup();
    let actor = ActorContext::system();
    register(&directory, "O1");

    let view = engine
        .create(create_cmd("O1", 100, "legacy-terms"), &actor)
        .await
        .unwrap();
    assert_eq!(view.policy_id.as_deref(), Some("legacy-terms"));
    assert_eq!(view.auto_release_at, None);
    assert!(!view.requires_dual_approval);
}
