//! Property-Based Tests for the Session Layer
//!
//! # Test Strategies
//!
//! - **Retry Accounting**: a sequence never schedules more retries than its
//!   budget, whatever the budget
//! - **Fan-out Ordering**: handlers run in registration order and only for
//!   their own topic
//! - **Push Routing**: arbitrary text frames never reach a handler unless they
//!   carry a routed event type
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib session::proptests
//! ```

use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::session::http_transport::dispatch_push;
use crate::session::protocol::{resource_endpoint, TOOL_EXECUTION_TOPIC};
use crate::session::registry::SubscriptionRegistry;
use crate::session::retry::RetryPolicy;

// ============================================================================
// Property 1: Retry budget
// ============================================================================

proptest! {
    #[test]
    fn prop_retry_budget_is_exact(max_attempts in 0u32..50, delay_ms in 0u64..10_000) {
        let mut pending = RetryPolicy::new(max_attempts, Duration::from_millis(delay_ms)).begin();

        let mut scheduled = 0u32;
        while pending.try_advance() {
            scheduled += 1;
            prop_assert_eq!(pending.delay, Duration::from_millis(delay_ms));
        }

        prop_assert_eq!(scheduled, max_attempts);
        prop_assert_eq!(pending.remaining(), 0);
        prop_assert!(!pending.can_retry());
    }
}

// ============================================================================
// Property 2: Registry fan-out
// ============================================================================

proptest! {
    #[test]
    fn prop_handlers_run_in_registration_order(
        handlers in 1usize..20,
        other_topic in "[a-z_]{1,12}",
    ) {
        prop_assume!(other_topic != TOOL_EXECUTION_TOPIC);

        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let _subs: Vec<_> = (0..handlers)
            .map(|i| {
                let calls = Arc::clone(&calls);
                registry.subscribe(TOOL_EXECUTION_TOPIC, move |_: &Value| {
                    calls.lock().unwrap().push(i);
                    Ok(())
                })
            })
            .collect();

        prop_assert_eq!(registry.publish(&other_topic, &json!({})), 0);
        prop_assert_eq!(registry.publish(TOOL_EXECUTION_TOPIC, &json!({})), handlers);
        prop_assert_eq!(calls.lock().unwrap().clone(), (0..handlers).collect::<Vec<_>>());
    }

    #[test]
    fn prop_unsubscribe_removes_exactly_one(handlers in 1usize..10, victim in 0usize..10) {
        let victim = victim % handlers;
        let registry = SubscriptionRegistry::new();

        let mut subs: Vec<_> = (0..handlers)
            .map(|_| registry.subscribe("topic", |_: &Value| Ok(())))
            .collect();

        prop_assert!(subs.remove(victim).unsubscribe());
        prop_assert_eq!(registry.handler_count("topic"), handlers - 1);
    }
}

// ============================================================================
// Property 3: Push routing
// ============================================================================

proptest! {
    #[test]
    fn prop_arbitrary_frames_do_not_panic(raw in ".*") {
        let registry = SubscriptionRegistry::new();
        let _sub = registry.subscribe(TOOL_EXECUTION_TOPIC, |_: &Value| Ok(()));
        // Any text that is not a tool_execution envelope is dropped
        let delivered = dispatch_push(&registry, &raw);
        prop_assert!(delivered <= 1);
    }

    #[test]
    fn prop_unrouted_event_types_are_dropped(kind in "[a-z_]{1,16}") {
        prop_assume!(kind != TOOL_EXECUTION_TOPIC);

        let registry = SubscriptionRegistry::new();
        let _sub = registry.subscribe(kind.clone(), |_: &Value| Ok(()));

        let frame = json!({"type": kind, "tool": "echo", "result": null}).to_string();
        prop_assert_eq!(dispatch_push(&registry, &frame), 0);
    }

    #[test]
    fn prop_resource_endpoint_is_single_segment(uri in "[a-z]+://[a-z/._-]{0,30}") {
        let endpoint = resource_endpoint(&uri);
        let segment = endpoint.strip_prefix("/api/resources/").unwrap();
        prop_assert!(!segment.contains('/'));
    }
}
