//! Property tests for the identity invariants: content-addressed version
//! and input ids, and UUIDv7-embedded timestamps.

#![allow(clippy::unwrap_used)]

use anotherai::domain::{AgentInput, Message, Role, Version};
use anotherai::utils::uuid7;
use proptest::prelude::*;
use serde_json::json;

fn arb_version() -> impl Strategy<Value = Version> {
    (
        "[a-z0-9.-]{3,20}",
        proptest::option::of(0.0f64..=2.0),
        proptest::option::of(0.0f64..=1.0),
        proptest::option::of(1u32..100_000),
        proptest::option::of(0u32..65_536),
    )
        .prop_map(|(model, temperature, top_p, max_output_tokens, reasoning_budget)| Version {
            model,
            temperature,
            top_p,
            max_output_tokens,
            reasoning_budget,
            ..Default::default()
        })
}

proptest! {
    /// Versions with identical normalized fields share an id, whatever the
    /// id field held before hashing.
    #[test]
    fn version_id_is_deterministic(version in arb_version(), noise in "[a-f0-9]{0,32}") {
        let mut with_noise = version.clone();
        with_noise.id = noise;
        prop_assert_eq!(version.compute_id(), with_noise.compute_id());
        prop_assert_eq!(version.compute_id().len(), 32);
    }

    /// Changing any hashed field changes the id.
    #[test]
    fn version_id_tracks_content(version in arb_version()) {
        let mut changed = version.clone();
        changed.temperature = Some(version.temperature.unwrap_or(0.0) + 0.25);
        prop_assert_ne!(version.compute_id(), changed.compute_id());
    }

    /// The completion timestamp embedded in a UUIDv7 round-trips at
    /// millisecond precision.
    #[test]
    fn uuid7_embeds_its_timestamp(ms in 0u64..=0xFFFF_FFFF_FFFF, random in any::<u64>()) {
        let id = uuid7::uuid7_from_parts(ms, u128::from(random));
        prop_assert!(uuid7::is_uuid7(&id));
        prop_assert_eq!(uuid7::generation_time(&id).timestamp_millis(), ms as i64);
    }

    /// Input ids ignore the preview and dedupe identical payloads.
    #[test]
    fn input_id_ignores_preview(text in ".{0,64}", preview in ".{0,32}") {
        let base = AgentInput {
            messages: Some(vec![Message::with_text(Role::User, text.clone())]),
            ..Default::default()
        };
        let mut with_preview = base.clone();
        with_preview.preview = preview;
        prop_assert_eq!(base.compute_id(), with_preview.compute_id());
    }
}

#[test]
fn variables_order_does_not_change_the_input_id() {
    let a = AgentInput {
        variables: Some(json!({"a": 1, "b": {"x": true, "y": "z"}})),
        ..Default::default()
    };
    let b = AgentInput {
        variables: Some(json!({"b": {"y": "z", "x": true}, "a": 1})),
        ..Default::default()
    };
    assert_eq!(a.compute_id(), b.compute_id());
}
