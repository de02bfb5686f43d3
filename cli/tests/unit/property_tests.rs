//! Property tests for port allocation and memory tuning.

#![allow(clippy::expect_used)]

use std::collections::BTreeSet;

use llama_deploy::domain::Tuning;
use llama_deploy::domain::network::pick_free_bind_port;
use llama_deploy::domain::tuning::{MIN_MODELS_MAX, MIN_PARALLEL, enforce_floors, tune};
use proptest::prelude::*;

fn tuning_strategy() -> impl Strategy<Value = Tuning> {
    (0u32..64, 0u32..16, 0u32..16).prop_map(|(swap_gib, models_max, parallel)| Tuning {
        swap_gib,
        models_max,
        parallel,
    })
}

proptest! {
    #[test]
    fn prop_picked_port_is_free_and_not_avoided(
        preferred in 1u16..60000,
        busy in prop::collection::btree_set(1u16..=u16::MAX, 0..64),
        avoid in prop::collection::btree_set(1u16..=u16::MAX, 0..8),
    ) {
        let port = pick_free_bind_port("127.0.0.1", preferred, &avoid, |_, p| !busy.contains(&p))
            .expect("a free port exists above 60000");
        prop_assert!(port >= preferred);
        prop_assert!(!busy.contains(&port));
        prop_assert!(!avoid.contains(&port));
        prop_assert!((preferred..port).all(|p| busy.contains(&p) || avoid.contains(&p)));
    }

    #[test]
    fn prop_no_port_when_everything_is_busy(preferred in 0u16..=u16::MAX) {
        let result = pick_free_bind_port("127.0.0.1", preferred, &BTreeSet::new(), |_, _| false);
        prop_assert!(result.is_err());
    }

    #[test]
    fn prop_tuning_respects_floors(mem in -8.0f64..256.0, baseline in tuning_strategy()) {
        let outcome = tune(mem, baseline);
        prop_assert!(outcome.tuning.models_max >= MIN_MODELS_MAX);
        prop_assert!(outcome.tuning.parallel >= MIN_PARALLEL);
        prop_assert!(outcome.tuning.swap_gib >= baseline.swap_gib);
        prop_assert!(outcome.tuning.parallel <= baseline.parallel.max(MIN_PARALLEL));
    }

    #[test]
    fn prop_adjustments_describe_every_change(mem in 0.0f64..256.0, baseline in tuning_strategy()) {
        let outcome = tune(mem, baseline);
        let changed = usize::from(outcome.tuning.models_max != baseline.models_max)
            + usize::from(outcome.tuning.parallel != baseline.parallel)
            + usize::from(outcome.tuning.swap_gib != baseline.swap_gib);
        prop_assert_eq!(outcome.adjustments.len(), changed);
    }

    #[test]
    fn prop_more_memory_never_lowers_limits(
        small in 0.0f64..128.0,
        extra in 0.0f64..128.0,
        baseline in tuning_strategy(),
    ) {
        let low = tune(small, baseline).tuning;
        let high = tune(small + extra, baseline).tuning;
        prop_assert!(high.models_max >= low.models_max);
        prop_assert!(high.parallel >= low.parallel);
    }

    #[test]
    fn prop_floors_never_touch_swap(baseline in tuning_strategy()) {
        let outcome = enforce_floors(baseline);
        prop_assert_eq!(outcome.tuning.swap_gib, baseline.swap_gib);
        prop_assert!(outcome.tuning.models_max >= MIN_MODELS_MAX);
    }
}
