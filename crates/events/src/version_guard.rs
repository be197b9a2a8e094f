//! Monotonic version guard used by every projection writer.

/// Inputs to the guard.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    /// `aggregate_version` of the incoming envelope.
    pub event_version: u64,
    /// `last_processed_version` stored on the view, `None` if the view does
    /// not exist yet.
    pub view_last_processed_version: Option<u64>,
}

/// Accept a write only if the event is strictly newer than the view.
pub fn version_guard_allows(check: VersionCheck) -> bool {
    match check.view_last_processed_version {
        None => true,
        Some(last) => check.event_version > last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn allows(event_version: u64, last: Option<u64>) -> bool {
        version_guard_allows(VersionCheck {
            event_version,
            view_last_processed_version: last,
        })
    }

    #[test]
    fn missing_view_accepts_any_version() {
        assert!(allows(0, None));
        assert!(allows(7, None));
    }

    #[test]
    fn equal_or_older_versions_are_rejected() {
        assert!(!allows(5, Some(5)));
        assert!(!allows(3, Some(5)));
        assert!(allows(6, Some(5)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: applying any permutation of distinct versions through
        /// the guard leaves the maximum as the last processed version.
        #[test]
        fn any_delivery_order_converges_on_max_version(
            versions in prop::collection::hash_set(1u64..10_000u64, 1..20)
                .prop_map(|s| s.into_iter().collect::<Vec<_>>())
                .prop_shuffle()
        ) {
            let mut last: Option<u64> = None;
            let mut surviving_payload = None;

            for v in &versions {
                if allows(*v, last) {
                    last = Some(*v);
                    surviving_payload = Some(*v);
                }
            }

            let max = versions.iter().copied().max();
            prop_assert_eq!(last, max);
            prop_assert_eq!(surviving_payload, max);
        }
    }
}
