//! Property-based tests for the universal invariants in spec.md §8.
//!
//! Unlike `tests/scenarios.rs` (seeded end-to-end runs), these drive the
//! classifier, id validator, and pagination sanitizer against arbitrary
//! inputs to check the properties hold for all of them, not just the
//! examples spec.md happens to name.

use forgequeue::repository::Pagination;
use forgequeue::{classify, is_valid_id, ClassifiableError};
use proptest::prelude::*;

proptest! {
    /// spec.md §8 property 5: any id not matching `[A-Za-z0-9_-]{1,100}`
    /// is rejected by the shared validator.
    #[test]
    fn valid_id_strings_are_always_accepted(id in "[A-Za-z0-9_-]{1,100}") {
        prop_assert!(is_valid_id(&id));
    }

    #[test]
    fn ids_with_disallowed_characters_are_always_rejected(id in "[A-Za-z0-9_-]{0,20}[./ ?#][A-Za-z0-9_-]{0,20}") {
        prop_assert!(!is_valid_id(&id));
    }

    #[test]
    fn ids_longer_than_100_chars_are_rejected(id in "[A-Za-z0-9_-]{101,200}") {
        prop_assert!(!is_valid_id(&id));
    }

    /// spec.md §8 property 6: for all (limit, offset) the effective query
    /// uses limit in [1, 1000] and offset >= 0, regardless of what a caller
    /// passed in.
    #[test]
    fn pagination_is_always_sanitised(limit in any::<i64>(), offset in any::<i64>()) {
        let p = Pagination::sanitize(Some(limit), Some(offset));
        prop_assert!(p.limit >= 1 && p.limit <= Pagination::MAX_LIMIT);
        prop_assert!(p.offset >= 0);
    }

    #[test]
    fn pagination_with_missing_inputs_falls_back_to_defaults(noise in any::<u8>()) {
        let _ = noise;
        let p = Pagination::sanitize(None, None);
        prop_assert_eq!(p.limit, Pagination::DEFAULT_LIMIT);
        prop_assert_eq!(p.offset, 0);
    }

    /// spec.md §8 property 7: `classify(err)` is a pure function of
    /// `err.code`, `err.status_code`, and `err.message` — calling it twice
    /// on the same inputs never disagrees.
    #[test]
    fn classification_is_deterministic(
        message in ".*",
        status in prop::option::of(100u16..600),
        code in prop::option::of("[A-Z]{3,12}"),
    ) {
        let mut err = ClassifiableError::new(message);
        if let Some(code) = &code {
            err = err.with_code(code.clone());
        }
        if let Some(status) = status {
            err = err.with_status(status);
        }

        let a = classify(&err);
        let b = classify(&err);
        prop_assert_eq!(a.category, b.category);
        prop_assert_eq!(a.suggested_delay_ms, b.suggested_delay_ms);
        prop_assert_eq!(a.kind, b.kind);
    }

    /// Every classification outcome names a suggested delay consistent with
    /// spec.md §4.1 ("Suggested delay"): zero for terminal errors, otherwise
    /// one of the three documented bands.
    #[test]
    fn suggested_delay_matches_documented_bands(
        message in ".*",
        status in prop::option::of(100u16..600),
    ) {
        let mut err = ClassifiableError::new(message);
        if let Some(status) = status {
            err = err.with_status(status);
        }
        let c = classify(&err);
        if !c.is_retryable() {
            prop_assert_eq!(c.suggested_delay_ms, 0);
        } else {
            prop_assert!(matches!(c.suggested_delay_ms, 5_000 | 10_000 | 60_000));
        }
    }
}
