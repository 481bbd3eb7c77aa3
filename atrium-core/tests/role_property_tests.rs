//! Property-Based Tests for the Role Hierarchy
//!
//! **Property 1: Role Hierarchy Evaluation**
//!
//! For all pairs (role, required), `satisfies` SHALL return true iff
//! rank(role) >= rank(required); the textual evaluator SHALL agree with the
//! typed one and deny any unknown role.

use atrium_core::{role_rank, satisfies, Role};
use proptest::prelude::*;

fn any_role() -> impl Strategy<Value = Role> {
    prop::sample::select(Role::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_satisfies_iff_rank_at_least(actual in any_role(), required in any_role()) {
        prop_assert_eq!(actual.satisfies(required), actual.rank() >= required.rank());
    }

    #[test]
    fn prop_textual_matches_typed(actual in any_role(), required in any_role()) {
        prop_assert_eq!(
            satisfies(actual.as_db_str(), required.as_db_str()),
            actual.satisfies(required)
        );
    }

    #[test]
    fn prop_unknown_roles_denied(text in "[a-z]{1,12}", role in any_role()) {
        prop_assume!(role_rank(&text).is_none());
        prop_assert!(!satisfies(&text, role.as_db_str()));
        prop_assert!(!satisfies(role.as_db_str(), &text));
    }

    #[test]
    fn prop_owner_satisfies_everything(required in any_role()) {
        prop_assert!(Role::Owner.satisfies(required));
    }
}

#[test]
fn test_documented_examples() {
    assert!(Role::Admin.satisfies(Role::Member));
    assert!(!Role::Viewer.satisfies(Role::Admin));
}
