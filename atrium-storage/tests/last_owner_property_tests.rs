//! Property-Based Tests for the Last-Owner Invariant
//!
//! **Property 3: Owner Retention**
//!
//! For any membership set containing at least one owner and any sequence of
//! role changes and removals, the workspace SHALL always keep at least one
//! owner, AND an operation SHALL fail with `LastOwner` exactly when it would
//! take away the only remaining owner.

use atrium_core::{
    AtriumError, EntityIdType, Membership, Role, Settings, StorageError, TenantId, UserId,
    Workspace,
};
use atrium_storage::{InMemoryStore, MembershipStore, WorkspaceStore};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
enum Op {
    Demote(usize, Role),
    Remove(usize),
}

fn any_role() -> impl Strategy<Value = Role> {
    prop::sample::select(Role::ALL.to_vec())
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..8, any_role()).prop_map(|(i, role)| Op::Demote(i, role)),
        (0usize..8).prop_map(Op::Remove),
    ]
}

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn fail(e: AtriumError) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_workspace_always_keeps_an_owner(
        extra in prop::collection::vec(any_role(), 0..7),
        ops in prop::collection::vec(any_op(), 1..24),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = InMemoryStore::new();
            let creator = UserId::new("creator");
            let ws = Workspace::new(TenantId::now_v7(), "ws", "", Settings::new(), creator.clone());
            store
                .workspace_create_with_owner(&ws, &Membership::new(ws.id, creator.clone(), Role::Owner))
                .await
                .map_err(fail)?;

            let mut users = vec![creator];
            let mut model: BTreeMap<UserId, Role> = BTreeMap::new();
            model.insert(users[0].clone(), Role::Owner);
            for (i, role) in extra.into_iter().enumerate() {
                let user = UserId::new(format!("user-{}", i));
                store
                    .member_add(&Membership::new(ws.id, user.clone(), role))
                    .await
                    .map_err(fail)?;
                model.insert(user.clone(), role);
                users.push(user);
            }

            for op in ops {
                let owners = model.values().filter(|r| r.is_owner()).count();
                match op {
                    Op::Demote(i, role) => {
                        let user = &users[i % users.len()];
                        let current = model.get(user).copied();
                        let result = store.member_update_role(ws.id, user, role).await;
                        match current {
                            None => prop_assert!(result.is_err()),
                            Some(current) => {
                                let takes_last = current.is_owner() && !role.is_owner() && owners <= 1;
                                if takes_last {
                                    let is_last_owner_error = matches!(
                                        result,
                                        Err(AtriumError::Storage(StorageError::LastOwner { .. }))
                                    );
                                    prop_assert!(is_last_owner_error);
                                } else {
                                    prop_assert!(result.is_ok());
                                    model.insert(user.clone(), role);
                                }
                            }
                        }
                    }
                    Op::Remove(i) => {
                        let user = &users[i % users.len()];
                        let current = model.get(user).copied();
                        let result = store.member_remove(ws.id, user).await;
                        match current {
                            None => prop_assert!(result.is_err()),
                            Some(current) => {
                                if current.is_owner() && owners <= 1 {
                                    let is_last_owner_error = matches!(
                                        result,
                                        Err(AtriumError::Storage(StorageError::LastOwner { .. }))
                                    );
                                    prop_assert!(is_last_owner_error);
                                } else {
                                    prop_assert!(result.is_ok());
                                    model.remove(user);
                                }
                            }
                        }
                    }
                }

                let stored_owners = store.member_count_owners(ws.id).await.map_err(fail)?;
                prop_assert!(stored_owners >= 1);
                prop_assert_eq!(stored_owners as usize, model.values().filter(|r| r.is_owner()).count());
            }
            Ok(())
        })?;
    }
}
