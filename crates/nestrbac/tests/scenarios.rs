use nestrbac::{AccessError, EntityRef, NodeId, PathLimits, Rbac, RbacError, UserId};
use nestrbac_core::node::ROOT_ID;
use nestrbac_core::path::PathError;
use nestrbac_storage::InMemoryStore;

const USER: UserId = UserId::new(7);

struct Fixture {
    rbac: Rbac<InMemoryStore>,
    a: NodeId,
    b: NodeId,
    x: NodeId,
    y: NodeId,
}

// roles /a/b, permissions /x/y, b holds x
async fn fixture() -> Fixture {
    let rbac = Rbac::in_memory(PathLimits::default());
    rbac.roles().add_path("/a/b", &[]).await.unwrap();
    rbac.permissions().add_path("/x/y", &[]).await.unwrap();

    let a = rbac.roles().path_id("/a").await.unwrap().unwrap();
    let b = rbac.roles().path_id("/a/b").await.unwrap().unwrap();
    let x = rbac.permissions().path_id("/x").await.unwrap().unwrap();
    let y = rbac.permissions().path_id("/x/y").await.unwrap().unwrap();

    assert!(
        rbac.assign(&EntityRef::Id(b), &EntityRef::Id(x))
            .await
            .unwrap()
    );

    Fixture { rbac, a, b, x, y }
}

// 1. Ancestor role inherits a descendant role's grant on an ancestor permission
#[tokio::test]
async fn scenario_a_ancestor_role_reaches_descendant_permission() {
    let f = fixture().await;
    f.rbac.users().assign(f.a, USER).await.unwrap();

    assert!(f.rbac.check("/x/y", Some(USER)).await.unwrap());
    assert!(f.rbac.check("x", Some(USER)).await.unwrap());
    assert!(f.rbac.check(f.y, Some(USER)).await.unwrap());
}

// 2. The role holding the grant itself passes
#[tokio::test]
async fn scenario_b_granted_role_passes() {
    let f = fixture().await;
    f.rbac.users().assign(f.b, USER).await.unwrap();

    assert!(f.rbac.check("/x/y", Some(USER)).await.unwrap());
}

// 3. A grant on the ancestor role does not leak down to a descendant role
#[tokio::test]
async fn scenario_b_grant_does_not_leak_downward() {
    let f = fixture().await;
    let z = f.rbac.permissions().add("z", "", None).await.unwrap();
    f.rbac
        .assign(&EntityRef::Id(f.a), &EntityRef::Id(z))
        .await
        .unwrap();
    f.rbac.users().assign(f.b, USER).await.unwrap();

    assert!(!f.rbac.check("/z", Some(USER)).await.unwrap());

    f.rbac.users().assign(f.a, USER).await.unwrap();
    assert!(f.rbac.check("/z", Some(USER)).await.unwrap());
}

// 4. A grant on a descendant permission does not imply its ancestor
#[tokio::test]
async fn permission_grant_does_not_climb() {
    let f = fixture().await;
    let c = f.rbac.roles().add("c", "", None).await.unwrap();
    f.rbac
        .assign(&EntityRef::Id(c), &EntityRef::Id(f.y))
        .await
        .unwrap();
    f.rbac.users().assign(c, USER).await.unwrap();

    assert!(f.rbac.check("/x/y", Some(USER)).await.unwrap());
    assert!(!f.rbac.check("/x", Some(USER)).await.unwrap());
}

// 5. Unknown children are absent, unknown descendants are empty
#[tokio::test]
async fn scenario_c_absent_versus_empty() {
    let f = fixture().await;
    let unknown = NodeId::new(999);

    assert_eq!(f.rbac.roles().children(unknown).await.unwrap(), None);
    assert_eq!(f.rbac.roles().children(f.b).await.unwrap(), None);
    assert!(f.rbac.roles().descendants(unknown).await.unwrap().is_empty());
}

// 6. Reset needs confirmation and leaves only the root
#[tokio::test]
async fn scenario_d_reset_leaves_only_root() {
    let rbac = Rbac::in_memory(PathLimits::default());
    for title in ["a", "b", "c"] {
        rbac.roles().add(title, "", None).await.unwrap();
    }

    let refused = rbac.roles().reset(false).await;
    assert!(matches!(refused, Err(RbacError::ConfirmationRequired(_))));

    rbac.roles().reset(true).await.unwrap();

    assert_eq!(rbac.roles().count().await.unwrap(), 1);
    assert_eq!(rbac.roles().children(ROOT_ID).await.unwrap(), None);
}

// 7. check flips with the sole qualifying assignment
#[tokio::test]
async fn check_is_monotone_in_assignments() {
    let f = fixture().await;
    f.rbac.users().assign(f.a, USER).await.unwrap();
    assert!(f.rbac.check(f.y, Some(USER)).await.unwrap());

    f.rbac
        .unassign(&EntityRef::Id(f.b), &EntityRef::Id(f.x))
        .await
        .unwrap();
    assert!(!f.rbac.check(f.y, Some(USER)).await.unwrap());

    f.rbac
        .assign(&EntityRef::Id(f.a), &EntityRef::Id(f.y))
        .await
        .unwrap();
    assert!(f.rbac.check(f.y, Some(USER)).await.unwrap());
}

// 8. Removing a role drops its grants and its users
#[tokio::test]
async fn removing_role_revokes_access() {
    let f = fixture().await;
    f.rbac.users().assign(f.b, USER).await.unwrap();

    f.rbac.roles().remove(f.b, false).await.unwrap();

    assert!(!f.rbac.check("/x/y", Some(USER)).await.unwrap());
    assert_eq!(f.rbac.users().all_roles(USER).await.unwrap(), None);
}

// 9. Structural edits keep both trees valid
#[tokio::test]
async fn mutations_preserve_interval_invariants() {
    let f = fixture().await;
    let roles = f.rbac.roles();
    roles.add_path("/a/c/d", &[]).await.unwrap();
    roles.add_path("/e", &[]).await.unwrap();
    let c = roles.path_id("/a/c").await.unwrap().unwrap();

    roles.remove(c, false).await.unwrap();
    let added = roles.add("f", "", Some(f.a)).await.unwrap();
    roles.remove(added, false).await.unwrap();
    roles.remove(f.b, true).await.unwrap();

    assert_eq!(f.rbac.verify().await.unwrap(), (4, 3));
    assert_eq!(roles.get_path(NodeId::new(5)).await.unwrap().as_deref(), Some("/a/d"));
}

// 10. Enforce surfaces a typed denial and a missing user
#[tokio::test]
async fn enforce_denial_and_missing_user() {
    let f = fixture().await;

    let denied = f.rbac.enforce("/x/y", Some(USER)).await;
    let anonymous = f.rbac.enforce("/x/y", None).await;

    assert!(matches!(
        denied,
        Err(RbacError::Access(AccessError::Denied { .. }))
    ));
    assert!(matches!(
        anonymous,
        Err(RbacError::Access(AccessError::UserRequired))
    ));
}

// 11. Role-level check without user indirection
#[tokio::test]
async fn role_permission_check() {
    let f = fixture().await;

    assert!(f.rbac.has_permission(f.a, f.y).await.unwrap());
    assert!(f.rbac.has_permission(f.b, f.x).await.unwrap());
    assert!(!f.rbac.has_permission(f.b, ROOT_ID).await.unwrap());
}

// 12. Path reconstruction limit is raised instead of truncating
#[tokio::test]
async fn path_limit_surfaces_error() {
    let rbac = Rbac::in_memory(PathLimits::new(8));
    let long = format!("/{}", "p".repeat(16));

    let result = rbac.permissions().add_path(&long, &[]).await;

    assert!(matches!(result, Err(RbacError::Path(_))));
    assert_eq!(rbac.permissions().count().await.unwrap(), 1);
}

// 13. Evaluation reports an over-long path with the same typed error
#[tokio::test]
async fn check_path_limit_surfaces_error() {
    let rbac = Rbac::in_memory(PathLimits::new(8));
    let long = format!("/{}", "p".repeat(16));

    let checked = rbac.check(long.as_str(), Some(USER)).await;
    let enforced = rbac.enforce(long.as_str(), Some(USER)).await;

    assert!(matches!(
        checked,
        Err(RbacError::Path(PathError::PathTooLong { limit: 8, .. }))
    ));
    assert!(matches!(
        enforced,
        Err(RbacError::Path(PathError::PathTooLong { .. }))
    ));
}
