use nestrbac_core::node::{EntityRef, Hierarchy, NodeId, UserId};

pub fn audit_check(permission: &EntityRef, user: UserId, allowed: bool) {
    tracing::info!(
        target: "audit",
        event = "access_check",
        permission = %permission,
        user_id = user.value(),
        allowed = allowed,
        "access checked"
    );
}

pub fn audit_denied(permission: &EntityRef, user: UserId) {
    tracing::warn!(
        target: "audit",
        event = "access_denied",
        permission = %permission,
        user_id = user.value(),
        "access denied"
    );
}

pub fn audit_permission_assignment(
    role: NodeId,
    permission: NodeId,
    assigned: bool,
    changed: bool,
) {
    let event = if assigned {
        "permission_assigned"
    } else {
        "permission_unassigned"
    };
    tracing::info!(
        target: "audit",
        event = event,
        role_id = role.value(),
        permission_id = permission.value(),
        changed = changed,
        "role permission assignment changed"
    );
}

pub fn audit_user_assignment(user: UserId, role: NodeId, assigned: bool, changed: bool) {
    let event = if assigned {
        "user_assigned"
    } else {
        "user_unassigned"
    };
    tracing::info!(
        target: "audit",
        event = event,
        user_id = user.value(),
        role_id = role.value(),
        changed = changed,
        "user role assignment changed"
    );
}

pub fn audit_reset(scope: &str, removed: u64) {
    tracing::warn!(
        target: "audit",
        event = "reset",
        scope = scope,
        removed = removed,
        "relation reset and reseeded"
    );
}

pub fn audit_removal(hierarchy: Hierarchy, id: NodeId, recursive: bool, removed: u64) {
    tracing::info!(
        target: "audit",
        event = "node_removed",
        hierarchy = %hierarchy,
        node_id = id.value(),
        recursive = recursive,
        removed = removed,
        "node removed"
    );
}
