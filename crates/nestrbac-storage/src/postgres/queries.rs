use chrono::{DateTime, Utc};

use nestrbac_core::nested::{Interval, Shift};
use nestrbac_core::node::{
    DepthMode, DepthNode, Hierarchy, Node, NodeEdit, NodeId, ROOT_ID, ROOT_TITLE, RolePermission,
    Selector, UserId, UserRole,
};

use crate::traits::StorageError;

pub(crate) fn to_storage_error(e: sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

type NodeRow = (i64, i64, i64, String, String);
type DepthRow = (i64, i64, i64, String, String, i64);

fn to_node((id, lft, rght, title, description): NodeRow) -> Node {
    Node {
        id: NodeId::new(id),
        lft,
        rght,
        title,
        description,
    }
}

fn to_depth_node((id, lft, rght, title, description, depth): DepthRow) -> DepthNode {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let depth = depth.max(0) as usize;
    DepthNode {
        node: to_node((id, lft, rght, title, description)),
        depth,
    }
}

fn table(schema: &str, hierarchy: Hierarchy) -> String {
    format!("{schema}.{}", hierarchy.table())
}

/// Binds for `$1` (id) and `$2` (title) used by [`target_id`].
fn selector_binds(selector: &Selector) -> (Option<i64>, Option<&str>) {
    match selector {
        Selector::ById(id) => (Some(id.value()), None),
        Selector::ByTitle(title) => (None, Some(title.as_str())),
    }
}

/// Expression resolving the selector bound to `$1`/`$2` to one id.
fn target_id(table: &str) -> String {
    format!("COALESCE($1::BIGINT, (SELECT MIN(id) FROM {table} WHERE title = $2::TEXT))")
}

pub async fn lock_tree<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
) -> Result<(), StorageError> {
    let t = table(schema, hierarchy);
    let query = format!("LOCK TABLE {t} IN SHARE ROW EXCLUSIVE MODE");
    sqlx::query(&query)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

pub async fn get_node<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    selector: &Selector,
) -> Result<Option<Node>, StorageError> {
    let t = table(schema, hierarchy);
    let target = target_id(&t);
    let query = format!("SELECT id, lft, rght, title, description FROM {t} WHERE id = {target}");
    let (id, title) = selector_binds(selector);

    let row: Option<NodeRow> = sqlx::query_as(&query)
        .bind(id)
        .bind(title)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(row.map(to_node))
}

pub async fn count_nodes<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
) -> Result<u64, StorageError> {
    let t = table(schema, hierarchy);
    let query = format!("SELECT COUNT(*) FROM {t}");
    let row: (i64,) = sqlx::query_as(&query)
        .fetch_one(executor)
        .await
        .map_err(to_storage_error)?;

    #[allow(clippy::cast_sign_loss)]
    let count = row.0 as u64;
    Ok(count)
}

pub async fn path<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    selector: &Selector,
) -> Result<Vec<Node>, StorageError> {
    let t = table(schema, hierarchy);
    let target = target_id(&t);
    let query = format!(
        r#"
        SELECT parent.id, parent.lft, parent.rght, parent.title, parent.description
        FROM {t} AS node, {t} AS parent
        WHERE node.lft BETWEEN parent.lft AND parent.rght
          AND node.id = {target}
        ORDER BY parent.lft
        "#
    );
    let (id, title) = selector_binds(selector);

    let rows: Vec<NodeRow> = sqlx::query_as(&query)
        .bind(id)
        .bind(title)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows.into_iter().map(to_node).collect())
}

/// Proper descendants of the selected node with their depth. `only_children`
/// keeps depth-1 rows.
pub async fn descendants<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    selector: &Selector,
    mode: DepthMode,
    only_children: bool,
) -> Result<Vec<DepthNode>, StorageError> {
    let t = table(schema, hierarchy);
    let target = target_id(&t);
    // absolute depth counts every ancestor, relative depth only those inside the subtree
    let relative = only_children || mode == DepthMode::Relative;
    let parent_scope = if relative {
        "AND parent.lft >= top.lft"
    } else {
        ""
    };
    let having = if only_children {
        "HAVING COUNT(parent.id) - 1 = 1"
    } else {
        ""
    };
    let query = format!(
        r#"
        SELECT node.id, node.lft, node.rght, node.title, node.description,
               COUNT(parent.id) - 1 AS depth
        FROM {t} AS node, {t} AS parent, {t} AS top
        WHERE top.id = {target}
          AND node.lft > top.lft AND node.rght < top.rght
          AND node.lft BETWEEN parent.lft AND parent.rght
          {parent_scope}
        GROUP BY node.id, node.lft, node.rght, node.title, node.description
        {having}
        ORDER BY node.lft
        "#
    );
    let (id, title) = selector_binds(selector);

    let rows: Vec<DepthRow> = sqlx::query_as(&query)
        .bind(id)
        .bind(title)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows.into_iter().map(to_depth_node).collect())
}

pub async fn leaves<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    under: Option<&Selector>,
) -> Result<Vec<Node>, StorageError> {
    let t = table(schema, hierarchy);

    let rows: Vec<NodeRow> = match under {
        None => {
            let query = format!(
                "SELECT id, lft, rght, title, description FROM {t} WHERE rght = lft + 1 ORDER BY lft"
            );
            sqlx::query_as(&query)
                .fetch_all(executor)
                .await
                .map_err(to_storage_error)?
        }
        Some(selector) => {
            let target = target_id(&t);
            let query = format!(
                r#"
                SELECT node.id, node.lft, node.rght, node.title, node.description
                FROM {t} AS node, {t} AS top
                WHERE top.id = {target}
                  AND node.rght = node.lft + 1
                  AND node.lft BETWEEN top.lft AND top.rght
                ORDER BY node.lft
                "#
            );
            let (id, title) = selector_binds(selector);
            sqlx::query_as(&query)
                .bind(id)
                .bind(title)
                .fetch_all(executor)
                .await
                .map_err(to_storage_error)?
        }
    };

    Ok(rows.into_iter().map(to_node).collect())
}

pub async fn full_tree<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
) -> Result<Vec<DepthNode>, StorageError> {
    let t = table(schema, hierarchy);
    let query = format!(
        r#"
        SELECT node.id, node.lft, node.rght, node.title, node.description,
               COUNT(parent.id) - 1 AS depth
        FROM {t} AS node, {t} AS parent
        WHERE node.lft BETWEEN parent.lft AND parent.rght
        GROUP BY node.id, node.lft, node.rght, node.title, node.description
        ORDER BY node.lft
        "#
    );

    let rows: Vec<DepthRow> = sqlx::query_as(&query)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows.into_iter().map(to_depth_node).collect())
}

pub async fn find_by_path<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    key: &str,
    leaf_title: &str,
) -> Result<Option<NodeId>, StorageError> {
    let t = table(schema, hierarchy);
    let query = format!(
        r#"
        SELECT node.id
        FROM {t} AS node, {t} AS parent
        WHERE node.lft BETWEEN parent.lft AND parent.rght
          AND node.title = $1
        GROUP BY node.id
        HAVING string_agg(parent.title, '/' ORDER BY parent.lft) = $2
        ORDER BY node.id
        LIMIT 1
        "#
    );

    let row: Option<(i64,)> = sqlx::query_as(&query)
        .bind(leaf_title)
        .bind(key)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(row.map(|(id,)| NodeId::new(id)))
}

/// Rewrites the boundaries of every row. Growing shifts move `rght` first and
/// shrinking shifts move `lft` first so `lft < rght` holds after each statement.
pub async fn apply_shift(
    conn: &mut sqlx::PgConnection,
    schema: &str,
    hierarchy: Hierarchy,
    shift: Shift,
) -> Result<(), StorageError> {
    let t = table(schema, hierarchy);

    let statements: Vec<(String, i64, i64)> = match shift {
        Shift::OpenGap { at } => vec![
            (format!("UPDATE {t} SET rght = rght + $2 WHERE rght >= $1"), at, 2),
            (format!("UPDATE {t} SET lft = lft + $2 WHERE lft >= $1"), at, 2),
        ],
        Shift::Promote { removed } => vec![
            (
                format!("UPDATE {t} SET lft = lft - 1, rght = rght - 1 WHERE lft BETWEEN $1 AND $2"),
                removed.lft,
                removed.rght,
            ),
            (format!("UPDATE {t} SET lft = lft - $2 WHERE lft > $1"), removed.rght, 2),
            (format!("UPDATE {t} SET rght = rght - $2 WHERE rght > $1"), removed.rght, 2),
        ],
        Shift::Collapse { removed } => vec![
            (
                format!("UPDATE {t} SET lft = lft - $2 WHERE lft > $1"),
                removed.rght,
                removed.width(),
            ),
            (
                format!("UPDATE {t} SET rght = rght - $2 WHERE rght > $1"),
                removed.rght,
                removed.width(),
            ),
        ],
    };

    for (query, first, second) in statements {
        sqlx::query(&query)
            .bind(first)
            .bind(second)
            .execute(&mut *conn)
            .await
            .map_err(to_storage_error)?;
    }
    Ok(())
}

pub async fn insert_node<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    slot: Interval,
    title: &str,
    description: &str,
) -> Result<NodeId, StorageError> {
    let t = table(schema, hierarchy);
    let query = format!(
        "INSERT INTO {t} (lft, rght, title, description) VALUES ($1, $2, $3, $4) RETURNING id"
    );
    let row: (i64,) = sqlx::query_as(&query)
        .bind(slot.lft)
        .bind(slot.rght)
        .bind(title)
        .bind(description)
        .fetch_one(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(NodeId::new(row.0))
}

pub async fn delete_node<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    id: NodeId,
) -> Result<u64, StorageError> {
    let t = table(schema, hierarchy);
    let query = format!("DELETE FROM {t} WHERE id = $1");
    let result = sqlx::query(&query)
        .bind(id.value())
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected())
}

pub async fn delete_range<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    removed: Interval,
) -> Result<u64, StorageError> {
    let t = table(schema, hierarchy);
    let query = format!("DELETE FROM {t} WHERE lft BETWEEN $1 AND $2");
    let result = sqlx::query(&query)
        .bind(removed.lft)
        .bind(removed.rght)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected())
}

pub async fn update_node<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
    selector: &Selector,
    edit: &NodeEdit,
) -> Result<u64, StorageError> {
    let t = table(schema, hierarchy);
    let target = target_id(&t);
    let query = format!(
        r#"
        UPDATE {t}
        SET title = COALESCE($3, title), description = COALESCE($4, description)
        WHERE id = {target}
        "#
    );
    let (id, title) = selector_binds(selector);
    let result = sqlx::query(&query)
        .bind(id)
        .bind(title)
        .bind(edit.title.as_deref())
        .bind(edit.description.as_deref())
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected())
}

pub async fn clear_tree<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
) -> Result<u64, StorageError> {
    let t = table(schema, hierarchy);
    let query = format!("DELETE FROM {t} WHERE id <> $1");
    let result = sqlx::query(&query)
        .bind(ROOT_ID.value())
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected())
}

/// Puts a surviving root back to its seeded bounds and title.
pub async fn restore_root<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
) -> Result<u64, StorageError> {
    let t = table(schema, hierarchy);
    let query =
        format!("UPDATE {t} SET lft = 0, rght = 1, title = $2, description = $2 WHERE id = $1");
    let result = sqlx::query(&query)
        .bind(ROOT_ID.value())
        .bind(ROOT_TITLE)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected())
}

pub async fn seed_root<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
) -> Result<(), StorageError> {
    let t = table(schema, hierarchy);
    let query = format!(
        r#"
        INSERT INTO {t} (id, lft, rght, title, description)
        VALUES ($1, 0, 1, $2, $2)
        ON CONFLICT (id) DO NOTHING
        "#
    );
    sqlx::query(&query)
        .bind(ROOT_ID.value())
        .bind(ROOT_TITLE)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

/// Points the id sequence at the current maximum so the next insert follows it.
pub async fn sync_id_sequence<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    hierarchy: Hierarchy,
) -> Result<(), StorageError> {
    let t = table(schema, hierarchy);
    let query = format!(
        "SELECT setval(pg_get_serial_sequence('{t}', 'id'), GREATEST((SELECT MAX(id) FROM {t}), 1))"
    );
    sqlx::query(&query)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

pub async fn insert_role_permission<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    role: NodeId,
    permission: NodeId,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.role_permissions (role_id, permission_id, assigned_at)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#
    );
    match sqlx::query(&query)
        .bind(role.value())
        .bind(permission.value())
        .bind(Utc::now())
        .execute(executor)
        .await
    {
        Ok(result) => Ok(result.rows_affected() == 1),
        Err(e) if is_foreign_key_violation(&e) => Ok(false),
        Err(e) => Err(to_storage_error(e)),
    }
}

pub async fn insert_user_role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    user: UserId,
    role: NodeId,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.user_roles (user_id, role_id, assigned_at)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#
    );
    match sqlx::query(&query)
        .bind(user.value())
        .bind(role.value())
        .bind(Utc::now())
        .execute(executor)
        .await
    {
        Ok(result) => Ok(result.rows_affected() == 1),
        Err(e) if is_foreign_key_violation(&e) => Ok(false),
        Err(e) => Err(to_storage_error(e)),
    }
}

/// Deletes assignment rows where every given column matches. Column names are
/// always crate constants.
pub async fn delete_assignments<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    relation: &str,
    matches: &[(&str, i64)],
) -> Result<u64, StorageError> {
    let mut conditions = Vec::with_capacity(matches.len());
    for (idx, (column, _)) in matches.iter().enumerate() {
        conditions.push(format!("{column} = ${}", idx + 1));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let query = format!("DELETE FROM {schema}.{relation}{where_clause}");

    let mut q = sqlx::query(&query);
    for (_, value) in matches {
        q = q.bind(*value);
    }
    let result = q.execute(executor).await.map_err(to_storage_error)?;
    Ok(result.rows_affected())
}

pub async fn role_permissions_where<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    column: &str,
    value: NodeId,
) -> Result<Vec<RolePermission>, StorageError> {
    let query = format!(
        r#"
        SELECT role_id, permission_id, assigned_at
        FROM {schema}.role_permissions
        WHERE {column} = $1
        ORDER BY role_id, permission_id
        "#
    );
    let rows: Vec<(i64, i64, DateTime<Utc>)> = sqlx::query_as(&query)
        .bind(value.value())
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(role_id, permission_id, assigned_at)| RolePermission {
            role_id: NodeId::new(role_id),
            permission_id: NodeId::new(permission_id),
            assigned_at,
        })
        .collect())
}

pub async fn permissions_of_any<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    roles: &[NodeId],
) -> Result<Vec<NodeId>, StorageError> {
    let ids: Vec<i64> = roles.iter().map(NodeId::value).collect();
    let query = format!(
        r#"
        SELECT DISTINCT permission_id
        FROM {schema}.role_permissions
        WHERE role_id = ANY($1)
        ORDER BY permission_id
        "#
    );
    let rows: Vec<(i64,)> = sqlx::query_as(&query)
        .bind(ids)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows.into_iter().map(|(id,)| NodeId::new(id)).collect())
}

pub async fn roles_of_user<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    user: UserId,
) -> Result<Vec<UserRole>, StorageError> {
    let query = format!(
        r#"
        SELECT user_id, role_id, assigned_at
        FROM {schema}.user_roles
        WHERE user_id = $1
        ORDER BY role_id
        "#
    );
    let rows: Vec<(i64, i64, DateTime<Utc>)> = sqlx::query_as(&query)
        .bind(user.value())
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(user_id, role_id, assigned_at)| UserRole {
            user_id: UserId::new(user_id),
            role_id: NodeId::new(role_id),
            assigned_at,
        })
        .collect())
}
