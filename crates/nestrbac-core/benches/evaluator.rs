use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use nestrbac_core::engine::{AccessError, AccessEvaluator, CheckRequest, GrantReader};
use nestrbac_core::nested::Interval;
use nestrbac_core::node::{EntityRef, Hierarchy, NodeId, UserId};

struct BenchStore {
    roles: Vec<(NodeId, Interval)>,
    permissions: Vec<(NodeId, Interval)>,
    role_permissions: Vec<(NodeId, NodeId)>,
    user_roles: Vec<(UserId, NodeId)>,
}

impl BenchStore {
    fn tree(&self, hierarchy: Hierarchy) -> &[(NodeId, Interval)] {
        match hierarchy {
            Hierarchy::Roles => &self.roles,
            Hierarchy::Permissions => &self.permissions,
        }
    }

    fn interval(&self, hierarchy: Hierarchy, id: NodeId) -> Option<Interval> {
        self.tree(hierarchy)
            .iter()
            .find(|(n, _)| *n == id)
            .map(|(_, i)| *i)
    }
}

impl GrantReader for BenchStore {
    async fn resolve(
        &self,
        _hierarchy: Hierarchy,
        entity: &EntityRef,
    ) -> Result<Option<NodeId>, AccessError> {
        match entity {
            EntityRef::Id(id) => Ok(Some(*id)),
            _ => Ok(None),
        }
    }

    async fn direct_roles(&self, user: UserId) -> Result<Vec<NodeId>, AccessError> {
        Ok(self
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, r)| *r)
            .collect())
    }

    async fn subtree(&self, hierarchy: Hierarchy, id: NodeId) -> Result<Vec<NodeId>, AccessError> {
        let Some(top) = self.interval(hierarchy, id) else {
            return Ok(Vec::new());
        };
        Ok(self
            .tree(hierarchy)
            .iter()
            .filter(|(_, i)| top.contains(i))
            .map(|(n, _)| *n)
            .collect())
    }

    async fn ancestors(&self, hierarchy: Hierarchy, id: NodeId) -> Result<Vec<NodeId>, AccessError> {
        let Some(target) = self.interval(hierarchy, id) else {
            return Ok(Vec::new());
        };
        Ok(self
            .tree(hierarchy)
            .iter()
            .filter(|(_, i)| i.contains(&target))
            .map(|(n, _)| *n)
            .collect())
    }

    async fn granted_permissions(&self, roles: &[NodeId]) -> Result<Vec<NodeId>, AccessError> {
        Ok(self
            .role_permissions
            .iter()
            .filter(|(r, _)| roles.contains(r))
            .map(|(_, p)| *p)
            .collect())
    }
}

/// A single chain `1 > 2 > ... > depth`, ids matching depth + 1.
fn chain(depth: i64) -> Vec<(NodeId, Interval)> {
    let top = 2 * depth - 1;
    (0..depth)
        .map(|d| (NodeId::new(d + 1), Interval::new(d, top - d)))
        .collect()
}

/// Root with `width` leaf children, ids 2..=width+1.
fn fan(width: i64) -> Vec<(NodeId, Interval)> {
    let mut nodes = vec![(NodeId::new(1), Interval::new(0, 2 * width + 1))];
    nodes.extend((0..width).map(|i| (NodeId::new(i + 2), Interval::new(2 * i + 1, 2 * i + 2))));
    nodes
}

fn make_engine(store: BenchStore) -> AccessEvaluator<BenchStore> {
    AccessEvaluator::new(Arc::new(store))
}

fn bench_check_direct_grant(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let engine = make_engine(BenchStore {
        roles: chain(2),
        permissions: chain(2),
        role_permissions: vec![(NodeId::new(2), NodeId::new(2))],
        user_roles: vec![(UserId::new(7), NodeId::new(2))],
    });
    let request = CheckRequest::new(NodeId::new(2), UserId::new(7));

    c.bench_function("check_direct_grant", |b| {
        b.to_async(&rt)
            .iter(|| async { engine.check(&request).await.unwrap() });
    });
}

fn bench_check_deep_permission_chain(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let engine = make_engine(BenchStore {
        roles: chain(2),
        permissions: chain(64),
        role_permissions: vec![(NodeId::new(2), NodeId::new(2))],
        user_roles: vec![(UserId::new(7), NodeId::new(2))],
    });
    let request = CheckRequest::new(NodeId::new(64), UserId::new(7));

    c.bench_function("check_deep_permission_chain_64", |b| {
        b.to_async(&rt)
            .iter(|| async { engine.check(&request).await.unwrap() });
    });
}

fn bench_check_wide_role_closure(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let engine = make_engine(BenchStore {
        roles: fan(500),
        permissions: chain(8),
        role_permissions: vec![(NodeId::new(501), NodeId::new(3))],
        user_roles: vec![(UserId::new(7), NodeId::new(1))],
    });
    let request = CheckRequest::new(NodeId::new(8), UserId::new(7));

    c.bench_function("check_wide_role_closure_500", |b| {
        b.to_async(&rt)
            .iter(|| async { engine.check(&request).await.unwrap() });
    });
}

fn bench_check_denied(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let engine = make_engine(BenchStore {
        roles: fan(100),
        permissions: chain(16),
        role_permissions: vec![],
        user_roles: vec![(UserId::new(7), NodeId::new(1))],
    });
    let request = CheckRequest::new(NodeId::new(16), UserId::new(7));

    c.bench_function("check_denied_fan_100", |b| {
        b.to_async(&rt)
            .iter(|| async { engine.check(&request).await.unwrap() });
    });
}

criterion_group!(
    benches,
    bench_check_direct_grant,
    bench_check_deep_permission_chain,
    bench_check_wide_role_closure,
    bench_check_denied,
);
criterion_main!(benches);
