//! Bundle assembly
//!
//! Walks the source instance's dependency edges from a scope's root
//! entities and produces the closed, topologically ordered set of entities
//! one migration attempt needs:
//! - Breadth-first traversal with a visited set keyed by id, so cyclic
//!   graphs terminate without duplicate entries
//! - Kahn's algorithm for apply order (dependencies first), draining ready
//!   entities in (rank, label, id) order so the result is deterministic
//! - `IncompleteGraph` on any dangling dependency, with no partial bundle

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use anyhow::Result;
use uuid::Uuid;

use crate::remote::SourceAccessor;

use super::error::MigrationError;
use super::types::{Bundle, Entity, ScopeRef};

/// Compute the bundle for one migration scope.
pub async fn assemble(source: &dyn SourceAccessor, scope: &ScopeRef) -> Result<Bundle> {
    let roots = source.resolve_scope(scope).await?;
    log::debug!("assembling bundle for scope '{scope}' from {} roots", roots.len());

    let mut entities: HashMap<Uuid, Entity> = HashMap::new();
    let mut dependencies: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

    let mut visited: HashSet<Uuid> = roots.iter().copied().collect();
    let mut queue: VecDeque<(Uuid, Option<Uuid>)> =
        roots.into_iter().map(|id| (id, None)).collect();

    while let Some((id, required_by)) = queue.pop_front() {
        let Some(entity) = source.get_entity(id).await? else {
            return Err(MigrationError::IncompleteGraph {
                missing: id,
                required_by,
            }
            .into());
        };

        let deps = source.list_dependencies(id).await?;
        for dep in &deps {
            if visited.insert(*dep) {
                queue.push_back((*dep, Some(id)));
            }
        }
        dependencies.insert(id, deps);
        entities.insert(id, entity);
    }

    let order = topological_order(&entities, &dependencies);
    let ordered: Vec<Entity> = order
        .into_iter()
        .filter_map(|id| entities.remove(&id))
        .collect();

    let bundle = Bundle::new(ordered);
    log::info!(
        "bundle for scope '{scope}' packed: {} entities",
        bundle.len()
    );
    Ok(bundle)
}

/// Sort key: dependency rank first, then label and id for determinism.
fn order_key(entity: &Entity) -> (u8, String, Uuid) {
    (entity.kind.rank(), entity.label.clone(), entity.id)
}

/// Kahn's algorithm over the closed entity set.
///
/// Self-references and duplicate edges are ignored. If the ready set runs
/// dry before every entity is placed, the graph has a cycle (a Relation or
/// Template referencing back); the smallest remaining entity is forced
/// into the order, which drops exactly the cycle-closing edges from the
/// ordering pass while leaving membership untouched.
fn topological_order(
    entities: &HashMap<Uuid, Entity>,
    dependencies: &HashMap<Uuid, Vec<Uuid>>,
) -> Vec<Uuid> {
    let mut in_degree: HashMap<Uuid, usize> = HashMap::new();
    let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

    for id in entities.keys() {
        let deps: HashSet<Uuid> = dependencies
            .get(id)
            .map(|deps| deps.iter().copied().filter(|dep| dep != id).collect())
            .unwrap_or_default();

        in_degree.insert(*id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(*id);
        }
    }

    let mut ready: BinaryHeap<Reverse<(u8, String, Uuid)>> = entities
        .values()
        .filter(|e| in_degree[&e.id] == 0)
        .map(|e| Reverse(order_key(e)))
        .collect();

    let mut order = Vec::with_capacity(entities.len());
    let mut placed: HashSet<Uuid> = HashSet::new();

    while order.len() < entities.len() {
        while let Some(Reverse((_, _, id))) = ready.pop() {
            if !placed.insert(id) {
                continue;
            }
            order.push(id);

            for dependent in dependents.get(&id).cloned().unwrap_or_default() {
                if placed.contains(&dependent) {
                    continue;
                }
                let degree = in_degree.get_mut(&dependent).unwrap();
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.push(Reverse(order_key(&entities[&dependent])));
                }
            }
        }

        if order.len() < entities.len() {
            // Cycle: force the smallest remaining entity.
            let forced = entities
                .values()
                .filter(|e| !placed.contains(&e.id))
                .map(order_key)
                .min()
                .unwrap();
            log::debug!("dependency cycle detected; forcing {} into order", forced.2);
            ready.push(Reverse(forced));
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::types::EntityKind;
    use crate::remote::MemoryInstance;

    fn entity(label: &str, kind: EntityKind) -> Entity {
        Entity::new(Uuid::new_v4(), label, kind)
    }

    /// Source with a small coherent graph:
    /// User, Order (object types); Order.total (property -> Order);
    /// UserHasManyOrder (relation -> User, Order); OrderFlow (template ->
    /// relation). Scope roots at the template.
    fn sample_source() -> (MemoryInstance, ScopeRef, Vec<Uuid>) {
        let source = MemoryInstance::new("source");

        let user = entity("User", EntityKind::ObjectType);
        let order = entity("Order", EntityKind::ObjectType);
        let total = entity("Order.total", EntityKind::Property);
        let relation = entity("UserHasManyOrder", EntityKind::Relation);
        let template = entity("OrderFlow", EntityKind::Template);

        let ids = vec![user.id, order.id, total.id, relation.id, template.id];

        source.add_dependency(total.id, order.id);
        source.add_dependency(relation.id, user.id);
        source.add_dependency(relation.id, order.id);
        source.add_dependency(template.id, relation.id);
        source.add_dependency(template.id, total.id);

        for e in [user, order, total, relation, template] {
            source.insert_entity(e);
        }

        let scope = ScopeRef::use_case("Orders");
        source.define_scope(&scope, vec![ids[4]]);

        (source, scope, ids)
    }

    fn position(bundle: &Bundle, id: Uuid) -> usize {
        bundle.entities().iter().position(|e| e.id == id).unwrap()
    }

    #[tokio::test]
    async fn test_closure_includes_transitive_dependencies() {
        let (source, scope, ids) = sample_source();

        let bundle = assemble(&source, &scope).await.unwrap();

        assert_eq!(bundle.len(), 5);
        for id in ids {
            assert!(bundle.entities().iter().any(|e| e.id == id));
        }
    }

    #[tokio::test]
    async fn test_dependencies_appear_before_dependents() {
        let (source, scope, ids) = sample_source();
        let [user, order, total, relation, template] = ids[..] else {
            unreachable!()
        };

        let bundle = assemble(&source, &scope).await.unwrap();

        assert!(position(&bundle, order) < position(&bundle, total));
        assert!(position(&bundle, user) < position(&bundle, relation));
        assert!(position(&bundle, order) < position(&bundle, relation));
        assert!(position(&bundle, relation) < position(&bundle, template));
        assert!(position(&bundle, total) < position(&bundle, template));
    }

    #[tokio::test]
    async fn test_summary_counts_per_kind() {
        let (source, scope, _) = sample_source();

        let bundle = assemble(&source, &scope).await.unwrap();

        assert_eq!(bundle.count(EntityKind::ObjectType), 2);
        assert_eq!(bundle.count(EntityKind::Property), 1);
        assert_eq!(bundle.count(EntityKind::Relation), 1);
        assert_eq!(bundle.count(EntityKind::Template), 1);
        assert_eq!(bundle.count(EntityKind::Record), 0);
    }

    #[tokio::test]
    async fn test_cycle_terminates_without_duplicates() {
        let source = MemoryInstance::new("source");

        // Template -> Relation -> ObjectType, and the object type refers
        // back to the template through a different edge.
        let object_type = entity("User", EntityKind::ObjectType);
        let relation = entity("UserBelongsToUser", EntityKind::Relation);
        let template = entity("UserOnboarding", EntityKind::Template);

        source.add_dependency(template.id, relation.id);
        source.add_dependency(relation.id, object_type.id);
        source.add_dependency(object_type.id, template.id);

        let ids = [object_type.id, relation.id, template.id];
        for e in [object_type, relation, template] {
            source.insert_entity(e);
        }

        let scope = ScopeRef::use_case("Onboarding");
        source.define_scope(&scope, vec![ids[2]]);

        let bundle = assemble(&source, &scope).await.unwrap();

        assert_eq!(bundle.len(), 3);
        let unique: HashSet<Uuid> = bundle.entities().iter().map(|e| e.id).collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_dangling_dependency_aborts_bundling() {
        let source = MemoryInstance::new("source");

        let property = entity("User.name", EntityKind::Property);
        let missing = Uuid::new_v4();
        source.add_dependency(property.id, missing);
        let root = property.id;
        source.insert_entity(property);

        let scope = ScopeRef::use_case("Onboarding");
        source.define_scope(&scope, vec![root]);

        let err = assemble(&source, &scope).await.unwrap_err();
        match err.downcast_ref::<MigrationError>() {
            Some(MigrationError::IncompleteGraph {
                missing: m,
                required_by,
            }) => {
                assert_eq!(*m, missing);
                assert_eq!(*required_by, Some(root));
            }
            other => panic!("expected IncompleteGraph, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_assembly_is_deterministic() {
        let (source, scope, _) = sample_source();

        let first = assemble(&source, &scope).await.unwrap();
        let second = assemble(&source, &scope).await.unwrap();

        let first_ids: Vec<Uuid> = first.entities().iter().map(|e| e.id).collect();
        let second_ids: Vec<Uuid> = second.entities().iter().map(|e| e.id).collect();
        assert_eq!(first_ids, second_ids);
    }
}
