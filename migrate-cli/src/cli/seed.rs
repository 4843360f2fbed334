//! Seed command handler
//!
//! Writes a small but coherent source/target snapshot pair: a dependency
//! graph spanning every entity kind on the source side, and a target that
//! already holds a mix of matching, renamed and label-equivalent entities
//! so a plan against it shows all four reconciliation outcomes.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use rand::Rng;
use uuid::Uuid;

use crate::migration::types::{Entity, EntityKind};
use crate::remote::{FileInstance, InstanceSnapshot};

use super::SeedArgs;

const OBJECT_TYPES: &[&str] = &[
    "User", "Product", "Order", "Customer", "Invoice", "Task", "Project", "Event",
];
const PROPERTIES: &[&str] = &[
    "name", "email", "price", "status", "createdAt", "description", "quantity", "address",
];
const RECORD_VARIANTS: &[&str] = &["Admin", "Manager", "Standard", "Premium", "Basic", "Pro"];
const ENUMS: &[&str] = &["Status", "Role", "Priority", "Category", "Level"];
const TEMPLATES: &[&str] = &[
    "OrderFlow",
    "UserOnboarding",
    "InvoiceApproval",
    "TaskManagement",
];

pub fn handle_seed_command(args: SeedArgs) -> Result<()> {
    fs::create_dir_all(&args.dir)
        .with_context(|| format!("failed to create directory: {}", args.dir.display()))?;

    let (source, target) = generate_pair();
    let source_path = args.dir.join("source.json");
    let target_path = args.dir.join("target.json");
    FileInstance::create(&source_path, source)?;
    FileInstance::create(&target_path, target)?;

    println!(
        "Wrote {} and {}",
        source_path.display(),
        target_path.display()
    );
    println!(
        "Try: migrate-cli plan {} {} --use-case Operations",
        source_path.display(),
        target_path.display()
    );
    Ok(())
}

fn generate_pair() -> (InstanceSnapshot, InstanceSnapshot) {
    let mut rng = rand::rng();
    let mut entities = Vec::new();
    let mut dependencies: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();

    let mut object_pool: Vec<&str> = OBJECT_TYPES.to_vec();
    let object_types: Vec<Entity> = (0..3)
        .map(|_| {
            let label = object_pool.remove(rng.random_range(0..object_pool.len()));
            Entity::new(Uuid::new_v4(), label, EntityKind::ObjectType)
        })
        .collect();

    let mut properties = Vec::new();
    for object_type in &object_types {
        let mut prop_pool: Vec<&str> = PROPERTIES.to_vec();
        for _ in 0..2 {
            let prop = prop_pool.remove(rng.random_range(0..prop_pool.len()));
            let property = Entity::new(
                Uuid::new_v4(),
                format!("{}.{prop}", object_type.label),
                EntityKind::Property,
            );
            dependencies.insert(property.id, vec![object_type.id]);
            properties.push(property);
        }
    }

    let relation = Entity::new(
        Uuid::new_v4(),
        format!("{}HasMany{}", object_types[0].label, object_types[1].label),
        EntityKind::Relation,
    );
    dependencies.insert(relation.id, vec![object_types[0].id, object_types[1].id]);

    let records: Vec<Entity> = (0..2)
        .map(|_| {
            let variant = RECORD_VARIANTS[rng.random_range(0..RECORD_VARIANTS.len())];
            let record = Entity::new(
                Uuid::new_v4(),
                format!("{}{variant}", object_types[0].label),
                EntityKind::Record,
            );
            dependencies.insert(record.id, vec![object_types[0].id]);
            record
        })
        .collect();

    let enumeration = Entity::new(
        Uuid::new_v4(),
        ENUMS[rng.random_range(0..ENUMS.len())],
        EntityKind::Enumeration,
    );

    let template = Entity::new(
        Uuid::new_v4(),
        TEMPLATES[rng.random_range(0..TEMPLATES.len())],
        EntityKind::Template,
    );
    dependencies.insert(
        template.id,
        vec![relation.id, properties[0].id, enumeration.id],
    );

    let mut scopes = BTreeMap::new();
    let mut roots = vec![template.id];
    roots.extend(records.iter().map(|r| r.id));
    scopes.insert("Operations".to_string(), roots);
    scopes.insert(
        "Operations/Facility A".to_string(),
        vec![object_types[0].id],
    );

    // Target state chosen to exercise every outcome: the first object type
    // matches, the second was renamed there, the enumeration exists under
    // a different id, and everything else is missing.
    let mut renamed = object_types[1].clone();
    renamed.label = format!("{} (legacy)", renamed.label);
    let target_entities = vec![
        object_types[0].clone(),
        renamed,
        Entity::new(Uuid::new_v4(), enumeration.label.clone(), EntityKind::Enumeration),
    ];

    entities.extend(object_types);
    entities.extend(properties);
    entities.push(relation);
    entities.extend(records);
    entities.push(enumeration);
    entities.push(template);

    (
        InstanceSnapshot {
            entities,
            dependencies,
            scopes,
        },
        InstanceSnapshot {
            entities: target_entities,
            dependencies: BTreeMap::new(),
            scopes: BTreeMap::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_pair_is_coherent() {
        let (source, target) = generate_pair();

        // Every dependency edge resolves inside the snapshot.
        let ids: HashSet<Uuid> = source.entities.iter().map(|e| e.id).collect();
        for (from, deps) in &source.dependencies {
            assert!(ids.contains(from));
            for dep in deps {
                assert!(ids.contains(dep), "dangling dependency in seeded source");
            }
        }

        // Scope roots resolve too.
        for roots in source.scopes.values() {
            for root in roots {
                assert!(ids.contains(root));
            }
        }

        assert!(source.entities.len() >= 10);
        assert_eq!(target.entities.len(), 3);
    }

    #[test]
    fn test_generated_labels_are_distinct_object_types() {
        let (source, _) = generate_pair();
        let labels: Vec<&String> = source
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::ObjectType)
            .map(|e| &e.label)
            .collect();
        let unique: HashSet<&String> = labels.iter().copied().collect();
        assert_eq!(labels.len(), unique.len());
    }
}
