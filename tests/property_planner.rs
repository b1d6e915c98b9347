//! Property tests for the order planner and market templating.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;

use metasync::MetasyncError;
use metasync::graph::OrderPlanner;
use metasync::item::{MetadataItem, TypeName};
use metasync::registry::{FieldRule, Pagination, TypeDefinition, TypeRegistry};
use metasync::templating::{build_definition, build_template};

fn synthetic_def(index: usize, deps: Vec<usize>) -> TypeDefinition {
    TypeDefinition {
        type_name: TypeName::from(format!("type{index:02}")),
        key_field: Some("key".into()),
        id_field: "id".into(),
        name_field: "name".into(),
        dependencies: deps.into_iter().map(|d| TypeName::from(format!("type{d:02}"))).collect(),
        soft_dependencies: Vec::new(),
        retrieved_by_default: true,
        pagination: Pagination::Rest,
        fields: BTreeMap::new(),
        references: BTreeMap::new(),
        extract: None,
    }
}

/// An arbitrary DAG over `n` nodes: edges only point from a
/// lower-indexed dependency to a higher-indexed dependent, so the graph
/// is acyclic by construction.
fn arb_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..12).prop_flat_map(|n| {
        let deps_per_node: Vec<_> =
            (0..n).map(|i| proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i)).collect();
        deps_per_node
    })
}

proptest! {
    #[test]
    fn planned_order_respects_every_hard_edge(deps in arb_dag()) {
        let registry = TypeRegistry::new(
            deps.iter().enumerate().map(|(i, d)| synthetic_def(i, d.clone())),
        );
        let involved: Vec<TypeName> =
            (0..deps.len()).map(|i| TypeName::from(format!("type{i:02}"))).collect();

        let plan = OrderPlanner::new(&registry).plan(&involved).unwrap();
        prop_assert_eq!(plan.order.len(), involved.len());

        let position: BTreeMap<&TypeName, usize> =
            plan.order.iter().enumerate().map(|(p, t)| (t, p)).collect();
        for (dependent, node_deps) in deps.iter().enumerate() {
            let dependent = TypeName::from(format!("type{dependent:02}"));
            for dep in node_deps {
                let dep = TypeName::from(format!("type{dep:02}"));
                prop_assert!(
                    position[&dep] < position[&dependent],
                    "{dep} must precede {dependent} in {:?}",
                    plan.order
                );
            }
        }
    }

    #[test]
    fn planning_is_deterministic_across_input_orderings(deps in arb_dag(), seed in any::<u64>()) {
        let registry = TypeRegistry::new(
            deps.iter().enumerate().map(|(i, d)| synthetic_def(i, d.clone())),
        );
        let mut involved: Vec<TypeName> =
            (0..deps.len()).map(|i| TypeName::from(format!("type{i:02}"))).collect();
        let planner = OrderPlanner::new(&registry);

        let baseline = planner.plan(&involved).unwrap();
        // A cheap deterministic shuffle of the input order.
        involved.sort_by_key(|t| {
            t.as_str().bytes().fold(seed, |acc, b| acc.rotate_left(7) ^ u64::from(b))
        });
        let shuffled = planner.plan(&involved).unwrap();
        prop_assert_eq!(baseline, shuffled);
    }

    #[test]
    fn cycles_fail_with_every_member_named(len in 2usize..8) {
        // A pure ring: every node hard-depends on its predecessor and
        // the first on the last.
        let defs: Vec<_> = (0..len)
            .map(|i| synthetic_def(i, vec![(i + len - 1) % len]))
            .collect();
        let registry = TypeRegistry::new(defs);
        let involved: Vec<TypeName> =
            (0..len).map(|i| TypeName::from(format!("type{i:02}"))).collect();

        let err = OrderPlanner::new(&registry).plan(&involved).unwrap_err();
        match err {
            MetasyncError::Cycle { members } => {
                prop_assert_eq!(members, involved);
            }
            other => prop_assert!(false, "expected a cycle error, got {other}"),
        }
    }

    #[test]
    fn template_instantiation_inverts_generalization(
        market in "[a-z]{3,8}",
        suffix in "[A-Za-z0-9 ]{0,12}",
    ) {
        let def = TypeDefinition {
            fields: [
                ("name".to_string(), FieldRule::templatable()),
                ("description".to_string(), FieldRule::templatable()),
            ]
            .into(),
            ..synthetic_def(0, Vec::new())
        };
        let registry = TypeRegistry::new([def]);

        let item = MetadataItem::new(
            TypeName::from("type00"),
            "k1",
            [
                ("key".to_string(), json!("k1")),
                ("name".to_string(), json!(format!("{market} {suffix}"))),
                ("description".to_string(), json!("static copy")),
            ]
            .into_iter()
            .collect(),
        );

        let variables: BTreeMap<String, serde_json::Value> =
            [("market".to_string(), json!(market))].into();
        let template = build_template(&registry, &item, &variables).unwrap();
        let rebuilt = build_definition(&template, &variables).unwrap();
        prop_assert_eq!(rebuilt.fields, item.fields);
    }
}
