//! Dependency graph and processing-order planning.
//!
//! The planner builds a directed graph over the metadata types involved
//! in an operation, using the dependency edges declared in the type
//! schema registry, and produces a total order in which every hard
//! dependency precedes its dependents. The same order is used for
//! retrieval (fetch dependencies first so the reference cache is warm)
//! and deployment (create dependencies first so reference resolution at
//! deploy time succeeds).
//!
//! Soft dependencies - the declared break-edge allow-list, e.g. a
//! folder's self reference or the automation/triggered-send pair - are
//! excluded from ordering and surfaced on the resulting [`Plan`] so the
//! deployer can resolve them best-effort in a deferred pass. Any cycle
//! remaining among the *hard* edges is a genuine schema conflict and is
//! reported, never silently broken.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::{MetasyncError, Result};
use crate::item::TypeName;
use crate::registry::TypeRegistry;

/// The outcome of planning: a safe total order plus the soft edges that
/// were excluded from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Types in processing order; every hard dependency precedes its
    /// dependents.
    pub order: Vec<TypeName>,
    /// Soft edges within the involved set, as `(dependent, dependency)`
    /// pairs; resolved best-effort after the main pass.
    pub deferred: Vec<(TypeName, TypeName)>,
}

/// Plans a processing order over the registry's declared dependencies.
pub struct OrderPlanner<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> OrderPlanner<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// Produce a processing order for `types`.
    ///
    /// Edges are the declared hard dependencies intersected with the
    /// involved set; a dependency outside the set imposes no ordering.
    /// Ties among simultaneously-free nodes break alphabetically, so the
    /// order is deterministic. A cycle among hard edges fails with
    /// [`MetasyncError::Cycle`] listing the cycle's members.
    pub fn plan(&self, types: &[TypeName]) -> Result<Plan> {
        let involved: BTreeSet<TypeName> = types.iter().cloned().collect();

        // Validate every name up front; setup errors abort before work.
        for type_name in &involved {
            self.registry.get(type_name)?;
        }

        let mut graph: DiGraph<TypeName, ()> = DiGraph::new();
        let mut node_map: HashMap<TypeName, NodeIndex> = HashMap::new();
        for type_name in &involved {
            let idx = graph.add_node(type_name.clone());
            node_map.insert(type_name.clone(), idx);
        }

        let mut deferred = Vec::new();
        for type_name in &involved {
            let def = self.registry.get(type_name)?;
            for dep in &def.dependencies {
                // Self edges can never be ordered; treat as soft.
                if dep == type_name {
                    deferred.push((type_name.clone(), dep.clone()));
                    continue;
                }
                if involved.contains(dep) {
                    // dependency -> dependent, so dependencies drain first
                    graph.add_edge(node_map[dep], node_map[type_name], ());
                }
            }
            for dep in &def.soft_dependencies {
                if involved.contains(dep) {
                    deferred.push((type_name.clone(), dep.clone()));
                }
            }
        }
        deferred.sort();
        deferred.dedup();

        let order = kahn_alphabetical(&graph).ok_or_else(|| MetasyncError::Cycle {
            members: cycle_members(&graph),
        })?;

        Ok(Plan { order, deferred })
    }
}

/// Kahn's algorithm with an alphabetical tie-break among zero-in-degree
/// nodes. Returns `None` when the graph has a cycle.
fn kahn_alphabetical(graph: &DiGraph<TypeName, ()>) -> Option<Vec<TypeName>> {
    let mut in_degree: BTreeMap<TypeName, usize> = BTreeMap::new();
    let mut index_of: HashMap<TypeName, NodeIndex> = HashMap::new();
    for idx in graph.node_indices() {
        let name = graph[idx].clone();
        in_degree.insert(name.clone(), 0);
        index_of.insert(name, idx);
    }
    for edge in graph.edge_indices() {
        let (_, target) = graph.edge_endpoints(edge)?;
        *in_degree.get_mut(&graph[target]).unwrap() += 1;
    }

    let mut free: BTreeSet<TypeName> =
        in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| n.clone()).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(next) = free.iter().next().cloned() {
        free.remove(&next);
        let idx = index_of[&next];
        for neighbor in graph.neighbors(idx) {
            let name = &graph[neighbor];
            let degree = in_degree.get_mut(name).unwrap();
            *degree -= 1;
            if *degree == 0 {
                free.insert(name.clone());
            }
        }
        order.push(next);
    }

    (order.len() == in_degree.len()).then_some(order)
}

/// Members of one offending cycle, for diagnostics. Sorted for
/// reproducible output.
fn cycle_members(graph: &DiGraph<TypeName, ()>) -> Vec<TypeName> {
    petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.len() > 1)
        .map(|scc| {
            let mut members: Vec<TypeName> = scc.into_iter().map(|i| graph[i].clone()).collect();
            members.sort();
            members
        })
        .unwrap_or_default()
}
