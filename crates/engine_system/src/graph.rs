//! Dependency graph construction, cycle detection and priority estimation.
//!
//! The graph is rebuilt lazily: only on the first `invoke` (or snapshot)
//! after the registered set changed. A rebuild recomputes every edge set from
//! the systems' ordering tags:
//!
//! - `run_before(T)` on S: S → X for every X carrying T.
//! - `run_after(T)` on S: X → S for every X carrying T.
//! - `run_not_during(T)` on S: S ↔ X blacklisted for every other X carrying T.
//!
//! Priorities are then computed bottom-up over the dependency order: a
//! system's priority is its own cost estimate plus the priorities of all of
//! its dependents, so systems gating the most follow-up work start first.

use std::collections::HashSet;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use tracing::{debug, info};

use engine_component::{AccessMode, ComponentTypeId};

use crate::error::ScheduleError;
use crate::registry::{SystemId, SystemTable};

/// Recompute every dependency, dependent and blacklist set in `table` and
/// verify the result is acyclic.
///
/// On success the table is marked rebuilt and every priority is stale. On
/// failure the table keeps its changed flag, so the next attempt re-checks.
pub(crate) fn rebuild(table: &mut SystemTable) -> Result<(), ScheduleError> {
    for record in table.records_mut() {
        record.dependencies.clear();
        record.dependents.clear();
        record.blacklist.clear();
    }

    let mut edges: Vec<(SystemId, SystemId)> = Vec::new();
    let mut exclusions: Vec<(SystemId, SystemId)> = Vec::new();

    for record in table.records() {
        let desc = &record.descriptor;

        for tag in &desc.run_before {
            let carriers = table.carriers(*tag);
            if carriers.is_empty() {
                debug!(system = %record.name, tag = tag.0, "run_before tag has no carriers");
            }
            edges.extend(carriers.iter().map(|&other| (record.id, other)));
        }

        for tag in &desc.run_after {
            let carriers = table.carriers(*tag);
            if carriers.is_empty() {
                debug!(system = %record.name, tag = tag.0, "run_after tag has no carriers");
            }
            edges.extend(carriers.iter().map(|&other| (other, record.id)));
        }

        for tag in &desc.run_not_during {
            exclusions.extend(
                table
                    .carriers(*tag)
                    .iter()
                    .filter(|&&other| other != record.id)
                    .map(|&other| (record.id, other)),
            );
        }
    }

    for &(from, to) in &edges {
        if let Some(record) = table.record_mut(from) {
            record.dependents.insert(to);
        }
        if let Some(record) = table.record_mut(to) {
            record.dependencies.insert(from);
        }
    }

    for &(a, b) in &exclusions {
        if let Some(record) = table.record_mut(a) {
            record.blacklist.insert(b);
        }
        if let Some(record) = table.record_mut(b) {
            record.blacklist.insert(a);
        }
    }

    let mut graph: DiGraphMap<SystemId, ()> = DiGraphMap::new();
    for id in table.ids() {
        graph.add_node(id);
    }
    for &(from, to) in &edges {
        graph.add_edge(from, to, ());
    }

    let order = match toposort(&graph, None) {
        Ok(order) => order,
        Err(_) => {
            return Err(ScheduleError::CyclicDependency {
                cycles: find_cycles(&graph, table),
            });
        }
    };

    for record in table.records_mut() {
        record.priority_stale = true;
    }
    table.topo_order = order;
    table.mark_rebuilt();

    info!(
        systems = table.len(),
        dependency_edges = graph.edge_count(),
        blacklist_pairs = exclusions.len(),
        "rebuilt system graph"
    );
    Ok(())
}

/// Every strongly connected component that forms a cycle, by system name.
fn find_cycles(graph: &DiGraphMap<SystemId, ()>, table: &SystemTable) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<SystemId>> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || graph.contains_edge(component[0], component[0])
        })
        .collect();

    for cycle in &mut cycles {
        cycle.sort_unstable();
    }
    cycles.sort_unstable();

    cycles
        .into_iter()
        .map(|cycle| {
            cycle
                .into_iter()
                .map(|id| {
                    table
                        .record(id)
                        .map_or_else(|| id.to_string(), |record| record.name.clone())
                })
                .collect()
        })
        .collect()
}

/// Recompute stale priorities, dependents first.
///
/// A priority is recomputed when the system's own estimate changed or when
/// any of its dependents was recomputed in this pass.
pub(crate) fn update_priorities(table: &mut SystemTable) {
    let mut recomputed: HashSet<SystemId> = HashSet::new();
    let order = table.topo_order.clone();

    for id in order.into_iter().rev() {
        let Some(record) = table.record(id) else {
            continue;
        };

        let dependents_changed = record.dependents.iter().any(|d| recomputed.contains(d));
        if !record.priority_stale && !dependents_changed {
            continue;
        }

        let downstream = record
            .dependents
            .iter()
            .filter_map(|d| table.record(*d))
            .fold(0u64, |sum, dependent| sum.saturating_add(dependent.priority));
        let priority = record.profile.estimate_nanos().saturating_add(downstream);

        if let Some(record) = table.record_mut(id) {
            record.priority = priority;
            record.priority_stale = false;
        }
        recomputed.insert(id);
    }
}

/// A serialisable view of the scheduling graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    /// One entry per registered system, in id order.
    pub systems: Vec<SystemSnapshot>,
    /// Pairs of systems whose declared access conflicts. The scheduler will
    /// never run such a pair concurrently, even without an ordering edge.
    pub conflicts: Vec<(SystemId, SystemId)>,
}

/// One system in a [`GraphSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub id: SystemId,
    pub name: String,
    pub priority: u64,
    pub performance_ns: u64,
    pub dependencies: Vec<SystemId>,
    pub dependents: Vec<SystemId>,
    pub blacklist: Vec<SystemId>,
    pub component_access: Vec<(ComponentTypeId, AccessMode)>,
    pub entity_access: AccessMode,
    pub requires_exclusive: bool,
    pub requires_main_thread: bool,
}

pub(crate) fn snapshot(table: &SystemTable) -> GraphSnapshot {
    let systems: Vec<SystemSnapshot> = table
        .records()
        .map(|record| SystemSnapshot {
            id: record.id,
            name: record.name.clone(),
            priority: record.priority,
            performance_ns: record.profile.estimate_nanos(),
            dependencies: record.dependencies.iter().copied().collect(),
            dependents: record.dependents.iter().copied().collect(),
            blacklist: record.blacklist.iter().copied().collect(),
            component_access: record.component_access.clone(),
            entity_access: record.entity_access,
            requires_exclusive: record.requires_exclusive,
            requires_main_thread: record.requires_main_thread,
        })
        .collect();

    let records: Vec<_> = table.records().collect();
    let mut conflicts = Vec::new();
    for (i, a) in records.iter().enumerate() {
        for b in &records[i + 1..] {
            if a.descriptor.access.conflicts_with(&b.descriptor.access) {
                conflicts.push((a.id, b.id));
            }
        }
    }

    GraphSnapshot { systems, conflicts }
}

#[cfg(test)]
mod tests {
    use crate::context::TickContext;
    use crate::descriptor::{SequenceTag, SystemDescriptor};
    use crate::system::FnSystem;

    use super::*;

    fn add(table: &mut SystemTable, name: &str, desc: SystemDescriptor) -> SystemId {
        table.insert(Box::new(FnSystem::new(name, desc, |_: &TickContext| {})))
    }

    fn tag(name: &str) -> SequenceTag {
        SequenceTag::named(name)
    }

    #[test]
    fn test_run_before_and_after_edges_are_symmetric() {
        let mut table = SystemTable::new(1);
        let input = add(&mut table, "input", SystemDescriptor::new().tag(tag("input")));
        let physics = add(
            &mut table,
            "physics",
            SystemDescriptor::new()
                .tag(tag("physics"))
                .run_after(tag("input")),
        );
        let render = add(
            &mut table,
            "render",
            SystemDescriptor::new().run_after(tag("physics")),
        );
        let early = add(
            &mut table,
            "early",
            SystemDescriptor::new().run_before(tag("physics")),
        );

        rebuild(&mut table).unwrap();

        let physics_record = table.record(physics).unwrap();
        assert_eq!(
            physics_record.dependencies.iter().copied().collect::<Vec<_>>(),
            vec![input, early]
        );
        assert_eq!(
            physics_record.dependents.iter().copied().collect::<Vec<_>>(),
            vec![render]
        );
        assert!(table.record(input).unwrap().dependents.contains(&physics));
        assert!(table.record(early).unwrap().dependents.contains(&physics));
        assert!(table.record(render).unwrap().dependencies.contains(&physics));

        for record in table.records() {
            for dependent in &record.dependents {
                assert!(table.record(*dependent).unwrap().dependencies.contains(&record.id));
            }
        }
        assert!(!table.is_changed());
    }

    #[test]
    fn test_blacklist_is_symmetric_and_ignores_self() {
        let mut table = SystemTable::new(1);
        let saver = add(
            &mut table,
            "saver",
            SystemDescriptor::new().tag(tag("io")).run_not_during(tag("io")),
        );
        let loader = add(&mut table, "loader", SystemDescriptor::new().tag(tag("io")));

        rebuild(&mut table).unwrap();

        assert_eq!(
            table.record(saver).unwrap().blacklist.iter().copied().collect::<Vec<_>>(),
            vec![loader]
        );
        assert!(table.record(loader).unwrap().blacklist.contains(&saver));
        assert!(table.record(saver).unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_unreferenced_tags_produce_no_edges() {
        let mut table = SystemTable::new(1);
        let lonely = add(
            &mut table,
            "lonely",
            SystemDescriptor::new().run_after(tag("nobody")),
        );
        rebuild(&mut table).unwrap();
        assert!(table.record(lonely).unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_cycle_is_reported_by_name() {
        let mut table = SystemTable::new(1);
        add(
            &mut table,
            "a",
            SystemDescriptor::new().tag(tag("a")).run_after(tag("b")),
        );
        add(
            &mut table,
            "b",
            SystemDescriptor::new().tag(tag("b")).run_after(tag("a")),
        );
        add(&mut table, "c", SystemDescriptor::new().run_after(tag("a")));

        match rebuild(&mut table) {
            Err(ScheduleError::CyclicDependency { cycles }) => {
                assert_eq!(cycles, vec![vec!["a".to_string(), "b".to_string()]]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
        assert!(table.is_changed());
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut table = SystemTable::new(1);
        add(
            &mut table,
            "ouroboros",
            SystemDescriptor::new().tag(tag("snake")).run_after(tag("snake")),
        );

        let err = rebuild(&mut table).unwrap_err();
        assert!(err.to_string().contains("ouroboros"));
    }

    #[test]
    fn test_rebuild_drops_stale_edges() {
        let mut table = SystemTable::new(1);
        let first = add(&mut table, "first", SystemDescriptor::new().tag(tag("first")));
        let second = add(
            &mut table,
            "second",
            SystemDescriptor::new().run_after(tag("first")),
        );
        rebuild(&mut table).unwrap();
        assert_eq!(table.record(second).unwrap().dependencies.len(), 1);

        table.remove(first);
        rebuild(&mut table).unwrap();
        assert!(table.record(second).unwrap().dependencies.is_empty());
        assert_eq!(table.topo_order, vec![second]);
    }

    #[test]
    fn test_priority_is_cost_plus_dependents() {
        let mut table = SystemTable::new(1);
        // a -> b -> c, and a -> d
        let a = add(
            &mut table,
            "a",
            SystemDescriptor::new().run_before(tag("b")).run_before(tag("d")),
        );
        let b = add(
            &mut table,
            "b",
            SystemDescriptor::new().tag(tag("b")).run_before(tag("c")),
        );
        let c = add(&mut table, "c", SystemDescriptor::new().tag(tag("c")));
        let d = add(&mut table, "d", SystemDescriptor::new().tag(tag("d")));

        rebuild(&mut table).unwrap();
        update_priorities(&mut table);

        let priority = |id| table.record(id).unwrap().priority;
        assert_eq!(priority(c), 1);
        assert_eq!(priority(d), 1);
        assert_eq!(priority(b), 2);
        assert_eq!(priority(a), 4);
    }

    #[test]
    fn test_priority_refresh_propagates_to_ancestors() {
        let mut table = SystemTable::new(1);
        let a = add(&mut table, "a", SystemDescriptor::new().run_before(tag("b")));
        let b = add(&mut table, "b", SystemDescriptor::new().tag(tag("b")));
        rebuild(&mut table).unwrap();
        update_priorities(&mut table);
        assert_eq!(table.record(a).unwrap().priority, 2);

        let record = table.record_mut(b).unwrap();
        record.profile.record(std::time::Duration::from_nanos(100));
        record.priority_stale = true;
        update_priorities(&mut table);

        assert_eq!(table.record(b).unwrap().priority, 100);
        assert_eq!(table.record(a).unwrap().priority, 101);
    }

    #[test]
    fn test_snapshot_lists_conflicts() {
        let position = ComponentTypeId::from_name("Position");
        let mut table = SystemTable::new(1);
        let writer = add(&mut table, "writer", SystemDescriptor::new().write(position));
        let reader = add(&mut table, "reader", SystemDescriptor::new().read(position));
        add(&mut table, "idle", SystemDescriptor::new());
        rebuild(&mut table).unwrap();

        let snap = snapshot(&table);
        assert_eq!(snap.systems.len(), 3);
        assert_eq!(snap.conflicts, vec![(writer, reader)]);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["systems"][0]["name"], "writer");
    }
}
