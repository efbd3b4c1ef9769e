use std::collections::{BTreeSet, HashMap};

use crate::db::types::NodeState;
use crate::services::graph::Graph;

/// Nodes the student may currently work on: every prerequisite must be
/// `done`. Prerequisites pointing outside the graph count as unsatisfied
/// (validation rejects them at publish time; this is the runtime backstop).
pub(crate) fn compute_unlocked(
    graph: &Graph,
    states: &HashMap<String, NodeState>,
) -> BTreeSet<String> {
    graph
        .nodes()
        .iter()
        .filter(|node| {
            node.prerequisites.iter().all(|reference| {
                graph.contains(reference) && states.get(reference) == Some(&NodeState::Done)
            })
        })
        .map(|node| node.slug.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::graph::{GraphDefinition, NodeDef, NodeKind};

    fn graph(nodes: &[(&str, &[&str])]) -> Graph {
        let nodes = nodes
            .iter()
            .map(|(slug, prerequisites)| NodeDef {
                slug: slug.to_string(),
                title: slug.to_string(),
                module_key: None,
                points: 0,
                prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
                kind: NodeKind::Milestone,
                requirements: None,
            })
            .collect();
        Graph::build(GraphDefinition { phases: Vec::new(), nodes }).expect("graph")
    }

    fn states(pairs: &[(&str, NodeState)]) -> HashMap<String, NodeState> {
        pairs.iter().map(|(slug, state)| (slug.to_string(), *state)).collect()
    }

    #[test]
    fn roots_are_always_unlocked() {
        let graph = graph(&[("a", &[]), ("b", &["a"])]);
        let unlocked = compute_unlocked(&graph, &HashMap::new());
        assert!(unlocked.contains("a"));
        assert!(!unlocked.contains("b"));
    }

    #[test]
    fn needs_changes_does_not_unlock_dependents() {
        let graph = graph(&[("n1", &[]), ("n2", &["n1"])]);

        let blocked = compute_unlocked(&graph, &states(&[("n1", NodeState::NeedsChanges)]));
        assert!(!blocked.contains("n2"));

        let open = compute_unlocked(&graph, &states(&[("n1", NodeState::Done)]));
        assert!(open.contains("n2"));
    }

    #[test]
    fn all_prerequisites_must_be_done() {
        let graph = graph(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
        let partial = compute_unlocked(&graph, &states(&[("a", NodeState::Done)]));
        assert!(!partial.contains("c"));

        let complete = compute_unlocked(
            &graph,
            &states(&[("a", NodeState::Done), ("b", NodeState::Done)]),
        );
        assert!(complete.contains("c"));
    }

    #[test]
    fn unlocking_is_monotonic_as_nodes_complete() {
        let graph = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

        let mut progress = HashMap::new();
        let mut previous = compute_unlocked(&graph, &progress);

        for slug in ["a", "b", "c"] {
            progress.insert(slug.to_string(), NodeState::Done);
            let next = compute_unlocked(&graph, &progress);
            assert!(previous.is_subset(&next), "marking {slug} done removed an unlocked node");
            previous = next;
        }
    }
}
