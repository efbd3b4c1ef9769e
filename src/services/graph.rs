use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::types::SlotMultiplicity;
use crate::services::conditions::Condition;

/// Synthetic phase nodes fall back to when their `module_key` does not match
/// any declared phase.
pub(crate) const DEFAULT_PHASE_KEY: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GraphDefinition {
    #[serde(default)]
    pub(crate) phases: Vec<PhaseDef>,
    pub(crate) nodes: Vec<NodeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PhaseDef {
    pub(crate) key: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) order: i32,
    #[serde(default)]
    pub(crate) color: Option<String>,
    #[serde(default)]
    pub(crate) condition: Option<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeDef {
    pub(crate) slug: String,
    pub(crate) title: String,
    #[serde(default, alias = "moduleKey")]
    pub(crate) module_key: Option<String>,
    #[serde(default)]
    pub(crate) points: i32,
    #[serde(default)]
    pub(crate) prerequisites: Vec<String>,
    #[serde(flatten)]
    pub(crate) kind: NodeKind,
    #[serde(default)]
    pub(crate) requirements: Option<Requirements>,
}

/// Node behavior is dispatched on `type`; the `config` payload shape is owned
/// by the variant, so interpreting code matches exhaustively instead of
/// probing an untyped blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub(crate) enum NodeKind {
    Course { course_id: String },
    Form { fields: Vec<FormFieldDef> },
    Checklist { items: Vec<String> },
    Milestone,
    Payment { amount_cents: i64, currency: String },
    Approval,
    Meeting { calendar_link: Option<String> },
    Survey { survey_id: String },
    SyncOps,
    Info { body: Option<String> },
    #[serde(rename = "confirmTask")]
    ConfirmTask,
    Assessment { assessment_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FormFieldDef {
    pub(crate) key: String,
    #[serde(default)]
    pub(crate) label: Option<String>,
    #[serde(default)]
    pub(crate) required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Requirements {
    #[serde(default)]
    pub(crate) uploads: Vec<UploadSlotDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UploadSlotDef {
    pub(crate) key: String,
    #[serde(default)]
    pub(crate) required: bool,
    #[serde(default = "default_multiplicity")]
    pub(crate) multiplicity: SlotMultiplicity,
    #[serde(default)]
    pub(crate) mime: Vec<String>,
}

fn default_multiplicity() -> SlotMultiplicity {
    SlotMultiplicity::Single
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum GraphError {
    #[error("graph has no nodes")]
    Empty,
    #[error("duplicate node slug: {0}")]
    DuplicateSlug(String),
    #[error("node '{node}' references unknown prerequisite '{reference}'")]
    UnknownPrerequisite { node: String, reference: String },
    #[error("prerequisite cycle detected through node '{0}'")]
    Cycle(String),
}

/// Validated program graph: nodes live in an arena indexed by position, with
/// prerequisite edges resolved to indices up front.
#[derive(Debug, Clone)]
pub(crate) struct Graph {
    def: GraphDefinition,
    index: HashMap<String, usize>,
    prereq_edges: Vec<Vec<usize>>,
}

impl Graph {
    /// Builds and validates in one pass: duplicate slugs, dangling
    /// prerequisite references and cycles all reject the graph.
    pub(crate) fn build(def: GraphDefinition) -> Result<Self, GraphError> {
        if def.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(def.nodes.len());
        for (position, node) in def.nodes.iter().enumerate() {
            if index.insert(node.slug.clone(), position).is_some() {
                return Err(GraphError::DuplicateSlug(node.slug.clone()));
            }
        }

        let mut prereq_edges = Vec::with_capacity(def.nodes.len());
        for node in &def.nodes {
            let mut edges = Vec::with_capacity(node.prerequisites.len());
            for reference in &node.prerequisites {
                let Some(&target) = index.get(reference) else {
                    return Err(GraphError::UnknownPrerequisite {
                        node: node.slug.clone(),
                        reference: reference.clone(),
                    });
                };
                edges.push(target);
            }
            prereq_edges.push(edges);
        }

        let graph = Self { def, index, prereq_edges };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub(crate) fn definition(&self) -> &GraphDefinition {
        &self.def
    }

    pub(crate) fn nodes(&self) -> &[NodeDef] {
        &self.def.nodes
    }

    pub(crate) fn phases(&self) -> &[PhaseDef] {
        &self.def.phases
    }

    pub(crate) fn node(&self, slug: &str) -> Option<&NodeDef> {
        self.index.get(slug).map(|&position| &self.def.nodes[position])
    }

    pub(crate) fn contains(&self, slug: &str) -> bool {
        self.index.contains_key(slug)
    }

    pub(crate) fn prerequisites_of(&self, slug: &str) -> &[String] {
        self.node(slug).map(|node| node.prerequisites.as_slice()).unwrap_or(&[])
    }

    /// Phase key a node renders under; unknown module keys collapse into the
    /// synthetic default phase rather than erroring.
    pub(crate) fn phase_key_for<'a>(&self, node: &'a NodeDef) -> &'a str {
        match &node.module_key {
            Some(key) if self.def.phases.iter().any(|phase| &phase.key == key) => key,
            _ => DEFAULT_PHASE_KEY,
        }
    }

    // DFS coloring over the prerequisite adjacency: white unvisited, gray on
    // the current path, black finished. A gray hit is a back edge.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors = vec![Color::White; self.def.nodes.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.def.nodes.len() {
            if colors[start] != Color::White {
                continue;
            }

            colors[start] = Color::Gray;
            stack.push((start, 0));

            while let Some(&mut (node, ref mut edge)) = stack.last_mut() {
                if *edge < self.prereq_edges[node].len() {
                    let next = self.prereq_edges[node][*edge];
                    *edge += 1;
                    match colors[next] {
                        Color::White => {
                            colors[next] = Color::Gray;
                            stack.push((next, 0));
                        }
                        Color::Gray => {
                            return Err(GraphError::Cycle(self.def.nodes[next].slug.clone()));
                        }
                        Color::Black => {}
                    }
                } else {
                    colors[node] = Color::Black;
                    stack.pop();
                }
            }
        }

        Ok(())
    }
}

/// Form fields a student must populate before a node can be submitted.
pub(crate) fn required_form_fields(node: &NodeDef) -> Vec<String> {
    match &node.kind {
        NodeKind::Form { fields } => fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.key.clone())
            .collect(),
        NodeKind::Course { .. }
        | NodeKind::Checklist { .. }
        | NodeKind::Milestone
        | NodeKind::Payment { .. }
        | NodeKind::Approval
        | NodeKind::Meeting { .. }
        | NodeKind::Survey { .. }
        | NodeKind::SyncOps
        | NodeKind::Info { .. }
        | NodeKind::ConfirmTask
        | NodeKind::Assessment { .. } => Vec::new(),
    }
}

/// Assessment id a node points at, when it is an assessment node.
pub(crate) fn assessment_id(node: &NodeDef) -> Option<&str> {
    match &node.kind {
        NodeKind::Assessment { assessment_id } => Some(assessment_id),
        _ => None,
    }
}

pub(crate) fn parse_definition(raw: &serde_json::Value) -> Result<GraphDefinition, String> {
    serde_json::from_value(raw.clone()).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(slug: &str, prerequisites: &[&str]) -> NodeDef {
        NodeDef {
            slug: slug.to_string(),
            title: slug.to_uppercase(),
            module_key: None,
            points: 0,
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
            kind: NodeKind::Milestone,
            requirements: None,
        }
    }

    fn definition(nodes: Vec<NodeDef>) -> GraphDefinition {
        GraphDefinition { phases: Vec::new(), nodes }
    }

    #[test]
    fn builds_linear_chain() {
        let graph =
            Graph::build(definition(vec![node("a", &[]), node("b", &["a"]), node("c", &["b"])]))
                .expect("graph");
        assert_eq!(graph.prerequisites_of("c"), &["b".to_string()]);
        assert!(graph.contains("a"));
        assert!(!graph.contains("z"));
    }

    #[test]
    fn rejects_duplicate_slug() {
        let err = Graph::build(definition(vec![node("a", &[]), node("a", &[])])).unwrap_err();
        assert_eq!(err, GraphError::DuplicateSlug("a".to_string()));
    }

    #[test]
    fn rejects_unknown_prerequisite() {
        let err = Graph::build(definition(vec![node("a", &["ghost"])])).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownPrerequisite {
                node: "a".to_string(),
                reference: "ghost".to_string()
            }
        );
    }

    #[test]
    fn rejects_two_node_cycle() {
        let err = Graph::build(definition(vec![node("a", &["b"]), node("b", &["a"])])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn rejects_self_cycle() {
        let err = Graph::build(definition(vec![node("a", &["a"])])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn accepts_diamond() {
        let graph = Graph::build(definition(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ]));
        assert!(graph.is_ok());
    }

    #[test]
    fn rejects_empty_graph() {
        assert_eq!(Graph::build(definition(vec![])).unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn unknown_module_key_falls_back_to_default_phase() {
        let mut with_module = node("a", &[]);
        with_module.module_key = Some("missing-phase".to_string());
        let graph = Graph::build(definition(vec![with_module])).expect("graph");
        assert_eq!(graph.phase_key_for(&graph.nodes()[0]), DEFAULT_PHASE_KEY);
    }

    #[test]
    fn parses_tagged_node_config() {
        let raw = serde_json::json!({
            "phases": [{"key": "p1", "title": "Phase 1", "order": 1}],
            "nodes": [
                {
                    "slug": "intake-form",
                    "title": "Intake form",
                    "module_key": "p1",
                    "type": "form",
                    "config": {"fields": [{"key": "topic", "required": true}]}
                },
                {
                    "slug": "qualifying-exam",
                    "title": "Qualifying exam",
                    "type": "assessment",
                    "config": {"assessment_id": "asmt-1"},
                    "prerequisites": ["intake-form"]
                },
                {"slug": "kickoff", "title": "Kickoff", "type": "milestone"}
            ]
        });

        let def = parse_definition(&raw).expect("definition");
        let graph = Graph::build(def).expect("graph");

        let form = graph.node("intake-form").expect("form node");
        assert_eq!(required_form_fields(form), vec!["topic".to_string()]);

        let exam = graph.node("qualifying-exam").expect("exam node");
        assert_eq!(assessment_id(exam), Some("asmt-1"));
        assert_eq!(assessment_id(graph.node("kickoff").unwrap()), None);
    }

    #[test]
    fn rejects_unknown_node_type() {
        let raw = serde_json::json!({
            "nodes": [{"slug": "a", "title": "A", "type": "hologram"}]
        });
        assert!(parse_definition(&raw).is_err());
    }
}
