use crate::types::TaskDescriptor;
use std::collections::HashMap;

/// Adjacency map from agent id to its prerequisite ids.
///
/// Keeps submission order so waves list their tasks the way they were
/// submitted. Edge targets are stored verbatim; dangling references, cycles
/// and duplicate ids are left for the scheduler to reject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    order: Vec<String>,
    edges: HashMap<String, Vec<String>>,
    duplicates: Vec<String>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. A repeated id is remembered as a duplicate and does not
    /// replace the first node's edges.
    pub fn insert(&mut self, id: impl Into<String>, depends_on: Vec<String>) {
        let id = id.into();
        if self.edges.contains_key(&id) {
            self.duplicates.push(id);
            return;
        }
        self.order.push(id.clone());
        self.edges.insert(id, depends_on);
    }

    /// Node ids in submission order.
    pub fn nodes(&self) -> &[String] {
        &self.order
    }

    /// Prerequisites of `id`, or `None` if it is not in the graph.
    pub fn dependencies(&self, id: &str) -> Option<&[String]> {
        self.edges.get(id).map(Vec::as_slice)
    }

    /// Whether `id` is a node.
    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    /// Ids submitted more than once.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// Number of distinct nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builds the dependency graph for a task list.
///
/// Each task gets its explicit `agent_id` or `task_<index>` from its input
/// position, mapped to its `depends_on` list as given.
pub fn build_graph(tasks: &[TaskDescriptor]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for (index, task) in tasks.iter().enumerate() {
        graph.insert(task.resolved_id(index), task.depends_on.clone());
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let graph = build_graph(&[]);
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
    }

    #[test]
    fn test_ids_synthesized_from_position() {
        let tasks = vec![
            TaskDescriptor::new("spec", "write spec"),
            TaskDescriptor::new("coder", "implement").with_id("impl"),
            TaskDescriptor::new("tester", "test"),
        ];
        let graph = build_graph(&tasks);
        assert_eq!(graph.nodes(), ["task_0", "impl", "task_2"]);
    }

    #[test]
    fn test_edges_kept_verbatim() {
        let tasks = vec![
            TaskDescriptor::new("coder", "implement")
                .with_id("impl")
                .with_dependencies(["spec", "ghost", "spec"]),
            TaskDescriptor::new("spec", "write spec").with_id("spec"),
        ];
        let graph = build_graph(&tasks);
        assert_eq!(
            graph.dependencies("impl").unwrap(),
            ["spec", "ghost", "spec"]
        );
        assert!(graph.dependencies("spec").unwrap().is_empty());
        assert!(graph.dependencies("ghost").is_none());
    }

    #[test]
    fn test_duplicate_ids_recorded() {
        let tasks = vec![
            TaskDescriptor::new("coder", "first").with_id("x"),
            TaskDescriptor::new("coder", "second")
                .with_id("x")
                .with_dependencies(["y"]),
        ];
        let graph = build_graph(&tasks);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.duplicates(), ["x"]);
        assert!(graph.dependencies("x").unwrap().is_empty());
    }
}
