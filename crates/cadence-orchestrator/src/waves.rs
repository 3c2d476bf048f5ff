use crate::graph::DependencyGraph;
use cadence_core::SchedulingError;
use std::collections::HashSet;

/// Layers a dependency graph into waves.
///
/// Wave *k* holds every unscheduled node whose dependencies all sit in waves
/// before *k*. Fails before anything runs when the graph has duplicate ids,
/// references an unknown id, or contains a cycle.
pub fn schedule(graph: &DependencyGraph) -> Result<Vec<Vec<String>>, SchedulingError> {
    schedule_with_completed(graph, &HashSet::new())
}

/// Like [`schedule`], but treats ids in `completed` as already satisfied.
///
/// Used on resume, where the remaining tasks may depend on work recorded in
/// the checkpoint. A dependency that is also a node of `graph` must still be
/// scheduled in an earlier wave.
pub fn schedule_with_completed(
    graph: &DependencyGraph,
    completed: &HashSet<String>,
) -> Result<Vec<Vec<String>>, SchedulingError> {
    if let Some(dup) = graph.duplicates().first() {
        return Err(SchedulingError::DuplicateTask(dup.clone()));
    }

    for id in graph.nodes() {
        for dep in graph.dependencies(id).unwrap_or_default() {
            if !graph.contains(dep) && !completed.contains(dep) {
                return Err(SchedulingError::UnknownDependency {
                    task: id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut scheduled: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&String> = graph.nodes().iter().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&String>, Vec<&String>) =
            remaining.into_iter().partition(|id| {
                graph
                    .dependencies(id)
                    .unwrap_or_default()
                    .iter()
                    .all(|dep| {
                        scheduled.contains(dep.as_str())
                            || (!graph.contains(dep) && completed.contains(dep))
                    })
            });

        if ready.is_empty() {
            let stuck: Vec<&str> = blocked.iter().copied().map(String::as_str).collect();
            return Err(SchedulingError::CircularDependency(format!(
                "Circular dependency detected involving tasks: {}",
                stuck.join(", ")
            )));
        }

        scheduled.extend(ready.iter().copied().map(String::as_str));
        waves.push(ready.into_iter().cloned().collect());
        remaining = blocked;
    }

    Ok(waves)
}
