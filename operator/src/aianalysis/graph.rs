use kubernaut_types::WorkflowStep;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphError {
    /// The dependency graph contains a cycle; `path` is a closed loop
    /// `a → b → … → a` for operator debugging.
    Cycle { path: String },
    UnknownDependency { step: String, depends_on: String },
    SelfDependency { step: String },
    DuplicateId { id: String },
}

impl GraphError {
    /// The cycle path if this error is a cycle.
    pub fn cycle_path(&self) -> Option<&str> {
        match self {
            GraphError::Cycle { path } => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Cycle { path } => write!(f, "dependency cycle: {}", path),
            GraphError::UnknownDependency { step, depends_on } => write!(
                f,
                "step '{}' depends on unknown step '{}'",
                step, depends_on
            ),
            GraphError::SelfDependency { step } => {
                write!(f, "step '{}' depends on itself", step)
            }
            GraphError::DuplicateId { id } => write!(f, "duplicate step id '{}'", id),
        }
    }
}

/// Validates that the recommended workflow's dependency graph is a DAG.
/// Returns a topological order on success. Deterministic for a given
/// input: ready steps are processed in lexicographic order.
pub fn validate_dependencies(steps: &[WorkflowStep]) -> Result<Vec<String>, GraphError> {
    let mut ids: BTreeSet<&str> = BTreeSet::new();
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(GraphError::DuplicateId {
                id: step.id.clone(),
            });
        }
    }

    // Edges run dependency → dependent; in-degree counts unmet
    // dependencies.
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = steps.iter().map(|s| (s.id.as_str(), 0)).collect();
    for step in steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(GraphError::SelfDependency {
                    step: step.id.clone(),
                });
            }
            if !ids.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    step: step.id.clone(),
                    depends_on: dep.clone(),
                });
            }
            dependents.entry(dep.as_str()).or_default().push(&step.id);
            *in_degree.get_mut(step.id.as_str()).unwrap() += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten().copied() {
            let d = in_degree.get_mut(dependent).unwrap();
            *d -= 1;
            if *d == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < steps.len() {
        return Err(GraphError::Cycle {
            path: recover_cycle(steps, &order),
        });
    }
    Ok(order)
}

/// Recovers one concrete cycle from the steps Kahn could not process, by
/// walking dependsOn edges until a step repeats.
fn recover_cycle(steps: &[WorkflowStep], processed: &[String]) -> String {
    let processed: BTreeSet<&str> = processed.iter().map(String::as_str).collect();
    let by_id: BTreeMap<&str, &WorkflowStep> =
        steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut remaining: Vec<&str> = steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| !processed.contains(id))
        .collect();
    remaining.sort_unstable();

    let start = remaining.first().copied().unwrap_or_default();
    let mut path: Vec<&str> = vec![start];
    let mut seen: BTreeSet<&str> = BTreeSet::from([start]);
    let mut current = start;
    loop {
        // Follow the first unprocessed dependency; within the leftover
        // set every step has at least one.
        let Some(next) = by_id
            .get(current)
            .into_iter()
            .flat_map(|s| s.depends_on.iter())
            .map(String::as_str)
            .find(|dep| !processed.contains(dep))
        else {
            break;
        };
        if !seen.insert(next) {
            // Trim the lead-in so the path starts and ends at the repeat.
            let pos = path.iter().position(|id| *id == next).unwrap_or(0);
            path.drain(..pos);
            path.push(next);
            return path.join(" → ");
        }
        path.push(next);
        current = next;
    }
    path.join(" → ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            action: format!("action-{id}"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            parameters: Default::default(),
        }
    }

    #[test]
    fn two_step_cycle_reports_both_ids() {
        let steps = vec![step("rec-001", &["rec-002"]), step("rec-002", &["rec-001"])];
        let err = validate_dependencies(&steps).unwrap_err();
        let path = err.cycle_path().expect("cycle");
        assert!(path.contains("rec-001"), "path: {path}");
        assert!(path.contains("rec-002"), "path: {path}");
        // Closed loop: first and last entries match.
        let parts: Vec<&str> = path.split(" → ").collect();
        assert_eq!(parts.first(), parts.last());
    }

    #[test]
    fn diamond_is_valid_and_ordered() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        let order = validate_dependencies(&steps).expect("acyclic");
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let steps = vec![step("a", &["ghost"])];
        assert_eq!(
            validate_dependencies(&steps).unwrap_err(),
            GraphError::UnknownDependency {
                step: "a".to_string(),
                depends_on: "ghost".to_string()
            }
        );
    }

    #[test]
    fn self_dependency_is_rejected() {
        let steps = vec![step("a", &["a"])];
        assert_eq!(
            validate_dependencies(&steps).unwrap_err(),
            GraphError::SelfDependency {
                step: "a".to_string()
            }
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let steps = vec![step("a", &[]), step("a", &[])];
        assert_eq!(
            validate_dependencies(&steps).unwrap_err(),
            GraphError::DuplicateId {
                id: "a".to_string()
            }
        );
    }

    #[test]
    fn empty_input_is_trivially_valid() {
        assert_eq!(validate_dependencies(&[]).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn order_respects_every_edge() {
        let steps = vec![
            step("fetch", &[]),
            step("scale", &["fetch"]),
            step("verify", &["scale", "fetch"]),
            step("notify", &["verify"]),
        ];
        let order = validate_dependencies(&steps).expect("acyclic");
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        for s in &steps {
            for dep in &s.depends_on {
                assert!(pos(dep) < pos(&s.id), "{dep} must precede {}", s.id);
            }
        }
    }

    #[test]
    fn large_chain_validates_quickly() {
        let mut steps = vec![step("s0", &[])];
        for i in 1..150 {
            let prev = format!("s{}", i - 1);
            steps.push(step(&format!("s{i}"), &[prev.as_str()]));
        }
        let start = std::time::Instant::now();
        let order = validate_dependencies(&steps).expect("acyclic");
        assert_eq!(order.len(), 150);
        assert!(
            start.elapsed() < std::time::Duration::from_millis(100),
            "took {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn cycle_buried_in_a_valid_prefix() {
        let steps = vec![
            step("setup", &[]),
            step("x", &["setup", "z"]),
            step("y", &["x"]),
            step("z", &["y"]),
        ];
        let err = validate_dependencies(&steps).unwrap_err();
        let path = err.cycle_path().expect("cycle");
        for id in ["x", "y", "z"] {
            assert!(path.contains(id), "path: {path}");
        }
        assert!(!path.contains("setup"), "path: {path}");
    }
}
