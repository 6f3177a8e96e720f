//! Dependency graph resolution
//!
//! Kahn layering over the `depends_on` edges of the active service set.
//! Each batch only depends on earlier batches, so everything inside one
//! batch can start concurrently.

use super::config::ServiceSpec;
use crate::error::{BosunError, Result};
use std::collections::{HashMap, HashSet};

/// Compute start batches for the active services.
///
/// Every dependency of a service in batch *k* lives in a batch before *k*.
/// Within a batch, declaration order is preserved so the result is
/// deterministic. Fails with [`BosunError::UnknownDependency`] when an edge
/// points outside the active set (e.g. a dependency excluded by profile
/// filtering) and [`BosunError::CycleDetected`] when no layering exists.
pub fn compute_start_order(active: &[ServiceSpec]) -> Result<Vec<Vec<String>>> {
    let index: HashMap<&str, usize> = active
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    // indegree per service, and reverse adjacency: dep -> dependents
    let mut indegree: Vec<usize> = vec![0; active.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); active.len()];

    for (i, service) in active.iter().enumerate() {
        for dep in &service.depends_on {
            let Some(&j) = index.get(dep.service.as_str()) else {
                return Err(BosunError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dep.service.clone(),
                });
            };
            indegree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut batches = Vec::new();
    let mut placed = 0usize;
    let mut ready: Vec<usize> = (0..active.len()).filter(|&i| indegree[i] == 0).collect();

    while !ready.is_empty() {
        ready.sort_unstable(); // declaration order within the batch
        let batch: Vec<String> = ready.iter().map(|&i| active[i].name.clone()).collect();
        placed += batch.len();

        let mut next = Vec::new();
        for &i in &ready {
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        batches.push(batch);
        ready = next;
    }

    if placed < active.len() {
        // Everything left has a positive indegree: part of (or downstream
        // of) a cycle. Narrow to the actual cycle members.
        let leftover: HashSet<usize> = (0..active.len()).filter(|&i| indegree[i] > 0).collect();
        let members = cycle_members(active, &leftover);
        return Err(BosunError::CycleDetected(members));
    }

    Ok(batches)
}

/// Reduce the leftover set to services that sit on a cycle: repeatedly
/// drop nodes with no remaining in-set successor or no in-set predecessor.
/// What survives has both, i.e. lies on a cycle.
fn cycle_members(active: &[ServiceSpec], leftover: &HashSet<usize>) -> Vec<String> {
    let index: HashMap<&str, usize> = active
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let deps_in_set = |i: usize, set: &HashSet<usize>| {
        active[i].depends_on.iter().any(|d| {
            index
                .get(d.service.as_str())
                .map(|j| set.contains(j))
                .unwrap_or(false)
        })
    };
    // a self-loop makes a node its own predecessor and successor
    let dependents_in_set = |i: usize, set: &HashSet<usize>| {
        set.iter().any(|&k| {
            active[k]
                .depends_on
                .iter()
                .any(|d| index.get(d.service.as_str()) == Some(&i))
        })
    };

    let mut set: HashSet<usize> = leftover.clone();
    loop {
        let dropped: Vec<usize> = set
            .iter()
            .copied()
            .filter(|&i| !deps_in_set(i, &set) || !dependents_in_set(i, &set))
            .collect();
        if dropped.is_empty() {
            break;
        }
        for i in dropped {
            set.remove(&i);
        }
    }

    let mut members: Vec<String> = set.into_iter().map(|i| active[i].name.clone()).collect();
    members.sort();
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::config::{Dependency, DependsCondition};

    fn spec(name: &str, deps: &[(&str, DependsCondition)]) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            profile: None,
            image: None,
            command: vec!["true".to_string()],
            working_dir: None,
            environment: Default::default(),
            ports: Vec::new(),
            volumes: Vec::new(),
            depends_on: deps
                .iter()
                .map(|(s, c)| Dependency {
                    service: s.to_string(),
                    condition: *c,
                })
                .collect(),
            health_check: None,
            stop_grace: None,
        }
    }

    #[test]
    fn test_web_stack_batches() {
        use DependsCondition::*;
        let services = vec![
            spec("db", &[]),
            spec("cache", &[]),
            spec("backend", &[("db", Healthy), ("cache", Started)]),
            spec("frontend", &[("backend", Healthy)]),
        ];

        let batches = compute_start_order(&services).unwrap();
        assert_eq!(
            batches,
            vec![
                vec!["db".to_string(), "cache".to_string()],
                vec!["backend".to_string()],
                vec!["frontend".to_string()],
            ]
        );
    }

    #[test]
    fn test_dependency_before_dependent() {
        use DependsCondition::*;
        let services = vec![
            spec("e", &[("d", Started)]),
            spec("d", &[("c", Healthy), ("a", Started)]),
            spec("c", &[("a", Started)]),
            spec("a", &[]),
        ];

        let batches = compute_start_order(&services).unwrap();
        let batch_of = |name: &str| {
            batches
                .iter()
                .position(|b| b.iter().any(|s| s == name))
                .unwrap()
        };

        for service in &services {
            for dep in &service.depends_on {
                assert!(
                    batch_of(&dep.service) < batch_of(&service.name),
                    "{} must precede {}",
                    dep.service,
                    service.name
                );
            }
        }
    }

    #[test]
    fn test_cycle_detected_with_members() {
        use DependsCondition::*;
        let services = vec![
            spec("a", &[("b", Healthy)]),
            spec("b", &[("c", Healthy)]),
            spec("c", &[("a", Healthy)]),
            spec("standalone", &[]),
            spec("downstream", &[("a", Started)]),
        ];

        match compute_start_order(&services).unwrap_err() {
            BosunError::CycleDetected(members) => {
                // downstream is blocked by the cycle but is not part of it
                assert_eq!(members, vec!["a", "b", "c"]);
            }
            other => panic!("expected CycleDetected, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_reports_itself() {
        use DependsCondition::*;
        let services = vec![spec("a", &[("a", Started)]), spec("b", &[])];

        match compute_start_order(&services).unwrap_err() {
            BosunError::CycleDetected(members) => {
                assert_eq!(members, vec!["a"]);
            }
            other => panic!("expected CycleDetected, got {other}"),
        }
    }

    #[test]
    fn test_unknown_dependency_in_active_set() {
        use DependsCondition::*;
        // "adminer" exists in the stack but was filtered out by profiles
        let services = vec![spec("web", &[("adminer", Started)])];

        match compute_start_order(&services).unwrap_err() {
            BosunError::UnknownDependency {
                service,
                dependency,
            } => {
                assert_eq!(service, "web");
                assert_eq!(dependency, "adminer");
            }
            other => panic!("expected UnknownDependency, got {other}"),
        }
    }

    #[test]
    fn test_empty_input() {
        let batches = compute_start_order(&[]).unwrap();
        assert!(batches.is_empty());
    }
}
