//! DAG planner: topological sort into execution levels, plus the critical
//! path for observability.
//!
//! All tie-breaks are explicit and deterministic (priority ascending, then
//! name ascending) so planning is reproducible across runs — snapshot tests
//! and UI ordering depend on it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::{detect_cycle, StepDef};

#[derive(Error, Debug)]
#[error("Cycle detected: {}", cycle.join(" -> "))]
pub struct CycleError {
    pub cycle: Vec<String>,
}

/// Execution plan for a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Steps grouped by execution level. Level 0 has no dependencies;
    /// level N depends only on steps in levels < N. Steps within a level
    /// can run in parallel.
    pub levels: Vec<Vec<String>>,
    pub total_steps: usize,
    /// True if any level has more than one step.
    pub parallelizable: bool,
    /// Longest dependency chain, start to end.
    pub critical_path: Vec<String>,
}

/// Build an execution plan from step definitions.
pub fn build_dag(steps: &BTreeMap<String, StepDef>) -> Result<ExecutionPlan, CycleError> {
    if steps.is_empty() {
        return Ok(ExecutionPlan::default());
    }

    if let Some(cycle) = detect_cycle(steps) {
        return Err(CycleError { cycle });
    }

    let levels = compute_levels(steps);
    let critical_path = compute_critical_path(steps, &levels);
    let parallelizable = levels.iter().any(|level| level.len() > 1);

    Ok(ExecutionPlan {
        total_steps: steps.len(),
        parallelizable,
        critical_path,
        levels,
    })
}

/// (priority, name) sort key; lower priority runs first.
fn sort_key<'a>(name: &'a str, steps: &BTreeMap<String, StepDef>) -> (i64, &'a str) {
    let priority = steps.get(name).map(|s| s.priority()).unwrap_or(100);
    (priority, name)
}

/// Level = max dependency level + 1, memoized.
fn compute_levels(steps: &BTreeMap<String, StepDef>) -> Vec<Vec<String>> {
    fn level_of(
        name: &str,
        steps: &BTreeMap<String, StepDef>,
        memo: &mut BTreeMap<String, usize>,
    ) -> usize {
        if let Some(&level) = memo.get(name) {
            return level;
        }
        let level = steps
            .get(name)
            .map(|step| {
                step.depends_on
                    .iter()
                    .filter(|dep| steps.contains_key(*dep))
                    .map(|dep| level_of(dep, steps, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(name.to_string(), level);
        level
    }

    let mut memo = BTreeMap::new();
    for name in steps.keys() {
        level_of(name, steps, &mut memo);
    }

    let max_level = memo.values().copied().max().unwrap_or(0);
    let mut levels: Vec<Vec<String>> = vec![vec![]; max_level + 1];
    for (name, level) in &memo {
        levels[*level].push(name.clone());
    }
    for level in &mut levels {
        level.sort_by(|a, b| sort_key(a, steps).cmp(&sort_key(b, steps)));
    }
    levels
}

/// Longest dependency chain by DP over levels (already topological order).
/// Ties prefer lower priority, then the alphabetically earlier name.
fn compute_critical_path(
    steps: &BTreeMap<String, StepDef>,
    levels: &[Vec<String>],
) -> Vec<String> {
    if steps.is_empty() || levels.is_empty() {
        return vec![];
    }

    let mut path_length: BTreeMap<&str, usize> = BTreeMap::new();
    let mut predecessor: BTreeMap<&str, Option<&str>> = BTreeMap::new();

    // Candidate ranking: longer path first, then (priority, name) ascending.
    let better = |candidate: &str,
                  incumbent: Option<&str>,
                  path_length: &BTreeMap<&str, usize>|
     -> bool {
        let Some(incumbent) = incumbent else { return true };
        let cand_len = path_length.get(candidate).copied().unwrap_or(0);
        let inc_len = path_length.get(incumbent).copied().unwrap_or(0);
        if cand_len != inc_len {
            return cand_len > inc_len;
        }
        sort_key(candidate, steps) < sort_key(incumbent, steps)
    };

    for level in levels {
        for name in level {
            let valid_deps: Vec<&str> = steps
                .get(name)
                .map(|step| {
                    step.depends_on
                        .iter()
                        .filter(|dep| steps.contains_key(*dep))
                        .map(|dep| dep.as_str())
                        .collect()
                })
                .unwrap_or_default();

            if valid_deps.is_empty() {
                path_length.insert(name.as_str(), 1);
                predecessor.insert(name.as_str(), None);
            } else {
                let mut best: Option<&str> = None;
                for dep in valid_deps {
                    if better(dep, best, &path_length) {
                        best = Some(dep);
                    }
                }
                let best = best.expect("non-empty deps");
                path_length.insert(name.as_str(), path_length[best] + 1);
                predecessor.insert(name.as_str(), Some(best));
            }
        }
    }

    let mut end: Option<&str> = None;
    for name in steps.keys() {
        if better(name.as_str(), end, &path_length) {
            end = Some(name.as_str());
        }
    }

    let mut path = vec![];
    let mut current = end;
    while let Some(name) = current {
        path.push(name.to_string());
        current = predecessor.get(name).copied().flatten();
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(defs: &[(&str, &[&str])]) -> BTreeMap<String, StepDef> {
        defs.iter()
            .map(|(name, deps)| (name.to_string(), StepDef::new("map").with_deps(deps)))
            .collect()
    }

    #[test]
    fn empty_plan() {
        let plan = build_dag(&BTreeMap::new()).unwrap();
        assert!(plan.levels.is_empty());
        assert_eq!(plan.total_steps, 0);
        assert!(!plan.parallelizable);
        assert!(plan.critical_path.is_empty());
    }

    #[test]
    fn diamond_plan() {
        let steps = steps(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let plan = build_dag(&steps).unwrap();
        assert_eq!(
            plan.levels,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
        assert_eq!(plan.total_steps, 4);
        assert!(plan.parallelizable);
        // Tie between a→b→d and a→c→d breaks alphabetically: b wins.
        assert_eq!(plan.critical_path, vec!["a", "b", "d"]);
    }

    #[test]
    fn linear_chain_not_parallelizable() {
        let steps = steps(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let plan = build_dag(&steps).unwrap();
        assert_eq!(plan.levels.len(), 3);
        assert!(!plan.parallelizable);
        assert_eq!(plan.critical_path, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let steps = steps(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        let err = build_dag(&steps).unwrap_err();
        assert_eq!(err.cycle.first(), err.cycle.last());
        assert_eq!(err.cycle.len(), 4);
    }

    #[test]
    fn priority_orders_within_level() {
        let mut map = BTreeMap::new();
        map.insert("zeta".to_string(), {
            let mut s = StepDef::new("map");
            s.config = serde_json::json!({"priority": 1});
            s
        });
        map.insert("alpha".to_string(), StepDef::new("map"));
        let plan = build_dag(&map).unwrap();
        // zeta has priority 1, alpha default 100 — zeta first despite the name.
        assert_eq!(plan.levels[0], vec!["zeta".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn independent_steps_are_one_level() {
        let steps = steps(&[("a", &[]), ("b", &[]), ("c", &[])]);
        let plan = build_dag(&steps).unwrap();
        assert_eq!(plan.levels.len(), 1);
        assert_eq!(plan.levels[0].len(), 3);
        assert!(plan.parallelizable);
        assert_eq!(plan.critical_path, vec!["a"]);
    }

    #[test]
    fn deep_chain_beats_wide_level() {
        let steps = steps(&[
            ("root", &[]),
            ("w1", &["root"]),
            ("w2", &["root"]),
            ("deep1", &["root"]),
            ("deep2", &["deep1"]),
            ("deep3", &["deep2"]),
        ]);
        let plan = build_dag(&steps).unwrap();
        assert_eq!(plan.critical_path, vec!["root", "deep1", "deep2", "deep3"]);
    }
}
