//! Critical path of a workflow
//!
//! The critical path is the longest chain of dependent tasks, measured from
//! the start of its first task to the end of its last one, so queue gaps
//! between dependent tasks count towards its length.
//!
//! # Algorithm: Longest Path via Dynamic Programming
//!
//! ```text
//! 1. Topological order of tasks (Kahn, discovery order)
//! 2. For each task t in reverse topological order:
//!    len[t] = runtime(t) + max over children c of (gap(t, c) + len[c])
//! 3. Critical path = root with maximum len, following the chosen children
//! ```
//!
//! Ties keep the first candidate in discovery order. The iteration never
//! recurses, so deep workflows cannot overflow the stack.

use super::workflows::TaskTracker;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Longest dependency chain of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Stage ids from root to leaf
    pub stages: Vec<String>,
    /// First task start to last task end along the path
    pub length: i64,
    /// Sum of task runtimes on the path
    pub compute: i64,
    /// Sum of queue gaps between consecutive tasks on the path
    pub gaps: i64,
}

impl CriticalPath {
    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }
}

/// Find the critical path of a set of tasks linked by `dependencies_to`.
///
/// Every task must have run. Returns `None` for an empty set or when the
/// dependencies form a cycle.
pub fn find_critical_path(tasks: &[TaskTracker]) -> Option<CriticalPath> {
    let n = tasks.len();
    if n == 0 {
        return None;
    }

    let mut indegree = vec![0usize; n];
    for task in tasks {
        for &child in &task.dependencies_to {
            indegree[child] += 1;
        }
    }
    let roots: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();

    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &child in &tasks[i].dependencies_to {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }
    if order.len() < n {
        return None;
    }

    let mut len = vec![0i64; n];
    let mut next: Vec<Option<(usize, i64)>> = vec![None; n];
    for &i in order.iter().rev() {
        let task = &tasks[i];
        let mut best: Option<(i64, usize, i64)> = None;
        for &child in &task.dependencies_to {
            let gap = (tasks[child].start() - task.end()).max(0);
            let candidate = gap + len[child];
            if best.map_or(true, |(b, _, _)| candidate > b) {
                best = Some((candidate, child, gap));
            }
        }
        len[i] = task.runtime() + best.map_or(0, |(b, _, _)| b);
        next[i] = best.map(|(_, child, gap)| (child, gap));
    }

    let mut root = roots[0];
    for &r in &roots[1..] {
        if len[r] > len[root] {
            root = r;
        }
    }

    let mut path = CriticalPath {
        stages: Vec::new(),
        length: len[root],
        compute: 0,
        gaps: 0,
    };
    let mut current = Some(root);
    while let Some(i) = current {
        path.stages.push(tasks[i].stage_id().to_string());
        path.compute += tasks[i].runtime();
        current = next[i].map(|(child, gap)| {
            path.gaps += gap;
            child
        });
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(stage: &str, start: i64, end: i64, children: &[usize]) -> TaskTracker {
        let mut t = TaskTracker::for_test(stage, start, end);
        t.dependencies_to = children.to_vec();
        t
    }

    #[test]
    fn test_single_task() {
        let path = find_critical_path(&[task("S0", 10, 40, &[])]).unwrap();
        assert_eq!(path.stages, vec!["S0"]);
        assert_eq!((path.length, path.compute, path.gaps), (30, 30, 0));
    }

    #[test]
    fn test_diamond_through_first_branch() {
        // S0 -> {S1, S2} -> S3; with gaps counted both branches end at S3's
        // end, so the first discovered child is kept
        let tasks = vec![
            task("S0", 0, 100, &[1, 2]),
            task("S1", 100, 300, &[3]),
            task("S2", 150, 200, &[3]),
            task("S3", 310, 400, &[]),
        ];
        let path = find_critical_path(&tasks).unwrap();
        assert_eq!(path.stages, vec!["S0", "S1", "S3"]);
        assert_eq!(path.length, 400);
        assert_eq!(path.compute, 390);
        assert_eq!(path.gaps, 10);
        assert!(path.contains("S1"));
        assert!(!path.contains("S2"));
    }

    #[test]
    fn test_ties_keep_first_discovered() {
        let tasks = vec![
            task("A", 0, 10, &[1, 2]),
            task("B", 10, 20, &[]),
            task("C", 10, 20, &[]),
        ];
        let path = find_critical_path(&tasks).unwrap();
        assert_eq!(path.stages, vec!["A", "B"]);
    }

    #[test]
    fn test_multiple_roots_longest_wins() {
        let tasks = vec![
            task("R0", 5, 50, &[2]),
            task("R1", 0, 10, &[2]),
            task("L", 60, 70, &[]),
        ];
        let path = find_critical_path(&tasks).unwrap();
        // R1: 10 + gap 50 + 10 = 70 beats R0: 45 + 10 + 10
        assert_eq!(path.stages, vec!["R1", "L"]);
        assert_eq!(path.length, 70);
        assert_eq!(path.gaps, 50);
    }

    #[test]
    fn test_cycle_and_empty() {
        let tasks = vec![task("A", 0, 1, &[1]), task("B", 1, 2, &[0])];
        assert!(find_critical_path(&tasks).is_none());
        assert!(find_critical_path(&[]).is_none());
    }
}
