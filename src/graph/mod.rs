//! Dependency graph analysis for task sets.
//!
//! Pure functions over a task snapshot:
//! - `validate`: cycles, dangling references, self-dependencies, warnings
//! - `partition`: ready/blocked split of `todo` tasks in scheduling order
//! - `metrics`: per-task dependency depth and the critical path
//!
//! The analyzer never fails on malformed input. Validation problems are
//! reported as structured data and a best-effort ready/blocked partition is
//! always produced, so the scheduler can keep making progress on the acyclic
//! portion of the graph.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::task::{Task, TaskStatus};

/// A dependency reference pointing at an id absent from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingDependency {
    pub task_id: String,
    pub dependency_id: String,
}

/// Structured validation verdict for a task snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphValidation {
    pub valid: bool,
    /// Each cycle as an ordered list of task titles (id when untitled),
    /// from the first repeated node back to itself.
    pub cycles: Vec<Vec<String>>,
    pub dangling: Vec<DanglingDependency>,
    /// Ids of tasks listing themselves as a dependency.
    pub self_dependencies: Vec<String>,
    pub warnings: Vec<String>,
}

/// Ready/blocked partition of the `todo` tasks in a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReadyPartition {
    /// Tasks eligible for dispatch, in scheduling order: priority descending,
    /// then dependency depth ascending, ties by insertion order.
    pub ready: Vec<Task>,
    /// `todo` tasks with at least one unfinished dependency, insertion order.
    pub blocked: Vec<Task>,
}

/// Depth and critical-path metrics for a snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphMetrics {
    /// Dependency depth per task id (0 = no dependencies in the snapshot).
    pub depths: HashMap<String, usize>,
    /// Longest dependency chain, ordered from root to leaf, as task ids.
    pub critical_path: Vec<String>,
    pub max_fan_out: usize,
}

const FAN_OUT_WARNING_THRESHOLD: usize = 5;
const DEPTH_WARNING_THRESHOLD: usize = 10;

fn index_by_id(tasks: &[Task]) -> HashMap<&str, &Task> {
    tasks.iter().map(|t| (t.id.as_str(), t)).collect()
}

fn display_name(task: &Task) -> String {
    if task.title.is_empty() {
        task.id.clone()
    } else {
        task.title.clone()
    }
}

/// Validate a task snapshot.
///
/// Depth-first traversal per unvisited root with an explicit recursion
/// stack; O(V+E) over the whole snapshot.
pub fn validate(tasks: &[Task]) -> GraphValidation {
    let index = index_by_id(tasks);
    let mut validation = GraphValidation::default();

    for task in tasks {
        if task.dependencies.iter().any(|d| d == &task.id) {
            validation.self_dependencies.push(task.id.clone());
        }
        for dep in &task.dependencies {
            if !index.contains_key(dep.as_str()) {
                validation.dangling.push(DanglingDependency {
                    task_id: task.id.clone(),
                    dependency_id: dep.clone(),
                });
            }
        }
        if task.dependencies.len() > FAN_OUT_WARNING_THRESHOLD {
            validation.warnings.push(format!(
                "task '{}' has {} dependencies",
                display_name(task),
                task.dependencies.len()
            ));
        }
    }

    // Cycle detection: DFS with an explicit recursion stack. `visited` marks
    // fully-explored nodes across roots; `stack` holds the current path.
    let mut visited: HashSet<&str> = HashSet::new();
    let mut seen_cycles: HashSet<Vec<String>> = HashSet::new();

    for root in tasks {
        if visited.contains(root.id.as_str()) {
            continue;
        }
        let mut stack: Vec<&str> = Vec::new();
        dfs_cycles(
            root.id.as_str(),
            &index,
            &mut visited,
            &mut stack,
            &mut seen_cycles,
            &mut validation.cycles,
        );
    }

    let metrics = metrics(tasks);
    for (id, depth) in &metrics.depths {
        if *depth > DEPTH_WARNING_THRESHOLD {
            if let Some(task) = index.get(id.as_str()) {
                validation.warnings.push(format!(
                    "task '{}' sits {} levels deep in the dependency chain",
                    display_name(task),
                    depth
                ));
            }
        }
    }

    validation.valid = validation.cycles.is_empty()
        && validation.dangling.is_empty()
        && validation.self_dependencies.is_empty();
    validation
}

fn dfs_cycles<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a Task>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    seen: &mut HashSet<Vec<String>>,
    cycles: &mut Vec<Vec<String>>,
) {
    let task = match index.get(id) {
        Some(task) => *task,
        // Dangling reference; reported separately, not a traversal edge.
        None => return,
    };

    if let Some(first) = stack.iter().position(|s| *s == id) {
        // The cycle is the stack slice from the node's first occurrence to
        // the current node, inclusive.
        let cycle_ids: Vec<String> = stack[first..].iter().map(|s| s.to_string()).collect();
        let mut canonical = cycle_ids.clone();
        canonical.sort();
        if seen.insert(canonical) {
            let titles = stack[first..]
                .iter()
                .map(|s| index.get(s).map(|t| display_name(t)).unwrap_or_else(|| s.to_string()))
                .collect();
            cycles.push(titles);
        }
        return;
    }
    if visited.contains(id) {
        return;
    }

    stack.push(id);
    for dep in &task.dependencies {
        dfs_cycles(dep.as_str(), index, visited, stack, seen, cycles);
    }
    stack.pop();
    visited.insert(id);
}

/// Whether every dependency of `task` is satisfied within the snapshot.
///
/// A dependency pointing at an id absent from the snapshot counts as
/// satisfied. This leniency tolerates stale references to deleted tasks;
/// tightening it to block on unresolved references is an open design
/// question and must not be changed silently.
pub fn dependencies_satisfied(task: &Task, index: &HashMap<&str, &Task>) -> bool {
    task.dependencies.iter().all(|dep| {
        match index.get(dep.as_str()) {
            Some(dep_task) => dep_task.status == TaskStatus::Done,
            None => true,
        }
    })
}

/// Partition the snapshot's `todo` tasks into ready and blocked sets.
pub fn partition(tasks: &[Task]) -> ReadyPartition {
    let index = index_by_id(tasks);
    let depths = depth_map(tasks, &index);

    let mut ready: Vec<(usize, Task)> = Vec::new();
    let mut blocked = Vec::new();

    for (position, task) in tasks.iter().enumerate() {
        if task.status != TaskStatus::Todo {
            continue;
        }
        if dependencies_satisfied(task, &index) {
            ready.push((position, task.clone()));
        } else {
            blocked.push(task.clone());
        }
    }

    // Priority descending, then shallower dependency depth, then insertion
    // order. The sort is stable but the explicit position keeps the intent
    // readable.
    ready.sort_by(|(pos_a, a), (pos_b, b)| {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then_with(|| {
                let depth_a = depths.get(a.id.as_str()).copied().unwrap_or(0);
                let depth_b = depths.get(b.id.as_str()).copied().unwrap_or(0);
                depth_a.cmp(&depth_b)
            })
            .then_with(|| pos_a.cmp(pos_b))
    });

    ReadyPartition {
        ready: ready.into_iter().map(|(_, t)| t).collect(),
        blocked,
    }
}

/// Dependency depth of a single task id within the snapshot.
pub fn dependency_depth(id: &str, tasks: &[Task]) -> usize {
    let index = index_by_id(tasks);
    let mut memo = HashMap::new();
    depth_of(id, &index, &mut memo, &mut HashSet::new())
}

fn depth_map<'a>(
    tasks: &'a [Task],
    index: &HashMap<&'a str, &'a Task>,
) -> HashMap<&'a str, usize> {
    let mut memo: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        depth_of(task.id.as_str(), index, &mut memo, &mut HashSet::new());
    }
    memo
}

// Memoized depth with a per-path visited set: a cycle edge is skipped for
// the current path only, so unrelated chains through the same node still
// report their true depth.
fn depth_of<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a Task>,
    memo: &mut HashMap<&'a str, usize>,
    path: &mut HashSet<&'a str>,
) -> usize {
    if let Some(depth) = memo.get(id) {
        return *depth;
    }
    let task = match index.get(id) {
        Some(task) => *task,
        None => return 0,
    };
    if !path.insert(id) {
        return 0;
    }

    let mut depth = 0;
    for dep in &task.dependencies {
        if index.contains_key(dep.as_str()) && !path.contains(dep.as_str()) {
            depth = depth.max(1 + depth_of(dep.as_str(), index, memo, path));
        }
    }

    path.remove(id);
    memo.insert(id, depth);
    depth
}

/// Compute depth and critical-path metrics for the snapshot.
pub fn metrics(tasks: &[Task]) -> GraphMetrics {
    let index = index_by_id(tasks);
    let depths = depth_map(tasks, &index);

    let mut critical_path: Vec<String> = Vec::new();
    for task in tasks {
        let chain = chain_to(task.id.as_str(), &index, &mut HashSet::new());
        if chain.len() > critical_path.len() {
            critical_path = chain;
        }
    }

    GraphMetrics {
        depths: depths.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        critical_path,
        max_fan_out: tasks.iter().map(|t| t.dependencies.len()).max().unwrap_or(0),
    }
}

// Longest chain ending at `id`, ordered root-first.
fn chain_to<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a Task>,
    path: &mut HashSet<&'a str>,
) -> Vec<String> {
    let task = match index.get(id) {
        Some(task) => *task,
        None => return Vec::new(),
    };
    if !path.insert(id) {
        return Vec::new();
    }

    let mut best: Vec<String> = Vec::new();
    for dep in &task.dependencies {
        let chain = chain_to(dep.as_str(), index, path);
        if chain.len() > best.len() {
            best = chain;
        }
    }

    path.remove(id);
    best.push(id.to_string());
    best
}
