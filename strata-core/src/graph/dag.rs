//! Task Graph
//!
//! Live tasks and the data dependencies between them. A task enters the
//! graph when it is analysed and leaves it when its end is processed.
//!
//! # Release
//!
//! Ending a task walks its successors and removes the edge from each one:
//!
//! 1. Remove the ended task from the successor's predecessor set
//! 2. If the set is now empty, the successor is ready
//! 3. Drop the ended task from the graph
//!
//! Successors are visited in the order their edges were added, so ready
//! notifications follow submission order.
//!
//! Removal swaps the last task into the freed slot, so the map itself is
//! unordered. Anything reported outside the graph is sorted by [`TaskId`],
//! which is allocated in submission order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::task::{Task, TaskId};

/// Tasks whose last predecessor just went away.
pub type Released = SmallVec<[TaskId; 4]>;

/// The dependency graph of live tasks.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: IndexMap<TaskId, Task>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            tasks: IndexMap::new(),
        }
    }

    /// Add a task to the graph.
    pub fn add_task(&mut self, task: Task) -> TaskId {
        let id = task.id();
        self.tasks.insert(id, task);
        id
    }

    /// Whether `task_id` is still live.
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn get_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&task_id)
    }

    /// Add a dependency edge: `successor` must wait for `predecessor`.
    ///
    /// Returns `false` when the edge already existed, would be a self loop,
    /// or either end is not in the graph.
    pub fn add_edge(&mut self, predecessor: TaskId, successor: TaskId) -> bool {
        if predecessor == successor
            || !self.tasks.contains_key(&predecessor)
            || !self.tasks.contains_key(&successor)
        {
            return false;
        }
        let added = self
            .tasks
            .get_mut(&successor)
            .map(|t| t.add_predecessor(predecessor))
            .unwrap_or(false);
        if let Some(pred) = self.tasks.get_mut(&predecessor) {
            pred.add_successor(successor);
        }
        added
    }

    /// Remove the edges from `task_id` to its successors and report the
    /// successors left without predecessors.
    pub fn release_successors(&mut self, task_id: TaskId) -> Released {
        let successors: Vec<TaskId> = match self.tasks.get(&task_id) {
            Some(task) => task.successors().iter().copied().collect(),
            None => return Released::new(),
        };
        let mut released = Released::new();
        for successor_id in successors {
            if let Some(successor) = self.tasks.get_mut(&successor_id) {
                successor.remove_predecessor(task_id);
                if !successor.has_predecessors() {
                    released.push(successor_id);
                }
            }
        }
        if let Some(task) = self.tasks.get_mut(&task_id) {
            for successor_id in &released {
                task.remove_successor(*successor_id);
            }
        }
        released
    }

    /// Remove a task from the graph, together with every edge touching it.
    pub fn remove_task(&mut self, task_id: TaskId) -> Option<Task> {
        let task = self.tasks.swap_remove(&task_id)?;
        for pred_id in task.predecessors() {
            if let Some(pred) = self.tasks.get_mut(pred_id) {
                pred.remove_successor(task_id);
            }
        }
        for succ_id in task.successors() {
            if let Some(succ) = self.tasks.get_mut(succ_id) {
                succ.remove_predecessor(task_id);
            }
        }
        Some(task)
    }

    /// Live tasks, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Live ids in submission order.
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every task reachable from `task_id` through successor edges, in
    /// breadth-first order. The start task is not included.
    pub fn transitive_successors(&self, task_id: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();
        seen.insert(task_id);
        queue.push_back(task_id);
        while let Some(id) = queue.pop_front() {
            let Some(task) = self.tasks.get(&id) else {
                continue;
            };
            for succ in task.successors() {
                if seen.insert(*succ) {
                    result.push(*succ);
                    queue.push_back(*succ);
                }
            }
        }
        result
    }

    /// Get the total number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All live tasks, predecessors before successors.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::with_capacity(self.tasks.len());

        for id in self.ids() {
            let Some(task) = self.tasks.get(&id) else {
                continue;
            };
            let degree = task
                .predecessors()
                .iter()
                .filter(|p| self.tasks.contains_key(*p))
                .count();
            in_degree.insert(id, degree);
            if degree == 0 {
                queue.push_back(id);
            }
        }

        // Kahn's algorithm
        while let Some(id) = queue.pop_front() {
            result.push(id);
            if let Some(task) = self.tasks.get(&id) {
                for succ in task.successors() {
                    if let Some(degree) = in_degree.get_mut(succ) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*succ);
                        }
                    }
                }
            }
        }

        result
    }

    /// Graphviz rendering of the live graph.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph tasks {\n");
        let tasks: Vec<&Task> = self.ids().iter().filter_map(|id| self.tasks.get(id)).collect();
        for task in &tasks {
            let _ = writeln!(
                out,
                "  {} [label=\"{} {}\\n{}\"];",
                task.id(),
                task.id(),
                task.name(),
                task.state()
            );
        }
        for task in &tasks {
            for succ in task.successors() {
                let _ = writeln!(out, "  {} -> {};", task.id(), succ);
            }
        }
        out.push_str("}\n");
        out
    }
}
