//! Task dependency graph: arena of task ids with index-based adjacency.
//!
//! Edges point from a task to the tasks it depends on. A new edge is only
//! inserted after a DFS proves it would not close a cycle.

use crate::error::{Result, SyncError};
use crate::types::{TaskId, TaskRecord};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    index: HashMap<TaskId, usize>,
    ids: Vec<TaskId>,
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for one player's task list, rejecting the first edge
    /// that would introduce a cycle.
    pub fn from_tasks(tasks: &[TaskRecord]) -> Result<Self> {
        let mut graph = DependencyGraph::new();
        for task in tasks {
            graph.node(&task.id);
        }
        for task in tasks {
            for dep in &task.depends_on {
                graph.add_edge(&task.id, dep)?;
            }
        }
        Ok(graph)
    }

    fn node(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_string());
        self.edges.push(Vec::new());
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record that `task` depends on `depends_on`.
    pub fn add_edge(&mut self, task: &str, depends_on: &str) -> Result<()> {
        let from = self.node(task);
        let to = self.node(depends_on);
        if let Some(path) = self.path(to, from) {
            let names: Vec<&str> = path.iter().map(|&i| self.ids[i].as_str()).collect();
            return Err(SyncError::DependencyCycle(format!(
                "{} -> {}",
                task,
                names.join(" -> ")
            )));
        }
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
        Ok(())
    }

    /// DFS from `start` looking for `target`; returns the node path if found.
    fn path(&self, start: usize, target: usize) -> Option<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.ids.len()];
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::InProgress;

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if node == target {
                return Some(stack.iter().map(|&(n, _)| n).collect());
            }
            if top.1 < self.edges[node].len() {
                let child = self.edges[node][top.1];
                top.1 += 1;
                if marks[child] == Mark::Unvisited {
                    marks[child] = Mark::InProgress;
                    stack.push((child, 0));
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
        None
    }

    /// Whether `task` (transitively) depends on `other`.
    pub fn depends_on(&self, task: &str, other: &str) -> bool {
        match (self.index.get(task), self.index.get(other)) {
            (Some(&from), Some(&to)) if from != to => self.path(from, to).is_some(),
            _ => false,
        }
    }
}
