//! The task graph: units of work and the precedence edges between them.
//! Built single-threaded while targets are registered, then handed to the
//! executor which runs every task once all of its predecessors finished.

use crate::densemap::{self, DenseMap};
use crate::error::{misuse, Result};
use std::sync::Mutex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

impl densemap::Index for TaskId {
    fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(u: usize) -> TaskId {
        TaskId(u)
    }
}

pub type Job<'a> = Box<dyn FnOnce() + Send + 'a>;

pub struct Task<'a> {
    pub name: String,
    /// Taken exactly once, by the worker that runs the task.
    job: Mutex<Option<Job<'a>>>,
    successors: Vec<TaskId>,
    predecessors: usize,
}

impl<'a> Task<'a> {
    pub fn successors(&self) -> &[TaskId] {
        &self.successors
    }

    pub fn predecessor_count(&self) -> usize {
        self.predecessors
    }
}

#[derive(Default)]
pub struct TaskGraph<'a> {
    tasks: DenseMap<TaskId, Task<'a>>,
}

impl<'a> TaskGraph<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, name: impl Into<String>, job: impl FnOnce() + Send + 'a) -> TaskId {
        self.tasks.push(Task {
            name: name.into(),
            job: Mutex::new(Some(Box::new(job))),
            successors: Vec::new(),
            predecessors: 0,
        })
    }

    pub fn task(&self, id: TaskId) -> &Task<'a> {
        &self.tasks[id]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn all_ids(&self) -> impl Iterator<Item = TaskId> {
        (0..self.tasks.len()).map(TaskId)
    }

    pub fn has_edge(&self, from: TaskId, to: TaskId) -> bool {
        self.tasks[from].successors.contains(&to)
    }

    /// Whether `to` can be reached from `from` by following successors.
    /// A task reaches itself.
    pub fn reaches(&self, from: TaskId, to: TaskId) -> bool {
        let mut visited = vec![false; self.tasks.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut visited[id.0], true) {
                continue;
            }
            stack.extend_from_slice(&self.tasks[id].successors);
        }
        false
    }

    /// Require `from` to finish before `to` starts.  Duplicate edges and
    /// edges closing a cycle are rejected and leave the graph untouched.
    pub fn precede(&mut self, from: TaskId, to: TaskId) -> Result<()> {
        if self.tasks.lookup(from).is_none() || self.tasks.lookup(to).is_none() {
            return misuse(format!("unknown task in edge {:?} -> {:?}", from, to));
        }
        if self.has_edge(from, to) {
            return misuse(format!(
                "duplicate edge {:?} -> {:?}",
                self.tasks[from].name, self.tasks[to].name
            ));
        }
        if self.reaches(to, from) {
            return misuse(format!(
                "edge {:?} -> {:?} would create a cycle",
                self.tasks[from].name, self.tasks[to].name
            ));
        }
        self.tasks[from].successors.push(to);
        self.tasks[to].predecessors += 1;
        Ok(())
    }

    /// Take the job of a task for execution; None if it already ran.
    pub fn take_job(&self, id: TaskId) -> Option<Job<'a>> {
        self.tasks[id].job.lock().unwrap().take()
    }
}
