//! Runs a task graph on a worker pool.

use crate::densemap::Index;
use crate::error::{Error, Result};
use crate::graph::{TaskGraph, TaskId};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Owns the worker pool.  A task starts as soon as its last predecessor
/// finishes; there is no other ordering between tasks.
pub struct Executor {
    pool: rayon::ThreadPool,
}

impl Executor {
    /// `parallelism` of 0 means one worker per hardware thread.
    pub fn new(parallelism: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("cc2-worker-{}", i))
            .build()
            .map_err(|err| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        Ok(Executor { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every task of `graph` and block until all of them, including any
    /// parallel work they fan out into, have completed.
    pub fn run(&self, graph: &TaskGraph) {
        let pending: Vec<AtomicUsize> = graph
            .all_ids()
            .map(|id| AtomicUsize::new(graph.task(id).predecessor_count()))
            .collect();
        let pending = pending.as_slice();
        tracing::debug!(tasks = graph.len(), threads = self.num_threads(), "executing graph");
        self.pool.scope(|scope| {
            // Roots come from the static counts; the live ones are already
            // being decremented by tasks spawned in this loop.
            for id in graph.all_ids() {
                if graph.task(id).predecessor_count() == 0 {
                    scope.spawn(move |scope| run_task(scope, graph, pending, id));
                }
            }
        });
    }
}

fn run_task<'s>(
    scope: &rayon::Scope<'s>,
    graph: &'s TaskGraph,
    pending: &'s [AtomicUsize],
    id: TaskId,
) {
    if let Some(job) = graph.take_job(id) {
        tracing::trace!(task = %graph.task(id).name, "start");
        job();
    }
    for &next in graph.task(id).successors() {
        if pending[next.index()].fetch_sub(1, Ordering::AcqRel) == 1 {
            scope.spawn(move |scope| run_task(scope, graph, pending, next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn respects_precedence() -> Result<()> {
        let order = Mutex::new(Vec::new());
        let mut graph = TaskGraph::new();
        let log = |name: &'static str| {
            let order = &order;
            move || order.lock().unwrap().push(name)
        };
        let a = graph.add_task("a", log("a"));
        let b = graph.add_task("b", log("b"));
        let c = graph.add_task("c", log("c"));
        graph.precede(c, b)?;
        graph.precede(b, a)?;
        Executor::new(1)?.run(&graph);
        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
        Ok(())
    }

    #[test]
    fn diamond_runs_join_last() -> Result<()> {
        let count = AtomicUsize::new(0);
        let seen_at_join = AtomicUsize::new(usize::MAX);
        let mut graph = TaskGraph::new();
        let top = graph.add_task("top", || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let left = graph.add_task("left", || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let right = graph.add_task("right", || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let join = graph.add_task("join", || {
            seen_at_join.store(count.load(Ordering::SeqCst), Ordering::SeqCst);
        });
        graph.precede(top, left)?;
        graph.precede(top, right)?;
        graph.precede(left, join)?;
        graph.precede(right, join)?;
        Executor::new(4)?.run(&graph);
        assert_eq!(seen_at_join.load(Ordering::SeqCst), 3);
        Ok(())
    }

    /// Each join has a quick chain and a slow task in front of it.  Many
    /// roots sit between the chain heads and their successors, so the quick
    /// chains finish while roots are still being spawned.
    #[test]
    fn join_waits_for_slow_predecessor() -> Result<()> {
        const CHAINS: usize = 16;
        let slow_done: Vec<AtomicUsize> = (0..CHAINS).map(|_| AtomicUsize::new(0)).collect();
        let early = AtomicUsize::new(0);
        let mut graph = TaskGraph::new();

        let heads: Vec<TaskId> = (0..CHAINS)
            .map(|i| graph.add_task(format!("a{}", i), || {}))
            .collect();
        for i in 0..5000 {
            graph.add_task(format!("filler{}", i), || {});
        }
        for (i, &head) in heads.iter().enumerate() {
            let middle = graph.add_task(format!("b{}", i), || {});
            let done = &slow_done[i];
            let slow = graph.add_task(format!("z{}", i), move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                done.store(1, Ordering::SeqCst);
            });
            let early = &early;
            let join = graph.add_task(format!("j{}", i), move || {
                if done.load(Ordering::SeqCst) == 0 {
                    early.fetch_add(1, Ordering::SeqCst);
                }
            });
            graph.precede(head, middle)?;
            graph.precede(middle, join)?;
            graph.precede(slow, join)?;
        }

        Executor::new(8)?.run(&graph);
        assert_eq!(early.load(Ordering::SeqCst), 0);
        assert!(slow_done.iter().all(|d| d.load(Ordering::SeqCst) == 1));
        Ok(())
    }
}
