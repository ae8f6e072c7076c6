//! Executors: where node invocations run.
//!
//! The scheduler never runs calculator code itself; it hands each ready
//! invocation to an [`Executor`]. Two implementations exist:
//!
//! - [`ThreadPoolExecutor`]: named worker threads fed from a crossbeam
//!   channel.
//! - [`ApplicationThreadExecutor`]: tasks are queued and run by whichever
//!   thread calls into the graph (`wait_until_idle`, `wait_until_done`,
//!   blocking adds).

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{JoinHandle, ThreadId};

/// One unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    /// Run `task` eventually. Must not run it inline.
    fn execute(&self, task: Task);

    fn name(&self) -> &str;

    /// True when tasks only run inside [`Executor::run_pending`].
    fn runs_on_caller(&self) -> bool {
        false
    }

    /// Run queued tasks on the calling thread until none are left.
    /// Returns whether any task ran.
    fn run_pending(&self) -> bool {
        false
    }

    fn has_pending(&self) -> bool {
        false
    }
}

/// Build the executor described by `config`.
pub fn from_config(config: &ExecutorConfig) -> Result<Arc<dyn Executor>> {
    let name = if config.name.is_empty() {
        "default"
    } else {
        config.name.as_str()
    };
    match config.kind {
        ExecutorKind::ThreadPool => {
            let threads = config.num_threads.unwrap_or_else(default_num_threads);
            if threads == 0 {
                return Ok(Arc::new(ApplicationThreadExecutor::new(name)));
            }
            Ok(Arc::new(ThreadPoolExecutor::new(name, threads)?))
        }
        ExecutorKind::ApplicationThread => Ok(Arc::new(ApplicationThreadExecutor::new(name))),
    }
}

pub fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// ==================== Thread pool ====================

pub struct ThreadPoolExecutor {
    name: String,
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    worker_ids: Vec<ThreadId>,
}

impl ThreadPoolExecutor {
    pub fn new(name: impl Into<String>, num_threads: usize) -> Result<Self> {
        let name = name.into();
        if num_threads == 0 {
            return Err(Error::Config(format!(
                "thread pool \"{}\" needs at least one thread",
                name
            )));
        }
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();

        let mut workers = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker_loop(receiver))?;
            workers.push(handle);
        }
        let worker_ids = workers.iter().map(|w| w.thread().id()).collect();
        tracing::debug!("Executor {} started {} threads", name, num_threads);

        Ok(Self {
            name,
            sender: Some(sender),
            workers,
            worker_ids,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(receiver: Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        // Tasks report their own failures; a panic must not kill the worker.
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
            tracing::error!("Task panicked on {:?}", std::thread::current().name());
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, task: Task) {
        if let Some(sender) = &self.sender {
            if sender.send(task).is_err() {
                tracing::warn!("Executor {} is shut down; task dropped", self.name);
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        // Disconnects the channel; workers exit once the queue drains.
        self.sender.take();
        let current = std::thread::current().id();
        if self.worker_ids.contains(&current) {
            tracing::debug!("Executor {} dropped on a worker; detaching", self.name);
            return;
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("Executor {} stopped", self.name);
    }
}

// ==================== Application thread ====================

pub struct ApplicationThreadExecutor {
    name: String,
    queue: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
}

impl ApplicationThreadExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    fn pop(&self) -> Option<Task> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

impl Executor for ApplicationThreadExecutor {
    fn execute(&self, task: Task) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn runs_on_caller(&self) -> bool {
        true
    }

    fn run_pending(&self) -> bool {
        // One draining thread at a time; nested calls from a task return.
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut ran = false;
        while let Some(task) = self.pop() {
            ran = true;
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                tracing::error!("Task panicked on executor {}", self.name);
            }
        }
        self.draining.store(false, Ordering::Release);
        ran
    }

    fn has_pending(&self) -> bool {
        !self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_thread_pool_runs_tasks() {
        let pool = ThreadPoolExecutor::new("test", 3).unwrap();
        assert_eq!(pool.num_threads(), 3);
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap()));
        }
        let mut seen: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_thread_pool_worker_names() {
        let pool = ThreadPoolExecutor::new("named", 1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("named-0"));
    }

    #[test]
    fn test_drop_finishes_queued_tasks() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPoolExecutor::new("drain", 2).unwrap();
            for _ in 0..50 {
                let count = count.clone();
                pool.execute(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let pool = ThreadPoolExecutor::new("panics", 1).unwrap();
        pool.execute(Box::new(|| panic!("boom")));
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(ThreadPoolExecutor::new("none", 0).is_err());
    }

    #[test]
    fn test_application_thread_runs_only_when_drained() {
        let executor = ApplicationThreadExecutor::new("app");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            executor.execute(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(executor.has_pending());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(executor.run_pending());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!executor.has_pending());
        assert!(!executor.run_pending());
    }

    #[test]
    fn test_application_thread_runs_tasks_queued_by_tasks() {
        let executor = Arc::new(ApplicationThreadExecutor::new("app"));
        let count = Arc::new(AtomicUsize::new(0));
        let inner_exec = executor.clone();
        let inner_count = count.clone();
        executor.execute(Box::new(move || {
            inner_exec.execute(Box::new(move || {
                inner_count.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        executor.run_pending();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_config() {
        let pool = from_config(&ExecutorConfig {
            name: "io".to_string(),
            kind: ExecutorKind::ThreadPool,
            num_threads: Some(2),
        })
        .unwrap();
        assert_eq!(pool.name(), "io");
        assert!(!pool.runs_on_caller());

        let app = from_config(&ExecutorConfig {
            name: String::new(),
            kind: ExecutorKind::ApplicationThread,
            num_threads: None,
        })
        .unwrap();
        assert_eq!(app.name(), "default");
        assert!(app.runs_on_caller());
    }
}
