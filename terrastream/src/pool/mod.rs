//! Fixed-size worker pool for blocking download jobs.
//!
//! The pool drains a shared job stack: the most recently pushed job starts
//! first. The render loop requests fine tiles last (it sorts leaves by
//! descending depth), so LIFO order means the tiles that matter for the
//! current frame are downloaded before stale coarse requests.
//!
//! Shutdown follows the sentinel scheme: dropping the pool pushes one
//! [`Task::Shutdown`] per worker and joins them. Jobs already running are
//! finished, queued jobs are dropped with the queue.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// A unit of work executed on a pool worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Task {
    Work(Job),
    Shutdown,
}

/// A thread-safe LIFO stack with blocking pop.
///
/// All queue mutation is serialized through one mutex, so a job can never be
/// observed both by `clear` and by a worker: it is either discarded or runs,
/// never both.
struct JobQueue {
    tasks: Mutex<Vec<Task>>,
    available: Condvar,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            available: Condvar::new(),
        }
    }

    fn push(&self, task: Task) {
        self.tasks.lock().push(task);
        self.available.notify_one();
    }

    /// Blocks until a task is available and returns the most recent one.
    fn pop(&self) -> Task {
        let mut tasks = self.tasks.lock();
        while tasks.is_empty() {
            self.available.wait(&mut tasks);
        }
        tasks.pop().expect("queue is non-empty")
    }

    /// Discards all not-yet-started work. Shutdown sentinels survive so a
    /// clear racing a pool drop cannot strand a worker.
    fn clear(&self) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| matches!(t, Task::Shutdown));
    }

    fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

/// Fixed-size worker pool draining the shared job stack.
pub struct ThreadPool {
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `workers` threads, each blocking on the shared queue.
    pub fn new(workers: usize) -> Self {
        let queue = Arc::new(JobQueue::new());
        let handles = (0..workers)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::Builder::new()
                    .name(format!("tile-worker-{i}"))
                    .spawn(move || loop {
                        match queue.pop() {
                            Task::Work(job) => job(),
                            Task::Shutdown => break,
                        }
                    })
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Self {
            queue,
            workers: handles,
        }
    }

    /// Enqueues a job and wakes one worker.
    pub fn assign_work<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Task::Work(Box::new(job)));
    }

    /// Atomically discards every not-yet-started job.
    ///
    /// Jobs already picked up by a worker run to completion.
    pub fn clear_queue(&self) {
        self.queue.clear();
    }

    /// Number of jobs waiting to be started.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            self.queue.push(Task::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().map(str::to_owned);
            if worker.join().is_err() {
                trace!(worker = name.as_deref(), "pool worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_jobs_are_executed() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(4);
            for _ in 0..32 {
                let counter = Arc::clone(&counter);
                pool.assign_work(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            // Drop joins the workers, so all jobs have run afterwards.
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_lifo_start_order() {
        let pool = ThreadPool::new(1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (order_tx, order_rx) = mpsc::channel::<u32>();

        // Occupy the single worker so the next pushes stack up.
        pool.assign_work(move || {
            gate_rx.recv().unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));

        for i in 0..3 {
            let tx = order_tx.clone();
            pool.assign_work(move || {
                tx.send(i).unwrap();
            });
        }
        gate_tx.send(()).unwrap();

        let order: Vec<u32> = (0..3)
            .map(|_| order_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![2, 1, 0], "most recent job must start first");
    }

    #[test]
    fn test_clear_queue_discards_pending_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(1);
            let (gate_tx, gate_rx) = mpsc::channel::<()>();

            pool.assign_work(move || {
                gate_rx.recv().unwrap();
            });
            std::thread::sleep(Duration::from_millis(50));

            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                pool.assign_work(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            assert_eq!(pool.queued_jobs(), 8);

            pool.clear_queue();
            assert_eq!(pool.queued_jobs(), 0);

            gate_tx.send(()).unwrap();
        }
        assert_eq!(
            counter.load(Ordering::SeqCst),
            0,
            "cleared jobs must never run"
        );
    }

    #[test]
    fn test_in_flight_job_survives_clear() {
        let pool = ThreadPool::new(1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        pool.assign_work(move || {
            gate_rx.recv().unwrap();
            done_tx.send(()).unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));

        // The job has been popped already; clearing must not cancel it.
        pool.clear_queue();
        gate_tx.send(()).unwrap();
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("in-flight job must complete");
    }

    #[test]
    fn test_drop_with_empty_queue_joins() {
        let pool = ThreadPool::new(3);
        drop(pool);
    }
}
