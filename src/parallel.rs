//! Solver Task Dispatch
//!
//! The engine never owns worker threads. `simulate` fans solver work out
//! through an externally supplied [`ThreadPool`] and joins on a countdown
//! [`Latch`]: one latch arm per colour group, one count-down per finished
//! chunk. Tasks are handed to the pool as type-erased [`TaskRef`]s whose
//! liveness is guaranteed by that protocol — the dispatching thread blocks
//! on the latch before any referenced task can go out of scope.

use core::sync::atomic::{AtomicUsize, Ordering};

/// A unit of solver work.
pub trait Task: Sync {
    /// Execute the task. `worker_index` identifies the executing worker
    /// and is purely informational.
    fn run(&self, worker_index: usize);
}

/// Type-erased reference to a [`Task`], safe to move across threads.
#[derive(Clone, Copy)]
pub struct TaskRef {
    data: *const (),
    run_fn: unsafe fn(*const (), usize),
}

impl TaskRef {
    /// Erase a task reference.
    ///
    /// # Safety
    ///
    /// The referenced task must outlive every [`run`](Self::run)
    /// invocation. The engine upholds this by blocking on the colour
    /// latch before the tasks it pushed can be dropped.
    pub unsafe fn new<T: Task>(task: &T) -> Self {
        unsafe fn call<T: Task>(data: *const (), worker_index: usize) {
            unsafe { (*data.cast::<T>()).run(worker_index) }
        }
        Self {
            data: (task as *const T).cast(),
            run_fn: call::<T>,
        }
    }

    /// Execute the referenced task.
    #[inline]
    pub fn run(&self, worker_index: usize) {
        unsafe { (self.run_fn)(self.data, worker_index) }
    }
}

// SAFETY: a TaskRef is a borrow of a Sync task whose liveness is guaranteed
// by the latch protocol described on `new`.
unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

/// Capability the solver requires from a worker pool: enqueue a task for
/// eventual execution on some thread.
pub trait ThreadPool: Sync {
    /// Enqueue `task`. The pool must eventually call `task.run`.
    fn push(&self, task: TaskRef);
}

/// Countdown latch the dispatcher re-arms once per colour group.
pub struct Latch {
    remaining: AtomicUsize,
}

impl Latch {
    /// New latch with nothing outstanding.
    pub fn new() -> Self {
        Self {
            remaining: AtomicUsize::new(0),
        }
    }

    /// Set the number of outstanding count-downs. Only the dispatching
    /// thread may arm, and only while the latch is open.
    #[inline]
    pub fn arm(&self, count: usize) {
        self.remaining.store(count, Ordering::Release);
    }

    /// Signal one completed unit of work.
    #[inline]
    pub fn count_down(&self) {
        self.remaining.fetch_sub(1, Ordering::Release);
    }

    /// True once every armed unit has counted down.
    #[inline]
    pub fn try_wait(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Spin until the latch opens.
    #[inline]
    pub fn wait(&self) {
        while !self.try_wait() {
            core::hint::spin_loop();
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool that runs every task immediately on the pushing thread. Used by
/// tests and by single-threaded hosts.
pub struct InlineExecutor;

impl ThreadPool for InlineExecutor {
    #[inline]
    fn push(&self, task: TaskRef) {
        task.run(0);
    }
}

#[cfg(feature = "parallel")]
impl ThreadPool for rayon::ThreadPool {
    fn push(&self, task: TaskRef) {
        self.spawn(move || task.run(rayon::current_thread_index().unwrap_or(0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    struct CountingTask {
        counter: AtomicUsize,
        latch: Latch,
    }

    impl Task for CountingTask {
        fn run(&self, _worker_index: usize) {
            self.counter.fetch_add(1, Ordering::Relaxed);
            self.latch.count_down();
        }
    }

    #[test]
    fn test_inline_executor_runs_on_push() {
        let task = CountingTask {
            counter: AtomicUsize::new(0),
            latch: Latch::new(),
        };
        task.latch.arm(3);
        let pool = InlineExecutor;
        for _ in 0..3 {
            // SAFETY: `task` outlives the push; InlineExecutor runs it
            // before returning.
            pool.push(unsafe { TaskRef::new(&task) });
        }
        task.latch.wait();
        assert_eq!(task.counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_latch_rearm() {
        let latch = Latch::new();
        assert!(latch.try_wait());
        latch.arm(2);
        assert!(!latch.try_wait());
        latch.count_down();
        assert!(!latch.try_wait());
        latch.count_down();
        assert!(latch.try_wait());
        latch.arm(1);
        assert!(!latch.try_wait());
        latch.count_down();
        latch.wait();
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_rayon_pool_executes_tasks() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let task = CountingTask {
            counter: AtomicUsize::new(0),
            latch: Latch::new(),
        };
        task.latch.arm(8);
        for _ in 0..8 {
            // SAFETY: this thread blocks on the latch before `task` drops.
            ThreadPool::push(&pool, unsafe { TaskRef::new(&task) });
        }
        task.latch.wait();
        assert_eq!(task.counter.load(Ordering::Relaxed), 8);
    }
}
