//! Session-owned background threads.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How a worker left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// The thread finished and was joined.
    Joined,
    /// The thread panicked; the panic was contained.
    Panicked,
    /// The thread did not finish in time and was detached.
    TimedOut,
    /// The caller asked not to wait; the thread was detached.
    Detached,
    /// The calling thread is this worker; joining would deadlock.
    SelfJoin,
}

/// Named background thread with a bounded join.
///
/// `std` joins have no timeout, so [`Worker::join_timeout`] waits on
/// [`JoinHandle::is_finished`] and detaches the thread when the deadline
/// passes. A detached worker still holds its clones of the session's shared
/// state until it observes the terminal state and returns.
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<F>(name: impl Into<String>, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new().name(name.clone()).spawn(body)?;
        log::debug!("spawned worker '{name}'");
        Ok(Self { name, handle })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits up to `timeout` for the thread to finish.
    pub fn join_timeout(self, timeout: Duration) -> JoinStatus {
        if self.handle.thread().id() == thread::current().id() {
            return JoinStatus::SelfJoin;
        }

        let start = Instant::now();
        while !self.handle.is_finished() {
            if start.elapsed() >= timeout {
                log::warn!(
                    "worker '{}' did not stop within {:?}; detaching it",
                    self.name,
                    timeout
                );
                return JoinStatus::TimedOut;
            }
            thread::sleep(Duration::from_millis(1));
        }

        match self.handle.join() {
            Ok(()) => JoinStatus::Joined,
            Err(_) => {
                log::error!("worker '{}' panicked", self.name);
                JoinStatus::Panicked
            }
        }
    }

    /// Drops the join handle; the thread exits on its own.
    pub fn detach(self) -> JoinStatus {
        log::debug!("detaching worker '{}'", self.name);
        JoinStatus::Detached
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn test_join_finished_worker() {
        let worker = Worker::spawn("quick", || {}).unwrap();
        assert_eq!(worker.name(), "quick");
        assert_eq!(
            worker.join_timeout(Duration::from_secs(1)),
            JoinStatus::Joined
        );
    }

    #[test]
    fn test_join_times_out() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let worker = Worker::spawn("slow", move || {
            while !flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();

        assert_eq!(
            worker.join_timeout(Duration::from_millis(10)),
            JoinStatus::TimedOut
        );
        release.store(true, Ordering::Release);
    }

    #[test]
    fn test_panicking_worker_is_contained() {
        let worker = Worker::spawn("boom", || panic!("worker failure")).unwrap();
        assert_eq!(
            worker.join_timeout(Duration::from_secs(1)),
            JoinStatus::Panicked
        );
    }
}
