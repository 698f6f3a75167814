// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Ordered execution streams.
//!
//! Work submitted to a [`Stream`] does not run at submission time. It is
//! queued in FIFO order and runs when the owner calls
//! [`Stream::synchronize`], which is the only point where results become
//! visible in the bound buffers.

use crate::TensorError;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Error type returned by queued work.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

type Task = Box<dyn FnOnce() -> Result<(), TaskError> + Send>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_STREAM: RefCell<Stream> = RefCell::new(Stream::new());
}

/// A FIFO queue of deferred work.
///
/// Cloning a stream yields another handle to the same queue.
#[derive(Clone)]
pub struct Stream {
    id: u64,
    queue: Arc<Mutex<VecDeque<Task>>>,
}

impl Stream {
    /// Creates a new, empty stream.
    pub fn new() -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Returns the stream's handle value.
    pub fn handle(&self) -> u64 {
        self.id
    }

    /// Queues `task` behind all previously submitted work.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Box::new(task));
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Runs every queued task in submission order.
    ///
    /// Stops at the first failing task; work queued after it is discarded.
    pub fn synchronize(&self) -> Result<(), TensorError> {
        loop {
            // The lock is released before the task runs so tasks may submit
            // follow-up work to the same stream.
            let next = self
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(task) = next else {
                return Ok(());
            };
            if let Err(e) = task() {
                self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
                return Err(TensorError::Stream {
                    stream: self.id,
                    detail: e.to_string(),
                });
            }
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Returns the calling thread's current stream.
pub fn current_stream() -> Stream {
    CURRENT_STREAM.with(|s| s.borrow().clone())
}

/// Makes `stream` the calling thread's current stream, returning the previous one.
pub fn set_current_stream(stream: Stream) -> Stream {
    CURRENT_STREAM.with(|s| std::mem::replace(&mut *s.borrow_mut(), stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tasks_run_on_synchronize_in_order() {
        let stream = Stream::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            stream.submit(move || {
                log.lock().unwrap().push(i);
                Ok(())
            });
        }
        assert_eq!(stream.pending(), 3);
        assert!(log.lock().unwrap().is_empty());

        stream.synchronize().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn test_failure_discards_remaining_work() {
        let stream = Stream::new();
        let ran = Arc::new(AtomicUsize::new(0));
        stream.submit(|| Err("boom".into()));
        let counter = Arc::clone(&ran);
        stream.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = stream.synchronize().unwrap_err();
        assert!(matches!(err, TensorError::Stream { .. }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn test_current_stream_is_per_thread() {
        let custom = Stream::new();
        let id = custom.handle();
        let previous = set_current_stream(custom);
        assert_eq!(current_stream().handle(), id);
        set_current_stream(previous);
        assert_ne!(current_stream().handle(), id);
    }
}
