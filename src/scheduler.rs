/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Runs the per meta-block work on a pool of threads while the results are
//! written out strictly in the order the work was submitted.

use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use log::warn;

use crate::preflate_error::{ExitCode, PreflateError, Result, err_exit_code};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// upper bound on the memory held by meta-blocks waiting in the queue
const MAX_QUEUED_BYTES: usize = 64 * 1024 * 1024;

/// turns a panic inside a task into an error instead of taking down the worker
fn catch_unwind_result<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(err) => {
            let message = if let Some(message) = err.downcast_ref::<&str>() {
                (*message).to_owned()
            } else if let Some(message) = err.downcast_ref::<String>() {
                message.clone()
            } else {
                "unknown panic".to_owned()
            };
            Err(PreflateError::new(
                ExitCode::GeneralFailure,
                format!("task panicked: {message}"),
            ))
        }
    }
}

/// A fixed number of threads pulling jobs off a shared channel.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerPool {{ threads: {} }}", self.workers.len())
    }
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();

        let workers = (0..threads.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("preflate-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
            })
            .filter_map(|r| match r {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("failed to start worker thread: {e}");
                    None
                }
            })
            .collect();

        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    /// the pool shared by the whole process, sized to the number of cpus
    pub fn global() -> &'static WorkerPool {
        static POOL: OnceLock<WorkerPool> = OnceLock::new();
        POOL.get_or_init(|| WorkerPool::new(num_cpus::get()))
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues the task on the pool. The result (or the panic, turned into a
    /// GeneralFailure) is picked up through the returned handle.
    pub fn submit<T: Send + 'static>(
        &self,
        task: impl FnOnce() -> Result<T> + Send + 'static,
    ) -> TaskHandle<T> {
        let (result_tx, result_rx) = bounded(1);

        let job: Job = Box::new(move || {
            // nobody waiting for the result is fine
            let _ = result_tx.send(catch_unwind_result(task));
        });

        // without any workers run on the calling thread rather than never at all
        let job = match &self.sender {
            Some(sender) if !self.workers.is_empty() => match sender.send(job) {
                Ok(()) => None,
                Err(e) => Some(e.into_inner()),
            },
            _ => Some(job),
        };
        if let Some(job) = job {
            job();
        }

        TaskHandle {
            receiver: result_rx,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // closing the channel lets the workers run out of jobs and exit
        self.sender = None;
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

/// The pending result of a task submitted to the pool.
pub struct TaskHandle<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// blocks until the task is done
    pub fn wait(self) -> Result<T> {
        match self.receiver.recv() {
            Ok(r) => r,
            Err(_) => err_exit_code(ExitCode::GeneralFailure, "task was dropped before finishing"),
        }
    }
}

/// Consumes the results of the queue in submission order.
pub trait OrderedOutput<T> {
    fn write_result(&mut self, result: T) -> Result<()>;
}

/// The bounded FIFO of in-flight tasks. Once the queue is full, submitting waits
/// for the oldest task and hands its result to the output before queuing more.
///
/// The first failure sets a flag shared with the tasks. After that the results
/// still arriving are drained and thrown away, and finish reports the failure.
pub struct TaskQueue<'p, T> {
    pool: &'p WorkerPool,
    in_flight: VecDeque<TaskHandle<T>>,
    capacity: usize,
    failed: Arc<AtomicBool>,
    first_error: Option<PreflateError>,
}

/// how many meta-blocks may be in flight at once
pub fn queue_capacity(workers: usize, meta_block_size: usize) -> usize {
    (2 * workers)
        .min(MAX_QUEUED_BYTES / meta_block_size.max(1))
        .max(1)
}

impl<'p, T: Send + 'static> TaskQueue<'p, T> {
    pub fn new(pool: &'p WorkerPool, capacity: usize) -> Self {
        TaskQueue {
            pool,
            in_flight: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            failed: Arc::new(AtomicBool::new(false)),
            first_error: None,
        }
    }

    /// true once any task or output step has failed, at which point no more
    /// work should be submitted
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn submit(
        &mut self,
        task: impl FnOnce() -> Result<T> + Send + 'static,
        output: &mut impl OrderedOutput<T>,
    ) {
        while self.in_flight.len() >= self.capacity {
            self.drain_oldest(output);
        }

        let failed = self.failed.clone();
        self.in_flight.push_back(self.pool.submit(move || {
            let r = task();
            if r.is_err() {
                failed.store(true, Ordering::Release);
            }
            r
        }));
    }

    fn record_failure(&mut self, e: PreflateError) {
        if self.first_error.is_none() {
            warn!("stopping after failure: {e}");
            self.first_error = Some(e);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn drain_oldest(&mut self, output: &mut impl OrderedOutput<T>) {
        if let Some(handle) = self.in_flight.pop_front() {
            let r = handle.wait();
            if self.first_error.is_some() {
                return;
            }

            if let Err(e) = r.and_then(|result| output.write_result(result)) {
                self.record_failure(e);
            }
        }
    }

    /// waits for everything still in flight, returning the first error if there was one
    pub fn finish(mut self, output: &mut impl OrderedOutput<T>) -> Result<()> {
        while !self.in_flight.is_empty() {
            self.drain_oldest(output);
        }

        match self.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[derive(Default)]
struct CollectOutput(Vec<u32>);

#[cfg(test)]
impl OrderedOutput<u32> for CollectOutput {
    fn write_result(&mut self, result: u32) -> Result<()> {
        self.0.push(result);
        Ok(())
    }
}

#[test]
fn results_come_out_in_submission_order() {
    let pool = WorkerPool::new(4);
    let mut queue = TaskQueue::new(&pool, 3);
    let mut output = CollectOutput::default();

    for i in 0..20u32 {
        queue.submit(
            move || {
                // make the early tasks finish last
                std::thread::sleep(std::time::Duration::from_millis(u64::from(20 - i)));
                Ok(i)
            },
            &mut output,
        );
    }
    queue.finish(&mut output).unwrap();

    assert_eq!(output.0, (0..20).collect::<Vec<_>>());
}

#[test]
fn first_failure_is_reported() {
    let pool = WorkerPool::new(2);
    let mut queue = TaskQueue::new(&pool, 2);
    let mut output = CollectOutput::default();

    for i in 0..6u32 {
        if queue.has_failed() {
            break;
        }
        queue.submit(
            move || {
                if i >= 2 {
                    err_exit_code(ExitCode::PredictionFailure, format!("task {i}"))
                } else {
                    Ok(i)
                }
            },
            &mut output,
        );
    }

    let e = queue.finish(&mut output).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::PredictionFailure);
    assert!(e.message().starts_with("task 2"), "{}", e.message());
    assert_eq!(output.0, [0, 1]);
}

#[test]
fn panic_becomes_general_failure() {
    let pool = WorkerPool::new(1);
    let handle = pool.submit::<u32>(|| panic!("boom"));
    let e = handle.wait().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::GeneralFailure);

    // the worker survives the panic
    assert_eq!(pool.submit(|| Ok(5u32)).wait().unwrap(), 5);
}

#[test]
fn capacity_limits() {
    assert_eq!(queue_capacity(8, 2 * 1024 * 1024), 16);
    assert_eq!(queue_capacity(64, 2 * 1024 * 1024), 32);
    assert_eq!(queue_capacity(4, 1 << 30), 1);
}
