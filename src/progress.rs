/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives a notification for every block processed. Called from the worker
/// threads, so implementations must be cheap and must not block.
pub trait ProgressSink: Send + Sync {
    fn on_block(&self, inflated_bytes: u64);
}

/// ignores all progress
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_block(&self, _inflated_bytes: u64) {}
}

/// lock-free totals of the blocks and inflated bytes processed
#[derive(Debug, Default)]
pub struct ProgressCounter {
    blocks: AtomicU64,
    bytes: AtomicU64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ProgressCounter {
    fn on_block(&self, inflated_bytes: u64) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(inflated_bytes, Ordering::Relaxed);
    }
}

#[test]
fn counter_from_many_threads() {
    use std::sync::Arc;

    let counter = Arc::new(ProgressCounter::new());
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let c = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    c.on_block(3);
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(counter.blocks(), 4000);
    assert_eq!(counter.bytes(), 12000);
}
