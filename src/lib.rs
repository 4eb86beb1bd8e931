/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

// forbid lints that we already have eliminated from the codebase so they don't show up in the future
#![forbid(unsafe_code)]
#![forbid(trivial_casts)]
#![forbid(trivial_numeric_casts)]
#![forbid(non_ascii_idents)]
#![forbid(unused_extern_crates)]
#![forbid(unused_import_braces)]
#![forbid(redundant_lifetimes)]
#![forbid(single_use_lifetimes)]
#![forbid(unused_crate_dependencies)]
#![forbid(unused_lifetimes)]
#![forbid(unused_macro_rules)]
#![forbid(macro_use_extern_crate)]
#![forbid(missing_unsafe_on_extern)]

mod bit_helper;
mod cabac_codec;
mod deflate;
mod diff_stream;
mod estimator;
mod hash_chain;
mod huffman_calc;
mod meta_block;
mod preflate_error;
mod preflate_input;
mod progress;
mod scheduler;
mod statistical_codec;
mod stream_processor;
mod token_predictor;
mod tree_predictor;
mod utils;

// only the integration tests compress with the native zlib
#[cfg(test)]
use libz_sys as _;

pub use estimator::preflate_parameter_estimator::TokenPredictorParameters;
pub use preflate_error::ExitCode;
pub use preflate_error::{AddContext, PreflateError, Result, err_exit_code};
pub use progress::{NoProgress, ProgressCounter, ProgressSink};

pub use stream_processor::{
    DecodeSummary, PreflateStreamResult, ReencodeSummary, preflate_decode, preflate_reencode,
    preflate_whole_deflate_stream, recreate_whole_deflate_stream,
};

/// smallest meta-block size that is accepted, anything smaller is rounded up
pub const MIN_META_BLOCK_SIZE: usize = 256 * 1024;

/// largest meta-block size that is accepted
pub const MAX_META_BLOCK_SIZE: usize = (1 << 31) - 1;

/// Configure the decode and reencode of a deflate stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflateConfig {
    /// Amount of inflated data after which the stream is split into a new
    /// meta-block (at the next block boundary). Meta-blocks are processed in
    /// parallel, so smaller ones use more cores but cost more diff overhead.
    pub meta_block_size: usize,

    /// Number of worker threads. Zero shares a process wide pool with one thread
    /// per cpu.
    pub worker_threads: usize,

    /// Maximum number of lookups we will do in the hash chain. This will limit the
    /// amount of CPU time we spend on each meta-block.
    pub max_chain_length: u32,

    /// Decode the corrections again right after they were created and verify that
    /// they recreate exactly the same blocks. This will slow down processing and
    /// isn't necessary if you are already doing end-to-end verification of the data.
    pub verify: bool,
}

impl Default for PreflateConfig {
    fn default() -> Self {
        Self {
            meta_block_size: 2 * 1024 * 1024,
            worker_threads: 0,
            max_chain_length: 4096,
            verify: true,
        }
    }
}

impl PreflateConfig {
    /// the meta-block size clamped to the supported range
    pub fn effective_meta_block_size(&self) -> usize {
        self.meta_block_size
            .clamp(MIN_META_BLOCK_SIZE, MAX_META_BLOCK_SIZE)
    }
}

#[cfg(test)]
static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize the logger for tests. This is a no-op if the logger is already initialized.
#[cfg(test)]
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[test]
fn meta_block_size_is_clamped() {
    let mut config = PreflateConfig {
        meta_block_size: 1000,
        ..PreflateConfig::default()
    };
    assert_eq!(config.effective_meta_block_size(), MIN_META_BLOCK_SIZE);

    config.meta_block_size = usize::MAX;
    assert_eq!(config.effective_meta_block_size(), MAX_META_BLOCK_SIZE);

    config.meta_block_size = 3 * 1024 * 1024;
    assert_eq!(config.effective_meta_block_size(), 3 * 1024 * 1024);
}
