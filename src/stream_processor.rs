/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Drives a whole deflate stream through the meta-block pipeline in both directions.
//! Reading the input and writing the output happen on the calling thread, the
//! prediction work of each meta-block on the worker pool.

use std::{io::Write, sync::Arc};

use log::debug;

use crate::{
    PreflateConfig,
    deflate::{
        bit_reader::BitReader, deflate_constants::MAX_WINDOW_SIZE,
        deflate_reader::DeflateParser, deflate_writer::DeflateWriter,
    },
    diff_stream::{DiffReader, DiffWriter},
    meta_block::{AnalyzedMetaBlock, DecodeTask, ReencodeTask, RepredictedMetaBlock},
    preflate_error::{AddContext, ExitCode, PreflateError, Result},
    preflate_input::PlainText,
    progress::{NoProgress, ProgressSink},
    scheduler::{OrderedOutput, TaskQueue, WorkerPool, queue_capacity},
};

/// what preflate_decode did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    /// bytes of the compressed input that belong to the deflate stream, including
    /// the byte holding the final padding bits
    pub compressed_size: usize,
    pub payload_size: u64,
    pub meta_block_count: usize,
}

/// what preflate_reencode did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReencodeSummary {
    pub compressed_size: u64,
    pub payload_size: u64,
    pub meta_block_count: usize,
}

/// Either the process wide pool or one created for a single call
enum PoolRef {
    Global(&'static WorkerPool),
    Owned(WorkerPool),
}

impl PoolRef {
    fn new(config: &PreflateConfig) -> Self {
        if config.worker_threads == 0 {
            PoolRef::Global(WorkerPool::global())
        } else {
            PoolRef::Owned(WorkerPool::new(config.worker_threads))
        }
    }

    fn pool(&self) -> &WorkerPool {
        match self {
            PoolRef::Global(p) => p,
            PoolRef::Owned(p) => p,
        }
    }
}

/// writes the analyzed meta-blocks in order to the payload and the diff
struct DecodeOutput<'a, P: Write, D: Write> {
    diff_writer: DiffWriter,
    payload_out: &'a mut P,
    diff_out: &'a mut D,
    payload_size: u64,
    meta_block_count: usize,
}

impl<P: Write, D: Write> OrderedOutput<AnalyzedMetaBlock> for DecodeOutput<'_, P, D> {
    fn write_result(&mut self, result: AnalyzedMetaBlock) -> Result<()> {
        debug!(
            "writing meta-block {} ({} bytes, {} correction bytes)",
            result.id,
            result.record.inflated_size,
            result.record.corrections.len()
        );

        self.diff_writer.write_meta_block(&result.record);
        self.diff_out
            .write_all(&self.diff_writer.detach_output())
            .context()?;
        self.payload_out
            .write_all(result.plain_text.text())
            .context()?;

        self.payload_size += result.record.inflated_size;
        self.meta_block_count += 1;
        Ok(())
    }
}

/// Decompresses the deflate stream at the start of compressed, writing the inflated
/// data to payload_out and everything needed to recreate the exact stream to diff_out.
///
/// On failure whatever was already written to the outputs has to be discarded.
pub fn preflate_decode(
    compressed: &[u8],
    payload_out: &mut impl Write,
    diff_out: &mut impl Write,
    progress: Arc<dyn ProgressSink>,
    config: &PreflateConfig,
) -> Result<DecodeSummary> {
    let pool = PoolRef::new(config);
    let pool = pool.pool();

    let threshold = config.effective_meta_block_size();
    let mut queue = TaskQueue::new(pool, queue_capacity(pool.thread_count(), threshold));

    let mut output = DecodeOutput {
        diff_writer: DiffWriter::new(),
        payload_out,
        diff_out,
        payload_size: 0,
        meta_block_count: 0,
    };

    let mut bit_reader = BitReader::new(compressed);
    let mut parser = DeflateParser::new();
    let mut blocks = Vec::new();
    let mut id = 0;
    let mut input_error = None;

    while !parser.is_done() && !queue.has_failed() {
        let block = match parser
            .read_block(&mut bit_reader)
            .with_context(|| format!("meta-block {id} block {}", blocks.len()))
        {
            Ok(b) => b,
            Err(e) => {
                input_error = Some(e);
                break;
            }
        };
        blocks.push(block);

        let done = parser.is_done();
        if !done && parser.plain_text().len() < threshold {
            continue;
        }

        let tail_padding_bits = if done {
            match bit_reader.read_padding_bits() {
                Ok((bits, _)) => bits,
                Err(e) => {
                    input_error = Some(e);
                    break;
                }
            }
        } else {
            0
        };

        let task = DecodeTask {
            id,
            blocks: std::mem::take(&mut blocks),
            plain_text: parser.split_off_meta_block(),
            final_meta_block: done,
            tail_padding_bits,
        };
        debug!(
            "meta-block {} at {} with {} bytes and {} blocks",
            id,
            task.plain_text.text_offset(),
            task.plain_text.len(),
            task.blocks.len()
        );

        let config = *config;
        let progress = progress.clone();
        queue.submit(
            move || task.analyze(&config, progress.as_ref()),
            &mut output,
        );
        id += 1;
    }

    // errors of the earlier meta-blocks come first
    queue.finish(&mut output)?;
    if let Some(e) = input_error {
        return Err(e);
    }

    output.diff_out.flush().context()?;
    output.payload_out.flush().context()?;

    Ok(DecodeSummary {
        compressed_size: (bit_reader.bit_pos() / 8) as usize,
        payload_size: output.payload_size,
        meta_block_count: output.meta_block_count,
    })
}

/// writes the recreated blocks in order to the deflate stream
struct ReencodeOutput<'a, W: Write> {
    writer: DeflateWriter,
    output: &'a mut W,
    compressed_size: u64,
}

impl<W: Write> OrderedOutput<RepredictedMetaBlock> for ReencodeOutput<'_, W> {
    fn write_result(&mut self, result: RepredictedMetaBlock) -> Result<()> {
        debug!(
            "writing meta-block {} ({} blocks)",
            result.id,
            result.blocks.len()
        );

        for b in &result.blocks {
            self.writer.encode_block(b);
        }

        if result.final_meta_block {
            self.writer.finish_stream(result.tail_padding_bits);
        } else {
            self.writer.flush();
        }

        let bytes = self.writer.detach_output();
        self.compressed_size += bytes.len() as u64;
        self.output.write_all(&bytes).context()
    }
}

fn payload_mismatch(message: &str) -> PreflateError {
    PreflateError::new(ExitCode::InvalidPredictionData, message)
}

/// Recreates the original deflate stream from the payload and the diff that
/// preflate_decode wrote for it.
pub fn preflate_reencode(
    diff: &[u8],
    payload: &[u8],
    output: &mut impl Write,
    progress: Arc<dyn ProgressSink>,
    config: &PreflateConfig,
) -> Result<ReencodeSummary> {
    let pool = PoolRef::new(config);
    let pool = pool.pool();

    let threshold = config.effective_meta_block_size();
    let mut queue = TaskQueue::new(pool, queue_capacity(pool.thread_count(), threshold));

    let mut sink = ReencodeOutput {
        writer: DeflateWriter::new(),
        output,
        compressed_size: 0,
    };

    let mut reader = DiffReader::new(diff)?;
    let mut offset = 0usize;
    let mut id = 0;
    let mut input_error = None;

    while !queue.has_failed() {
        let record = match reader.read_meta_block().with_context(|| format!("meta-block {id}")) {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(e) => {
                input_error = Some(e);
                break;
            }
        };

        let size = match usize::try_from(record.inflated_size) {
            Ok(size) if size <= payload.len() - offset => size,
            _ => {
                input_error = Some(payload_mismatch(
                    "payload is shorter than the size recorded in the diff",
                ));
                break;
            }
        };

        let window = offset.min(MAX_WINDOW_SIZE as usize);
        let mut plain_text = PlainText::new_with_prefix(&payload[offset - window..offset], offset as u64);
        plain_text.append(&payload[offset..offset + size]);
        offset += size;

        let is_last = record.is_last;
        let task = ReencodeTask {
            id,
            record,
            plain_text,
        };

        let progress = progress.clone();
        queue.submit(
            move || task.decode_and_repredict(progress.as_ref()),
            &mut sink,
        );
        id += 1;

        if is_last && offset != payload.len() {
            input_error = Some(payload_mismatch(
                "payload is longer than the size recorded in the diff",
            ));
            break;
        }
    }

    queue.finish(&mut sink)?;
    if let Some(e) = input_error {
        return Err(e);
    }

    sink.output.flush().context()?;

    Ok(ReencodeSummary {
        compressed_size: sink.compressed_size,
        payload_size: offset as u64,
        meta_block_count: id,
    })
}

/// result of decoding an entire in-memory deflate stream
#[derive(Debug)]
pub struct PreflateStreamResult {
    pub plain_text: Vec<u8>,
    pub diff: Vec<u8>,

    /// number of bytes of the input that were part of the deflate stream
    pub compressed_size: usize,
    pub meta_block_count: usize,
}

/// decodes a deflate stream held in memory, returning nothing unless it fully succeeded
pub fn preflate_whole_deflate_stream(
    compressed_data: &[u8],
    config: &PreflateConfig,
) -> Result<PreflateStreamResult> {
    let mut plain_text = Vec::new();
    let mut diff = Vec::new();

    let summary = preflate_decode(
        compressed_data,
        &mut plain_text,
        &mut diff,
        Arc::new(NoProgress),
        config,
    )?;

    Ok(PreflateStreamResult {
        plain_text,
        diff,
        compressed_size: summary.compressed_size,
        meta_block_count: summary.meta_block_count,
    })
}

/// recreates the deflate stream in memory from the diff and the plain text
pub fn recreate_whole_deflate_stream(
    diff: &[u8],
    plain_text: &[u8],
    config: &PreflateConfig,
) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    preflate_reencode(diff, plain_text, &mut output, Arc::new(NoProgress), config)?;
    Ok(output)
}

#[test]
fn roundtrip_small_meta_blocks() {
    crate::init_logging();

    let data = crate::utils::test_data(700_000, 31);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 6);

    let config = PreflateConfig {
        meta_block_size: 256 * 1024,
        worker_threads: 2,
        ..PreflateConfig::default()
    };

    let r = preflate_whole_deflate_stream(&compressed, &config).unwrap();
    assert_eq!(r.plain_text, data);
    assert_eq!(r.compressed_size, compressed.len());
    assert!(r.meta_block_count >= 2, "{}", r.meta_block_count);

    let recreated = recreate_whole_deflate_stream(&r.diff, &r.plain_text, &config).unwrap();
    assert!(recreated == compressed);
}

#[test]
fn trailing_data_is_not_consumed() {
    let data = crate::utils::test_data(5000, 32);
    let mut compressed = miniz_oxide::deflate::compress_to_vec(&data, 9);
    let stream_len = compressed.len();
    compressed.extend_from_slice(b"trailing garbage");

    let r = preflate_whole_deflate_stream(&compressed, &PreflateConfig::default()).unwrap();
    assert_eq!(r.compressed_size, stream_len);

    let recreated =
        recreate_whole_deflate_stream(&r.diff, &r.plain_text, &PreflateConfig::default()).unwrap();
    assert_eq!(recreated[..], compressed[..stream_len]);
}

#[test]
fn progress_is_reported() {
    use crate::progress::ProgressCounter;

    let data = crate::utils::test_data(40000, 33);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 4);

    let progress = Arc::new(ProgressCounter::new());
    let mut payload = Vec::new();
    let mut diff = Vec::new();
    let summary = preflate_decode(
        &compressed,
        &mut payload,
        &mut diff,
        progress.clone(),
        &PreflateConfig::default(),
    )
    .unwrap();

    assert_eq!(summary.payload_size, data.len() as u64);
    assert_eq!(progress.bytes(), data.len() as u64);
    assert!(progress.blocks() >= 1);

    let reencode_progress = Arc::new(ProgressCounter::new());
    let mut output = Vec::new();
    let summary = preflate_reencode(
        &diff,
        &payload,
        &mut output,
        reencode_progress.clone(),
        &PreflateConfig::default(),
    )
    .unwrap();

    assert_eq!(summary.compressed_size, compressed.len() as u64);
    assert_eq!(reencode_progress.blocks(), progress.blocks());
    assert!(output == compressed);
}
