/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! The work done for a single meta-block. Both directions are split into a part
//! that only looks at the meta-block itself (run on the worker pool) and a part
//! that has to see the meta-blocks in order (run by the driving thread).

use std::io::Cursor;

use cabac::vp8::{VP8Context, VP8Reader, VP8Writer};
use log::{debug, trace};

use crate::{
    PreflateConfig,
    cabac_codec::{PredictionDecoderCabac, PredictionEncoderCabac, corrupt},
    deflate::deflate_token::DeflateTokenBlock,
    diff_stream::{MetaBlockRecord, ModelKind, ModelRecord},
    estimator::preflate_parameter_estimator::{
        TokenPredictorParameters, estimate_preflate_parameters,
    },
    preflate_error::{AddContext, ExitCode, PreflateError, Result, err_exit_code},
    preflate_input::{PlainText, PreflateInput},
    progress::ProgressSink,
    statistical_codec::{
        DefaultOnlyDecoder, PredictionDecoder, RecordingPredictionEncoder, drive_encoder,
    },
    token_predictor::{TokenPredictor, predict_tail_padding, recreate_tail_padding},
};

/// a run of this many blocks without any data can only come from a corrupted diff
const MAX_EMPTY_BLOCKS_IN_A_ROW: u32 = 1024;

/// A meta-block as read from the DEFLATE stream, waiting to be analyzed.
#[derive(Debug)]
pub struct DecodeTask {
    pub id: usize,
    pub blocks: Vec<DeflateTokenBlock>,
    pub plain_text: PlainText,
    pub final_meta_block: bool,

    /// only meaningful for the final meta-block
    pub tail_padding_bits: u8,
}

/// the result of analyzing a meta-block, ready to be written out
#[derive(Debug)]
pub struct AnalyzedMetaBlock {
    pub id: usize,
    pub record: MetaBlockRecord,
    pub plain_text: PlainText,
}

impl DecodeTask {
    /// Estimates the parameters, predicts every block and stores the corrections
    /// with the cheapest model. With verification on, the corrections are decoded
    /// again and have to give back exactly the same blocks.
    pub fn analyze(
        self,
        config: &PreflateConfig,
        progress: &dyn ProgressSink,
    ) -> Result<AnalyzedMetaBlock> {
        let params = estimate_preflate_parameters(&self.blocks, &self.plain_text, config);
        debug!(
            "meta-block {} at {} len {}: {:?}",
            self.id,
            self.plain_text.text_offset(),
            self.plain_text.len(),
            params
        );

        let mut recorder = RecordingPredictionEncoder::new();
        let mut input = PreflateInput::new(&self.plain_text);
        let mut predictor = TokenPredictor::new(&params, &input);

        let last_index = self.blocks.len().saturating_sub(1);
        for (i, block) in self.blocks.iter().enumerate() {
            predictor
                .predict_block(
                    block,
                    &mut recorder,
                    &mut input,
                    i == last_index,
                    self.final_meta_block,
                )
                .with_context(|| format!("meta-block {} block {}", self.id, i))?;

            progress.on_block(block.plain_text_len() as u64);
        }

        if self.final_meta_block {
            predict_tail_padding(self.tail_padding_bits, &mut recorder);
        }

        recorder.count().log_counts();

        let kind = if recorder.count().is_all_default() {
            ModelKind::Perfect
        } else {
            ModelKind::Adaptive
        };
        trace!(
            "meta-block {}: {} corrections, {:?} model",
            self.id,
            recorder.count_nondefault_actions(),
            kind
        );

        let corrections = match kind {
            ModelKind::Perfect => Vec::new(),
            ModelKind::Adaptive => {
                let mut buffer = Vec::new();
                let mut encoder =
                    PredictionEncoderCabac::<_, VP8Context>::new(VP8Writer::new(&mut buffer)?);
                drive_encoder(&mut encoder, recorder.actions());
                encoder.finish_stream()?;
                buffer
            }
        };

        let record = MetaBlockRecord {
            model: ModelRecord { kind, params },
            inflated_size: self.plain_text.len() as u64,
            crc32: crc32fast::hash(self.plain_text.text()),
            is_last: self.final_meta_block,
            corrections,
        };

        if config.verify {
            self.verify(&record)?;
        }

        Ok(AnalyzedMetaBlock {
            id: self.id,
            record,
            plain_text: self.plain_text,
        })
    }

    fn verify(&self, record: &MetaBlockRecord) -> Result<()> {
        let (blocks, tail_padding_bits) = recreate_meta_block(
            &record.model,
            &record.corrections,
            &self.plain_text,
            self.final_meta_block,
        )
        .map_err(|e| {
            PreflateError::new(
                ExitCode::RoundtripMismatch,
                format!("meta-block {} failed to verify: {}", self.id, e),
            )
        })?;

        if blocks != self.blocks {
            return err_exit_code(
                ExitCode::RoundtripMismatch,
                format!("meta-block {} recreated different blocks", self.id),
            );
        }
        if self.final_meta_block && tail_padding_bits != self.tail_padding_bits {
            return err_exit_code(
                ExitCode::RoundtripMismatch,
                format!("meta-block {} recreated different tail padding", self.id),
            );
        }

        Ok(())
    }
}

/// A meta-block read from the diff together with its payload, waiting to be
/// turned back into blocks.
#[derive(Debug)]
pub struct ReencodeTask {
    pub id: usize,
    pub record: MetaBlockRecord,
    pub plain_text: PlainText,
}

/// the recreated blocks of a meta-block, ready to be written to the DEFLATE stream
#[derive(Debug)]
pub struct RepredictedMetaBlock {
    pub id: usize,
    pub blocks: Vec<DeflateTokenBlock>,
    pub final_meta_block: bool,
    pub tail_padding_bits: u8,
}

impl ReencodeTask {
    pub fn decode_and_repredict(self, progress: &dyn ProgressSink) -> Result<RepredictedMetaBlock> {
        if crc32fast::hash(self.plain_text.text()) != self.record.crc32 {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("payload of meta-block {} doesn't match the diff", self.id),
            );
        }

        let (blocks, tail_padding_bits) = recreate_meta_block(
            &self.record.model,
            &self.record.corrections,
            &self.plain_text,
            self.record.is_last,
        )
        .with_context(|| format!("meta-block {}", self.id))?;

        for b in &blocks {
            progress.on_block(b.plain_text_len() as u64);
        }

        Ok(RepredictedMetaBlock {
            id: self.id,
            blocks,
            final_meta_block: self.record.is_last,
            tail_padding_bits,
        })
    }
}

/// decodes the blocks of a meta-block with the decoder matching the model kind
fn recreate_meta_block(
    model: &ModelRecord,
    corrections: &[u8],
    plain_text: &PlainText,
    final_meta_block: bool,
) -> Result<(Vec<DeflateTokenBlock>, u8)> {
    match model.kind {
        ModelKind::Perfect => recreate_blocks(
            &model.params,
            &mut DefaultOnlyDecoder::default(),
            plain_text,
            final_meta_block,
        ),
        ModelKind::Adaptive => {
            let reader = VP8Reader::new(Cursor::new(corrections)).map_err(corrupt)?;
            let mut decoder = PredictionDecoderCabac::<_, VP8Context>::new(reader);
            let r = recreate_blocks(&model.params, &mut decoder, plain_text, final_meta_block)?;
            decoder.finish()?;
            Ok(r)
        }
    }
}

fn recreate_blocks<D: PredictionDecoder>(
    params: &TokenPredictorParameters,
    decoder: &mut D,
    plain_text: &PlainText,
    final_meta_block: bool,
) -> Result<(Vec<DeflateTokenBlock>, u8)> {
    let mut input = PreflateInput::new(plain_text);
    let mut predictor = TokenPredictor::new(params, &input);
    let mut blocks = Vec::new();
    let mut empty_in_a_row = 0;

    loop {
        let (block, end_of_meta_block) = predictor
            .recreate_block(decoder, &mut input, final_meta_block)
            .with_context(|| format!("block {}", blocks.len()))?;

        if block.plain_text_len() == 0 {
            empty_in_a_row += 1;
            if empty_in_a_row > MAX_EMPTY_BLOCKS_IN_A_ROW {
                return err_exit_code(
                    ExitCode::InvalidPredictionData,
                    "too many empty blocks in a row",
                );
            }
        } else {
            empty_in_a_row = 0;
        }

        blocks.push(block);
        if end_of_meta_block {
            break;
        }
    }

    if input.remaining() != 0 {
        return err_exit_code(
            ExitCode::InvalidPredictionData,
            format!("meta-block ended with {} bytes left", input.remaining()),
        );
    }

    let tail_padding_bits = if final_meta_block {
        recreate_tail_padding(decoder)?
    } else {
        0
    };

    Ok((blocks, tail_padding_bits))
}

#[cfg(test)]
fn decode_task_for(compressed: &[u8]) -> DecodeTask {
    let contents = crate::deflate::deflate_reader::parse_deflate_whole(compressed).unwrap();
    DecodeTask {
        id: 0,
        blocks: contents.blocks,
        plain_text: contents.plain_text,
        final_meta_block: true,
        tail_padding_bits: contents.tail_padding_bits,
    }
}

#[test]
fn analyze_and_repredict_miniz_levels() {
    use crate::progress::ProgressCounter;

    crate::init_logging();

    let data = crate::utils::test_data(60000, 21);
    for level in [0, 1, 6, 9] {
        let compressed = miniz_oxide::deflate::compress_to_vec(&data, level);
        let task = decode_task_for(&compressed);
        let blocks = task.blocks.clone();

        let progress = ProgressCounter::new();
        let analyzed = task
            .analyze(&PreflateConfig::default(), &progress)
            .unwrap();
        assert_eq!(progress.bytes(), data.len() as u64);
        assert_eq!(analyzed.record.inflated_size, data.len() as u64);

        let reencode = ReencodeTask {
            id: 0,
            record: analyzed.record,
            plain_text: analyzed.plain_text,
        };
        let repredicted = reencode.decode_and_repredict(&progress).unwrap();
        assert!(repredicted.blocks == blocks, "level {level}");
        assert_eq!(repredicted.tail_padding_bits, 0);
    }
}

#[test]
fn predictor_generated_stream_needs_no_corrections() {
    use crate::{
        deflate::deflate_writer::write_deflate_blocks, progress::NoProgress,
        token_predictor::generate_predicted_blocks,
    };

    let plain_text = PlainText::new_with_data(crate::utils::test_data(50000, 22));
    let blocks = generate_predicted_blocks(&plain_text, &TokenPredictorParameters::default());
    let compressed = write_deflate_blocks(&blocks, 0);

    let analyzed = decode_task_for(&compressed)
        .analyze(&PreflateConfig::default(), &NoProgress)
        .unwrap();

    assert_eq!(analyzed.record.model.kind, ModelKind::Perfect);
    assert!(analyzed.record.corrections.is_empty());
}

#[test]
fn wrong_payload_is_rejected() {
    use crate::progress::NoProgress;

    let data = crate::utils::test_data(20000, 23);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 6);
    let analyzed = decode_task_for(&compressed)
        .analyze(&PreflateConfig::default(), &NoProgress)
        .unwrap();

    let mut changed = data.clone();
    changed[100] ^= 1;
    let mut plain_text = PlainText::new();
    plain_text.append(&changed);

    let e = ReencodeTask {
        id: 0,
        record: analyzed.record,
        plain_text,
    }
    .decode_and_repredict(&NoProgress)
    .unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);
}
