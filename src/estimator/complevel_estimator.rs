/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Detects which zlib compression level "personality" produced the tokens. Each
//! candidate is scored by running the token predictor over a sample of the
//! tokens and counting how often it guessed wrong.

use crate::{
    deflate::deflate_token::{DeflateTokenBlock, DeflateTokenBlockType},
    preflate_input::{PlainText, PreflateInput},
    statistical_codec::CountNonDefaultActions,
    token_predictor::TokenPredictor,
};

use super::{
    preflate_parameter_estimator::TokenPredictorParameters,
    preflate_parse_config::{MatchTieBreak, ZLIB_PARSER_SETTINGS},
};

/// number of tokens from the start of the meta-block each candidate is tried on
const SAMPLE_TOKENS: usize = 8192;

/// Counts the mispredictions of the candidate over the sample. Gives up once the
/// count is above abort_above since the candidate can't win anymore.
fn count_mispredictions(
    params: &TokenPredictorParameters,
    blocks: &[DeflateTokenBlock],
    plain_text: &PlainText,
    abort_above: u32,
) -> u32 {
    let mut input = PreflateInput::new(plain_text);
    let mut predictor = TokenPredictor::new(params, &input);
    let mut counter = CountNonDefaultActions::default();
    let mut tokens_seen = 0;

    for b in blocks {
        match &b.block_type {
            DeflateTokenBlockType::Stored { uncompressed, .. } => {
                input.advance(uncompressed.len() as u32);
            }
            DeflateTokenBlockType::Huffman { tokens, .. } => {
                for t in tokens {
                    if predictor
                        .predict_single_token(t, &mut counter, &mut input)
                        .is_err()
                    {
                        return u32::MAX;
                    }

                    tokens_seen += 1;
                    if counter.total_non_default > abort_above || tokens_seen >= SAMPLE_TOKENS {
                        return counter.total_non_default;
                    }
                }
            }
        }
    }

    counter.total_non_default
}

/// keeps the candidate if it is strictly better than the best so far
fn try_candidate(
    candidate: TokenPredictorParameters,
    blocks: &[DeflateTokenBlock],
    plain_text: &PlainText,
    best: &mut (TokenPredictorParameters, u32),
) {
    let count = count_mispredictions(&candidate, blocks, plain_text, best.1);
    if count < best.1 {
        *best = (candidate, count);
    }
}

/// Tries the zlib levels, then the tie break and lazy match variants of the best
/// one, returning the parameters with the fewest mispredictions. Ties go to the
/// candidate tried first.
pub fn estimate_preflate_comp_level(
    base: &TokenPredictorParameters,
    blocks: &[DeflateTokenBlock],
    plain_text: &PlainText,
    max_chain_limit: u32,
) -> TokenPredictorParameters {
    let mut best = (*base, u32::MAX);

    for config in ZLIB_PARSER_SETTINGS.iter() {
        let candidate = TokenPredictorParameters {
            matching_type: config.match_type,
            add_policy: config.add_policy,
            nice_length: config.nice_length,
            max_chain: config.max_chain.min(max_chain_limit),
            tie_break: MatchTieBreak::Nearest,
            ..*base
        };
        try_candidate(candidate, blocks, plain_text, &mut best);
    }

    let level = best.0;
    let farthest = TokenPredictorParameters {
        tie_break: MatchTieBreak::Farthest,
        ..level
    };
    try_candidate(farthest, blocks, plain_text, &mut best);

    let toggled = TokenPredictorParameters {
        zlib_compatible: !level.zlib_compatible,
        ..level
    };
    try_candidate(toggled, blocks, plain_text, &mut best);

    log::debug!(
        "estimated parameters {:?} with {} mispredictions in sample",
        best.0,
        best.1
    );

    best.0
}

/// a stream written by the predictor with zlib level 1 settings is recognized as such
#[test]
fn recognize_generated_level() {
    use super::preflate_parameter_estimator::estimate_preflate_parameters;
    use crate::token_predictor::generate_predicted_blocks;

    let plain_text = PlainText::new_with_data(crate::utils::test_data(100000, 9));

    let config = &ZLIB_PARSER_SETTINGS[0];
    let params = TokenPredictorParameters {
        matching_type: config.match_type,
        add_policy: config.add_policy,
        nice_length: config.nice_length,
        max_chain: config.max_chain,
        ..TokenPredictorParameters::default()
    };

    let blocks = generate_predicted_blocks(&plain_text, &params);
    let estimated =
        estimate_preflate_parameters(&blocks, &plain_text, &crate::PreflateConfig::default());

    assert_eq!(estimated.matching_type, params.matching_type);
    assert_eq!(estimated.add_policy, params.add_policy);
    assert_eq!(estimated.nice_length, params.nice_length);
    assert_eq!(estimated.max_chain, params.max_chain);
    assert_eq!(estimated.tie_break, MatchTieBreak::Nearest);
}

/// the chain length never goes above the configured limit
#[test]
fn max_chain_is_limited() {
    let plain_text = PlainText::new_with_data(crate::utils::test_data(20000, 10));
    let compressed = miniz_oxide::deflate::compress_to_vec(plain_text.text(), 9);
    let contents = crate::deflate::deflate_reader::parse_deflate_whole(&compressed).unwrap();

    let estimated = estimate_preflate_comp_level(
        &TokenPredictorParameters::default(),
        &contents.blocks,
        &contents.plain_text,
        16,
    );
    assert!(estimated.max_chain <= 16);
}
