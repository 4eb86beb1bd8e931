/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use bitcode::{Decode, Encode};

use crate::{
    PreflateConfig,
    bit_helper::bit_length,
    deflate::{deflate_constants::MIN_LOOKAHEAD, deflate_token::DeflateTokenBlock},
    preflate_input::PlainText,
};

use super::{
    complevel_estimator::estimate_preflate_comp_level,
    preflate_parse_config::{DictionaryAddPolicy, MatchTieBreak, MatchingType},
    preflate_stream_info::{PreflateStreamInfo, extract_preflate_info},
};

/// which kind of block the first block of a meta-block is predicted to be
#[derive(Encode, Decode, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BlockTypeStrategy {
    #[default]
    Dynamic,
    Mixed,
    Static,
    Uncompressed,
}

/// The encoder configuration the token predictor imitates. Estimated once per
/// meta-block and stored in the diff so the reencoder never has to estimate.
#[derive(Encode, Decode, Debug, Copy, Clone, Eq, PartialEq)]
pub struct TokenPredictorParameters {
    pub window_bits: u32,

    /// if there are matches that have a distance larger than window_size - MAX_MATCH.
    /// Zlib does not allow these.
    pub very_far_matches_detected: bool,

    pub matching_type: MatchingType,

    /// if something, then we use the "fast" compressor, which only adds smaller substrings
    /// to the dictionary
    pub add_policy: DictionaryAddPolicy,

    pub nice_length: u32,
    pub max_chain: u32,

    /// matches of length 3 further than this are written as literals
    pub max_dist_3_matches: u32,

    pub tie_break: MatchTieBreak,

    /// zlib keeps the match found by the lazy search for the next position
    pub zlib_compatible: bool,

    pub max_token_count: u32,

    pub block_type_strategy: BlockTypeStrategy,
}

impl Default for TokenPredictorParameters {
    /// zlib level 6 with the default window and memory level
    fn default() -> Self {
        Self {
            window_bits: 15,
            very_far_matches_detected: false,
            matching_type: MatchingType::Lazy {
                good_length: 8,
                max_lazy: 16,
            },
            add_policy: DictionaryAddPolicy::AddAll,
            nice_length: 128,
            max_chain: 128,
            max_dist_3_matches: 4096,
            tie_break: MatchTieBreak::Nearest,
            zlib_compatible: true,
            max_token_count: 16383,
            block_type_strategy: BlockTypeStrategy::Dynamic,
        }
    }
}

impl TokenPredictorParameters {
    /// furthest distance the match search looks back
    pub fn max_dist(&self) -> u32 {
        if self.very_far_matches_detected {
            1 << self.window_bits
        } else {
            (1 << self.window_bits) - MIN_LOOKAHEAD
        }
    }
}

/// From the plain text and the blocks of a meta-block, estimate the parameters that
/// reproduce the encoder's choices most closely.
pub fn estimate_preflate_parameters(
    blocks: &[DeflateTokenBlock],
    plain_text: &PlainText,
    config: &PreflateConfig,
) -> TokenPredictorParameters {
    let info = extract_preflate_info(blocks);

    let window_bits = estimate_preflate_window_bits(info.max_dist);
    let mem_level = estimate_preflate_mem_level(info.max_tokens_per_block);
    let very_far_matches_detected = info.max_dist > (1 << window_bits) - MIN_LOOKAHEAD;

    let base = TokenPredictorParameters {
        window_bits,
        very_far_matches_detected,
        max_dist_3_matches: if info.max_dist_3_matches <= 4096 {
            4096
        } else {
            32768
        },
        zlib_compatible: !very_far_matches_detected,
        max_token_count: (1 << (6 + mem_level)) - 1,
        block_type_strategy: estimate_block_type_strategy(&info),
        ..TokenPredictorParameters::default()
    };

    if info.reference_count == 0 {
        // no dictionary used, so don't predict any matches
        return TokenPredictorParameters {
            matching_type: MatchingType::Greedy,
            max_chain: 0,
            ..base
        };
    }

    estimate_preflate_comp_level(&base, blocks, plain_text, config.max_chain_length)
}

fn estimate_preflate_mem_level(max_block_size: u32) -> u32 {
    bit_length(max_block_size).clamp(7, 15) - 6
}

fn estimate_preflate_window_bits(max_dist: u32) -> u32 {
    bit_length(max_dist + MIN_LOOKAHEAD - 1).clamp(9, 15)
}

fn estimate_block_type_strategy(info: &PreflateStreamInfo) -> BlockTypeStrategy {
    let huffman_blocks = info.count_blocks - info.count_stored_blocks;

    if huffman_blocks == 0 {
        BlockTypeStrategy::Uncompressed
    } else if info.count_static_huff_tree_blocks == huffman_blocks {
        BlockTypeStrategy::Static
    } else if info.count_static_huff_tree_blocks == 0 {
        BlockTypeStrategy::Dynamic
    } else {
        BlockTypeStrategy::Mixed
    }
}

#[test]
fn window_and_mem_level() {
    assert_eq!(estimate_preflate_window_bits(32768), 15);
    assert_eq!(estimate_preflate_window_bits(1000), 11);
    assert_eq!(estimate_preflate_window_bits(1), 9);

    // zlib's default of 16K - 1 tokens per block
    assert_eq!(estimate_preflate_mem_level(16383), 8);
    assert_eq!(estimate_preflate_mem_level(0), 1);
}

#[test]
fn stored_only_stream() {
    use crate::deflate::deflate_reader::parse_deflate_whole;

    let data = crate::utils::test_data(100000, 4);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 0);
    let contents = parse_deflate_whole(&compressed).unwrap();

    let params = estimate_preflate_parameters(
        &contents.blocks,
        &contents.plain_text,
        &PreflateConfig::default(),
    );

    assert_eq!(params.block_type_strategy, BlockTypeStrategy::Uncompressed);
    assert_eq!(params.max_chain, 0);
}

#[test]
fn serialized_parameters_roundtrip() {
    let params = TokenPredictorParameters {
        add_policy: DictionaryAddPolicy::AddFirst(5),
        tie_break: MatchTieBreak::Farthest,
        ..TokenPredictorParameters::default()
    };

    let bytes = bitcode::encode(&params);
    let decoded: TokenPredictorParameters = bitcode::decode(&bytes).unwrap();
    assert_eq!(params, decoded);
}
