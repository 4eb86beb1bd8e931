/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::deflate::deflate_token::{
    DeflateHuffmanType, DeflateToken, DeflateTokenBlock, DeflateTokenBlockType,
};

/// Summary statistics over the blocks of a meta-block, gathered in one pass
#[derive(Debug, Default)]
pub struct PreflateStreamInfo {
    pub token_count: u32,
    pub literal_count: u32,
    pub reference_count: u32,
    pub max_dist: u32,
    pub max_tokens_per_block: u32,
    pub count_blocks: u32,
    pub count_stored_blocks: u32,
    pub count_static_huff_tree_blocks: u32,
    pub max_dist_3_matches: u32,
}

fn process_tokens(tokens: &[DeflateToken], result: &mut PreflateStreamInfo) {
    result.token_count += tokens.len() as u32;
    result.max_tokens_per_block = result.max_tokens_per_block.max(tokens.len() as u32);

    for t in tokens {
        match t {
            DeflateToken::Literal(_) => {
                result.literal_count += 1;
            }
            DeflateToken::Reference(r) => {
                result.reference_count += 1;
                result.max_dist = result.max_dist.max(r.dist());

                if r.len() == 3 {
                    result.max_dist_3_matches = result.max_dist_3_matches.max(r.dist());
                }
            }
        }
    }
}

pub(crate) fn extract_preflate_info(blocks: &[DeflateTokenBlock]) -> PreflateStreamInfo {
    let mut result = PreflateStreamInfo {
        count_blocks: blocks.len() as u32,
        ..PreflateStreamInfo::default()
    };

    for b in blocks {
        match &b.block_type {
            DeflateTokenBlockType::Stored { .. } => {
                result.count_stored_blocks += 1;
            }
            DeflateTokenBlockType::Huffman {
                tokens,
                huffman_type,
            } => {
                if *huffman_type == DeflateHuffmanType::Static {
                    result.count_static_huff_tree_blocks += 1;
                }
                process_tokens(tokens, &mut result);
            }
        }
    }
    result
}

#[test]
fn stream_info_counts() {
    let blocks = [
        DeflateTokenBlock {
            block_type: DeflateTokenBlockType::Stored {
                uncompressed: vec![1, 2, 3],
                padding_bits: 0,
            },
            last: false,
        },
        DeflateTokenBlock {
            block_type: DeflateTokenBlockType::Huffman {
                tokens: vec![
                    DeflateToken::Literal(1),
                    DeflateToken::new_ref(3, 5000, false),
                    DeflateToken::new_ref(10, 6, false),
                ],
                huffman_type: DeflateHuffmanType::Static,
            },
            last: true,
        },
    ];

    let info = extract_preflate_info(&blocks);
    assert_eq!(info.count_blocks, 2);
    assert_eq!(info.count_stored_blocks, 1);
    assert_eq!(info.count_static_huff_tree_blocks, 1);
    assert_eq!(info.token_count, 3);
    assert_eq!(info.reference_count, 2);
    assert_eq!(info.max_dist, 5000);
    assert_eq!(info.max_dist_3_matches, 5000);
    assert_eq!(info.max_tokens_per_block, 3);
}
