/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::deflate::huffman_encoding::HuffmanOriginalEncoding;

use super::deflate_constants::{
    DIST_CODE_COUNT, LITLEN_CODE_COUNT, MIN_MATCH, NONLEN_CODE_COUNT, quantize_distance,
    quantize_length,
};

/// In a DEFLATE stream, tokens are either literals (bytes) or references to previous bytes
/// with a distance and length. The end of block marker isn't stored as a token, it is
/// implied by the end of the token list of the block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeflateToken {
    Literal(u8),
    Reference(DeflateTokenReference),
}

impl DeflateToken {
    #[cfg(test)]
    pub fn new_ref(len: u32, dist: u32, irregular258: bool) -> DeflateToken {
        DeflateToken::Reference(DeflateTokenReference::new(len, dist, irregular258))
    }

    /// number of bytes of plain text this token produces
    pub fn len(&self) -> u32 {
        match self {
            DeflateToken::Literal(_) => 1,
            DeflateToken::Reference(r) => r.len(),
        }
    }
}

/// In the case of a distance and length, the length is the number of bytes to copy from the
/// previous bytes, and the distance is the number of bytes back to start copying from.
///
/// the irregular258 field is used to indicate that the 258 length code was used but in a
/// suboptimal way (the RFC allows for two different ways to encode 258)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeflateTokenReference {
    len: u8,
    dist: u16,
    irregular258: bool,
}

impl DeflateTokenReference {
    pub fn new(len: u32, dist: u32, irregular258: bool) -> DeflateTokenReference {
        debug_assert!((MIN_MATCH..=258).contains(&len) && (1..=32768).contains(&dist));
        DeflateTokenReference {
            len: (len - MIN_MATCH) as u8,
            dist: dist as u16,
            irregular258,
        }
    }

    pub fn len(&self) -> u32 {
        u32::from(self.len) + MIN_MATCH
    }

    pub fn dist(&self) -> u32 {
        u32::from(self.dist)
    }

    pub fn get_irregular258(&self) -> bool {
        self.irregular258
    }

    pub fn set_irregular258(&mut self, irregular258: bool) {
        self.irregular258 = irregular258;
    }
}

/// block type codes as they appear in the block header
pub const BT_STORED: u32 = 0;
pub const BT_STATICHUFF: u32 = 1;
pub const BT_DYNAMICHUFF: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeflateHuffmanType {
    Dynamic {
        huffman_encoding: HuffmanOriginalEncoding,
    },
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeflateTokenBlockType {
    Huffman {
        tokens: Vec<DeflateToken>,
        huffman_type: DeflateHuffmanType,
    },
    Stored {
        uncompressed: Vec<u8>,

        /// the bits skipped to get to the byte boundary before the length field
        padding_bits: u8,
    },
}

/// One DEFLATE block with everything needed to write it back bit-exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateTokenBlock {
    pub block_type: DeflateTokenBlockType,
    pub last: bool,
}

impl DeflateTokenBlock {
    /// number of bytes of plain text this block produces
    pub fn plain_text_len(&self) -> usize {
        match &self.block_type {
            DeflateTokenBlockType::Stored { uncompressed, .. } => uncompressed.len(),
            DeflateTokenBlockType::Huffman { tokens, .. } => {
                tokens.iter().map(|t| t.len() as usize).sum()
            }
        }
    }
}

/// Used to track the frequency of tokens in the DEFLATE stream
/// which are later used to build the huffman encoding.
#[derive(Debug, Clone)]
pub struct TokenFrequency {
    pub literal_codes: [u32; LITLEN_CODE_COUNT],
    pub distance_codes: [u32; DIST_CODE_COUNT],
}

impl Default for TokenFrequency {
    fn default() -> Self {
        let mut t = TokenFrequency {
            literal_codes: [0; LITLEN_CODE_COUNT],
            distance_codes: [0; DIST_CODE_COUNT],
        };

        // include the end of block code
        t.literal_codes[256] = 1;

        t
    }
}

impl TokenFrequency {
    pub fn commit_token(&mut self, token: &DeflateToken) {
        match token {
            DeflateToken::Literal(lit) => {
                self.literal_codes[usize::from(*lit)] += 1;
            }
            DeflateToken::Reference(t) => {
                self.literal_codes[NONLEN_CODE_COUNT + quantize_length(t.len())] += 1;
                self.distance_codes[quantize_distance(t.dist())] += 1;
            }
        }
    }

    #[cfg(test)]
    pub fn from_tokens(tokens: &[DeflateToken]) -> Self {
        let mut f = TokenFrequency::default();
        tokens.iter().for_each(|t| f.commit_token(t));
        f
    }
}

#[test]
fn token_frequency_counts() {
    let tokens = [
        DeflateToken::Literal(b'a'),
        DeflateToken::Literal(b'a'),
        DeflateToken::new_ref(3, 1, false),
        DeflateToken::new_ref(258, 32768, false),
    ];
    let f = TokenFrequency::from_tokens(&tokens);

    assert_eq!(f.literal_codes[usize::from(b'a')], 2);
    assert_eq!(f.literal_codes[256], 1);
    assert_eq!(f.literal_codes[257], 1);
    assert_eq!(f.literal_codes[285], 1);
    assert_eq!(f.distance_codes[0], 1);
    assert_eq!(f.distance_codes[29], 1);

    let block = DeflateTokenBlock {
        block_type: DeflateTokenBlockType::Huffman {
            tokens: tokens.to_vec(),
            huffman_type: DeflateHuffmanType::Static,
        },
        last: true,
    };
    assert_eq!(block.plain_text_len(), 263);
}
