/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Tables and limits from RFC 1951.

pub const MIN_MATCH: u32 = 3;
pub const MAX_MATCH: u32 = 258;

/// zlib never looks for matches closer than this to the end of its window
pub const MIN_LOOKAHEAD: u32 = MAX_MATCH + MIN_MATCH + 1;

/// largest distance a DEFLATE reference may have
pub const MAX_WINDOW_SIZE: u32 = 32768;

/// largest payload of a stored block
pub const MAX_STORED_BLOCK_LEN: usize = 65535;

pub const NONLEN_CODE_COUNT: usize = 257; // literals + end of block
pub const LEN_CODE_COUNT: usize = 29;
pub const LITLEN_CODE_COUNT: usize = NONLEN_CODE_COUNT + LEN_CODE_COUNT;
pub const DIST_CODE_COUNT: usize = 30;
pub const CODETREE_CODE_COUNT: usize = 19;

pub const END_OF_BLOCK: u16 = 256;

pub const MAX_CODE_BITS: u32 = 15;
pub const MAX_CODETREE_BITS: u32 = 7;

pub const LENGTH_BASE_TABLE: [u8; LEN_CODE_COUNT] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 32, 40, 48, 56, 64, 80, 96, 112, 128,
    160, 192, 224, 255,
];

pub const LENGTH_EXTRA_TABLE: [u8; LEN_CODE_COUNT] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

pub const DIST_BASE_TABLE: [u16; DIST_CODE_COUNT] = [
    0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536,
    2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576,
];

pub const DIST_EXTRA_TABLE: [u8; DIST_CODE_COUNT] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// order in which the code length code lengths are stored in a dynamic block header
pub const TREE_CODE_ORDER_TABLE: [usize; CODETREE_CODE_COUNT] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// maps a match length (3..=258) to its length code index (0..29)
pub fn quantize_length(len: u32) -> usize {
    debug_assert!((MIN_MATCH..=MAX_MATCH).contains(&len));
    let l = len - MIN_MATCH;
    if l == 255 {
        return LEN_CODE_COUNT - 1;
    }

    // the last base that doesn't exceed the length, excluding the special 258 code
    match LENGTH_BASE_TABLE[..LEN_CODE_COUNT - 1].binary_search(&(l as u8)) {
        Ok(i) => i,
        Err(i) => i - 1,
    }
}

/// maps a distance (1..=32768) to its distance code index (0..30)
pub fn quantize_distance(dist: u32) -> usize {
    debug_assert!((1..=MAX_WINDOW_SIZE).contains(&dist));
    let d = dist - 1;
    match DIST_BASE_TABLE.binary_search(&(d as u16)) {
        Ok(i) => i,
        Err(i) => i - 1,
    }
}

#[test]
fn test_quantize_tables() {
    // every length maps to a code whose range contains it
    for len in MIN_MATCH..=MAX_MATCH {
        let c = quantize_length(len);
        let base = u32::from(LENGTH_BASE_TABLE[c]) + MIN_MATCH;
        let extra = u32::from(LENGTH_EXTRA_TABLE[c]);
        assert!(len >= base && len < base + (1 << extra), "len {len} code {c}");
    }
    assert_eq!(quantize_length(258), 28);
    assert_eq!(quantize_length(257), 27);

    for dist in 1..=MAX_WINDOW_SIZE {
        let c = quantize_distance(dist);
        let base = u32::from(DIST_BASE_TABLE[c]) + 1;
        let extra = u32::from(DIST_EXTRA_TABLE[c]);
        assert!(dist >= base && dist < base + (1 << extra), "dist {dist} code {c}");
    }
}
