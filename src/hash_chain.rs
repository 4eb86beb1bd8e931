/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::deflate::deflate_constants::MIN_MATCH;

const HASH_BITS: u32 = 15;
const HASH_MASK: usize = (1 << HASH_BITS) - 1;
const HASH_SHIFT: u32 = 5;

/// Hash chain over three byte prefixes, the same shape zlib uses for its
/// dictionary (hash_shift 5, 32K buckets). Positions are indexes into the
/// plain text including its prefix. Both head and prev store position + 1
/// so that 0 can mark the end of a chain.
pub struct HashChain {
    head: Vec<u32>,
    prev: Vec<u32>,

    /// every position below this has either been inserted or skipped
    inserted_upto: usize,
}

impl HashChain {
    pub fn new(data_len: usize) -> Self {
        Self {
            head: vec![0; HASH_MASK + 1],
            prev: vec![0; data_len],
            inserted_upto: 0,
        }
    }

    #[inline]
    fn hash(data: &[u8], pos: usize) -> usize {
        let h = (u32::from(data[pos]) << (2 * HASH_SHIFT))
            ^ (u32::from(data[pos + 1]) << HASH_SHIFT)
            ^ u32::from(data[pos + 2]);
        h as usize & HASH_MASK
    }

    /// position below which everything has been added
    #[cfg(test)]
    pub fn inserted_upto(&self) -> usize {
        self.inserted_upto
    }

    /// inserts all positions up to (not including) target that have
    /// not been inserted yet
    pub fn insert_upto(&mut self, data: &[u8], target: usize) {
        // the last two positions don't have enough bytes to hash
        let hashable_end = target.min((data.len() + 1).saturating_sub(MIN_MATCH as usize));

        while self.inserted_upto < hashable_end {
            let pos = self.inserted_upto;
            let h = Self::hash(data, pos);
            self.prev[pos] = self.head[h];
            self.head[h] = pos as u32 + 1;
            self.inserted_upto += 1;
        }

        self.inserted_upto = self.inserted_upto.max(target);
    }

    /// moves past positions without adding them to the dictionary, the way the fast
    /// zlib levels treat the inside of long matches
    pub fn skip_to(&mut self, target: usize) {
        self.inserted_upto = self.inserted_upto.max(target);
    }

    /// Enumerates the earlier positions that share the hash of the bytes at pos, nearest
    /// first, stopping once the distance exceeds max_dist. Positions at or after pos
    /// are ignored so the result doesn't depend on how far ahead the chain was filled.
    pub fn iterate<'a>(&'a self, data: &[u8], pos: usize, max_dist: u32) -> HashChainIterator<'a> {
        let next = if pos + MIN_MATCH as usize <= data.len() {
            self.head[Self::hash(data, pos)]
        } else {
            0
        };

        HashChainIterator {
            prev: &self.prev,
            ref_pos: pos,
            max_dist,
            next,
        }
    }
}

pub struct HashChainIterator<'a> {
    prev: &'a [u32],
    ref_pos: usize,
    max_dist: u32,
    next: u32,
}

impl Iterator for HashChainIterator<'_> {
    /// candidate position
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next != 0 {
            let p = (self.next - 1) as usize;
            self.next = self.prev[p];

            if p >= self.ref_pos {
                continue;
            }

            if self.ref_pos - p > self.max_dist as usize {
                self.next = 0;
                return None;
            }

            return Some(p);
        }
        None
    }
}

#[test]
fn chain_finds_earlier_positions() {
    let data = b"abcXabcYabcZabc";
    let mut chain = HashChain::new(data.len());
    chain.insert_upto(data, 12);

    let found: Vec<usize> = chain.iterate(data, 12, 32768).collect();
    assert_eq!(found, [8, 4, 0]);

    // limited by distance
    let found: Vec<usize> = chain.iterate(data, 12, 8).collect();
    assert_eq!(found, [8, 4]);

    // inserting further ahead doesn't change what is seen from an earlier position
    chain.insert_upto(data, data.len());
    let found: Vec<usize> = chain.iterate(data, 8, 32768).collect();
    assert_eq!(found, [4, 0]);
}

#[test]
fn chain_skips_positions() {
    let data = b"aaaaaaaaaa";
    let mut chain = HashChain::new(data.len());
    chain.insert_upto(data, 2);
    chain.skip_to(6);
    chain.insert_upto(data, 8);
    assert_eq!(chain.inserted_upto(), 8);

    let found: Vec<usize> = chain.iterate(data, 7, 32768).collect();
    assert_eq!(found, [6, 1, 0]);
}
