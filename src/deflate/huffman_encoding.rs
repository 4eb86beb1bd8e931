/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::Read;

use crate::preflate_error::{ExitCode, Result, err_exit_code};

use crate::bit_helper::bit_reverse;
use crate::deflate::{
    bit_reader::{BitReader, ReadBits},
    bit_writer::BitWriter,
    deflate_constants::{
        CODETREE_CODE_COUNT, DIST_CODE_COUNT, LITLEN_CODE_COUNT, MAX_CODE_BITS,
        TREE_CODE_ORDER_TABLE,
    },
};

/// Calculates the canonical Huffman codes (most significant bit first) for an array of
/// code lengths using the RFC 1951 algorithm. Oversubscribed lengths produce
/// meaningless codes but never panic.
pub fn calc_huffman_codes(code_lengths: &[u8]) -> Vec<u16> {
    let mut result: Vec<u16> = vec![0; code_lengths.len()];

    // 1)  Count the number of codes for each code length.
    let mut bl_count = [0u32; 16];
    for &cbit in code_lengths {
        bl_count[usize::from(cbit & 15)] += 1;
    }

    // 2)  Find the numerical value of the smallest code for each code length
    let mut code = 0u32;
    bl_count[0] = 0;
    let mut next_code = [0u32; 16];
    for bits in 1..16 {
        code = code.wrapping_add(bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    // 3)  Assign consecutive values to all codes of the same length
    for (n, &len) in code_lengths.iter().enumerate() {
        if len != 0 {
            let len = usize::from(len & 15);
            result[n] = next_code[len] as u16;
            next_code[len] = next_code[len].wrapping_add(1);
        }
    }

    result
}

/// What kind of code incompleteness a table is allowed to have. zlib accepts a single
/// code of length one (or no codes at all for distances), everything else has to be a
/// complete prefix code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Completeness {
    Complete,
    AllowSingle,
    AllowSingleOrEmpty,
}

fn is_valid_huffman_code_lengths(code_lengths: &[u8], completeness: Completeness) -> bool {
    let mut length_count = [0i32; 16];
    for &length in code_lengths.iter() {
        if u32::from(length) > MAX_CODE_BITS {
            return false;
        }
        length_count[usize::from(length)] += 1;
    }

    let used = code_lengths.len() as i32 - length_count[0];

    // each level of the tree doubles the number of available codes
    let mut left = 1i32;
    for &c in &length_count[1..] {
        left <<= 1;
        left -= c;
        if left < 0 {
            // oversubscribed
            return false;
        }
    }

    if left == 0 {
        return true;
    }

    match completeness {
        Completeness::Complete => false,
        Completeness::AllowSingle => used == 1 && length_count[1] == 1,
        Completeness::AllowSingleOrEmpty => used == 0 || (used == 1 && length_count[1] == 1),
    }
}

/// Canonical Huffman decoding table. The symbols are stored sorted by code length, which
/// is enough to decode canonical codes one bit at a time. Codes of up to 8 bits are
/// resolved directly through the fast table.
#[derive(Debug)]
struct HuffmanTree {
    count: [u16; 16],
    symbol: Vec<u16>,

    /// (number of bits, symbol) indexed by the next 8 bits of input, 0 bits means the
    /// code is longer than 8 bits (or unused) and needs the slow path
    fast_decode: Box<[(u8, u16); 256]>,
}

impl HuffmanTree {
    fn new(code_lengths: &[u8], completeness: Completeness) -> Result<Self> {
        if !is_valid_huffman_code_lengths(code_lengths, completeness) {
            return err_exit_code(ExitCode::InvalidDeflate, "Invalid Huffman code lengths");
        }

        let mut count = [0u16; 16];
        for &l in code_lengths {
            count[usize::from(l)] += 1;
        }
        count[0] = 0;

        let mut offs = [0u16; 16];
        for len in 1..15 {
            offs[len + 1] = offs[len] + count[len];
        }

        let mut symbol = vec![0u16; code_lengths.len()];
        for (sym, &l) in code_lengths.iter().enumerate() {
            if l != 0 {
                symbol[usize::from(offs[usize::from(l)])] = sym as u16;
                offs[usize::from(l)] += 1;
            }
        }

        let mut fast_decode = Box::new([(0u8, 0u16); 256]);
        let codes = calc_huffman_codes(code_lengths);
        for (sym, &l) in code_lengths.iter().enumerate() {
            if l != 0 && l <= 8 {
                let r = bit_reverse(u32::from(codes[sym]), u32::from(l)) as usize;
                for fill in 0..(1usize << (8 - l)) {
                    fast_decode[r | (fill << l)] = (l, sym as u16);
                }
            }
        }

        Ok(HuffmanTree {
            count,
            symbol,
            fast_decode,
        })
    }

    /// Reads the next Huffman encoded symbol from the bit reader
    #[inline(always)]
    fn decode_symbol<R: Read>(&self, bit_reader: &mut BitReader<R>) -> Result<u16> {
        let (bits, available) = bit_reader.peek(8)?;
        let (num_bits, sym) = self.fast_decode[bits as usize];

        if num_bits != 0 && u32::from(num_bits) <= available {
            bit_reader.skip(num_bits.into())?;
            return Ok(sym);
        }

        self.decode_symbol_slow(bit_reader)
    }

    #[cold]
    fn decode_symbol_slow(&self, bit_reader: &mut impl ReadBits) -> Result<u16> {
        let mut code: i32 = 0; // bits decoded so far
        let mut first: i32 = 0; // first code of this length
        let mut index: i32 = 0; // index of first code of this length in symbol table

        for len in 1..16 {
            code |= bit_reader.get(1)? as i32;
            let count = i32::from(self.count[len]);
            if code - count < first {
                return Ok(self.symbol[(index + (code - first)) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }

        err_exit_code(ExitCode::InvalidDeflate, "Invalid Huffman code in stream")
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum TreeCodeType {
    /// Code length 0 - 15
    Code = 0,
    /// Copy the previous code length 3 - 6 times.
    Repeat = 16,
    /// Repeat a code length of 0 for 3 - 10 times. (3 bits of length)
    ZeroShort = 17,
    /// Repeat a code length of 0 for 11 - 138 times (7 bits of length)
    ZeroLong = 18,
}

impl TreeCodeType {
    /// returns the constants used to adjust the coding of tree code types
    /// (amount to subtract, #bits to encode)
    pub const fn get_tree_code_adjustment(self) -> (u8, u32) {
        match self {
            TreeCodeType::Repeat => (3, 2),
            TreeCodeType::ZeroShort => (3, 3),
            TreeCodeType::ZeroLong => (11, 7),
            TreeCodeType::Code => (0, 0),
        }
    }
}

/// Represents the original encoding of the huffman table as it was read from the file
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct HuffmanOriginalEncoding {
    /// Huffman literal/distance lengths as RLE encoded in the file
    pub lengths: Vec<(TreeCodeType, u8)>,

    /// huffman lengths for the code length alphabet used to
    /// encode the huffman table
    pub code_lengths: [u8; CODETREE_CODE_COUNT],

    /// # of Literal/Length codes  (257 - 286)
    pub num_literals: usize,

    /// # of Distance codes         (1 - 30)
    pub num_dist: usize,

    /// # of Code Length codes      (4 - 19)
    pub num_code_lengths: usize,
}

impl HuffmanOriginalEncoding {
    /// Reads a dynamic huffman table from the bit reader. The structure
    /// holds all the information necessary to recode the huffman table
    /// exactly as it was written.
    pub fn read<R: Read>(bit_reader: &mut BitReader<R>) -> Result<HuffmanOriginalEncoding> {
        // 5 Bits: HLIT, # of Literal/Length codes - 257 (257 - 286)
        let hlit = bit_reader.get(5)? as usize + 257;
        // 5 Bits: HDIST, # of Distance codes - 1        (1 - 32)
        let hdist = bit_reader.get(5)? as usize + 1;
        // 4 Bits: HCLEN, # of Code Length codes - 4     (4 - 19)
        let hclen = bit_reader.get(4)? as usize + 4;

        if hlit > LITLEN_CODE_COUNT || hdist > DIST_CODE_COUNT {
            return err_exit_code(
                ExitCode::InvalidDeflate,
                format!("too many length or distance symbols {hlit} {hdist}"),
            );
        }

        // (HCLEN + 4) x 3 bits: code lengths for the code length alphabet, in the
        // order of TREE_CODE_ORDER_TABLE
        let mut code_length_alphabet_code_lengths = [0; CODETREE_CODE_COUNT];
        for &i in &TREE_CODE_ORDER_TABLE[..hclen] {
            code_length_alphabet_code_lengths[i] = bit_reader.get(3)? as u8;
        }

        let code_length_huff_code_tree =
            HuffmanTree::new(&code_length_alphabet_code_lengths, Completeness::Complete)?;

        let c_lengths_combined = hlit + hdist;

        let mut combined_lengths = Vec::new();
        let mut codes_read: usize = 0;

        while codes_read < c_lengths_combined {
            let w_next: u16 = code_length_huff_code_tree.decode_symbol(bit_reader)?;

            if w_next <= 15 {
                //	0 - 15: Represent code lengths of 0 - 15
                combined_lengths.push((TreeCodeType::Code, w_next as u8));
                codes_read += 1;
            } else {
                // 16 - 18 represent a repeat code
                let tree_code = match w_next {
                    16 => {
                        if codes_read == 0 {
                            return err_exit_code(
                                ExitCode::InvalidDeflate,
                                "repeat code with no previous length",
                            );
                        }
                        TreeCodeType::Repeat
                    }
                    17 => TreeCodeType::ZeroShort,
                    18 => TreeCodeType::ZeroLong,
                    _ => {
                        return err_exit_code(ExitCode::InvalidDeflate, "Invalid code length");
                    }
                };

                let (sub, bits) = tree_code.get_tree_code_adjustment();

                let v = bit_reader.get(bits)? as u8 + sub;
                combined_lengths.push((tree_code, v));

                codes_read += usize::from(v);
            }
        }

        if codes_read != c_lengths_combined {
            return err_exit_code(
                ExitCode::InvalidDeflate,
                "Code table should be same size as hdist + hlit",
            );
        }

        let encoding = HuffmanOriginalEncoding {
            lengths: combined_lengths,
            code_lengths: code_length_alphabet_code_lengths,
            num_literals: hlit,
            num_dist: hdist,
            num_code_lengths: hclen,
        };

        let (lit_lengths, _) = encoding.get_literal_distance_lengths();
        if lit_lengths[256] == 0 {
            return err_exit_code(ExitCode::InvalidDeflate, "missing end of block code");
        }

        Ok(encoding)
    }

    /// writes dynamic huffman table to the output buffer using the bitwriter
    pub fn write(&self, bitwriter: &mut BitWriter, output_buffer: &mut Vec<u8>) {
        bitwriter.write(self.num_literals as u32 - 257, 5, output_buffer);
        bitwriter.write(self.num_dist as u32 - 1, 5, output_buffer);
        bitwriter.write(self.num_code_lengths as u32 - 4, 4, output_buffer);

        for &i in &TREE_CODE_ORDER_TABLE[..self.num_code_lengths] {
            bitwriter.write(self.code_lengths[i].into(), 3, output_buffer);
        }

        let codes = calc_huffman_codes(&self.code_lengths);

        for &(tree_code, length) in self.lengths.iter() {
            let symbol = match tree_code {
                TreeCodeType::Code => usize::from(length),
                _ => tree_code as usize,
            };

            if symbol >= CODETREE_CODE_COUNT {
                debug_assert!(false, "invalid code length {length}");
                continue;
            }

            bitwriter.write_reverse(
                codes[symbol].into(),
                self.code_lengths[symbol].into(),
                output_buffer,
            );

            if tree_code != TreeCodeType::Code {
                let (sub, bits) = tree_code.get_tree_code_adjustment();
                bitwriter.write(u32::from(length.wrapping_sub(sub)), bits, output_buffer);
            }
        }
    }

    /// returns the length and distance tables for the fixed huffman table
    ///   Range	Code Length
    ///   0 - 143     8
    /// 144 - 255     9
    /// 256 - 279     7
    /// 280 - 287     8
    pub fn get_fixed_distance_lengths() -> (Vec<u8>, Vec<u8>) {
        let lit_code_lengths = (0..288)
            .map(|i| match i {
                144..=255 => 9,
                256..=279 => 7,
                _ => 8,
            })
            .collect();

        (lit_code_lengths, vec![5; 32])
    }

    /// expands the run length encoding into the literal and distance code lengths
    pub fn get_literal_distance_lengths(&self) -> (Vec<u8>, Vec<u8>) {
        let mut lengths = Vec::with_capacity(self.num_literals + self.num_dist);
        let mut prevcode = 0;

        for &(tree_code, length) in self.lengths.iter() {
            match tree_code {
                TreeCodeType::Code => {
                    lengths.push(length);
                    prevcode = length;
                }
                TreeCodeType::Repeat => {
                    lengths.extend(std::iter::repeat_n(prevcode, usize::from(length)));
                }
                TreeCodeType::ZeroShort | TreeCodeType::ZeroLong => {
                    lengths.extend(std::iter::repeat_n(0, usize::from(length)));
                    prevcode = 0;
                }
            }
        }

        lengths.resize(self.num_literals + self.num_dist, 0);
        let dist = lengths.split_off(self.num_literals);
        (lengths, dist)
    }
}

pub(super) struct HuffmanReader {
    lit_huff_code_tree: HuffmanTree,
    dist_huff_code_tree: HuffmanTree,
}

impl HuffmanReader {
    /// Create Fixed Huffman code tables. Literal/length values 286-287 and distances
    /// 30-31 never occur in valid data but participate in the code construction.
    pub fn create_fixed() -> Result<Self> {
        let (lit_lengths, dist_lengths) = HuffmanOriginalEncoding::get_fixed_distance_lengths();

        Ok(HuffmanReader {
            lit_huff_code_tree: HuffmanTree::new(&lit_lengths, Completeness::Complete)?,
            dist_huff_code_tree: HuffmanTree::new(&dist_lengths, Completeness::Complete)?,
        })
    }

    /// creates a reader from the encoding of the huffman table
    pub fn create_from_original_encoding(
        huffman_original_encoding: &HuffmanOriginalEncoding,
    ) -> Result<Self> {
        let (lit_lengths, dist_lengths) = huffman_original_encoding.get_literal_distance_lengths();

        Ok(HuffmanReader {
            lit_huff_code_tree: HuffmanTree::new(&lit_lengths, Completeness::AllowSingle)?,
            dist_huff_code_tree: HuffmanTree::new(
                &dist_lengths,
                Completeness::AllowSingleOrEmpty,
            )?,
        })
    }

    pub fn fetch_next_literal_code<R: Read>(&self, bit_reader: &mut BitReader<R>) -> Result<u16> {
        self.lit_huff_code_tree.decode_symbol(bit_reader)
    }

    pub fn fetch_next_distance_char<R: Read>(
        &self,
        bit_reader: &mut BitReader<R>,
    ) -> Result<u16> {
        self.dist_huff_code_tree.decode_symbol(bit_reader)
    }
}

pub(super) struct HuffmanWriter {
    lit_code_lengths: Vec<u8>,
    lit_huffman_codes: Vec<u16>,
    dist_code_lengths: Vec<u8>,
    dist_huffman_codes: Vec<u16>,
}

impl HuffmanWriter {
    pub fn start_dynamic_huffman_table(
        bitwriter: &mut BitWriter,
        huffman_encoding: &HuffmanOriginalEncoding,
        output_buffer: &mut Vec<u8>,
    ) -> Self {
        huffman_encoding.write(bitwriter, output_buffer);

        let (lit_lengths, dist_lengths) = huffman_encoding.get_literal_distance_lengths();
        Self::from_lengths(lit_lengths, dist_lengths)
    }

    pub fn start_fixed_huffman_table() -> Self {
        let (lit_lengths, dist_lengths) = HuffmanOriginalEncoding::get_fixed_distance_lengths();
        Self::from_lengths(lit_lengths, dist_lengths)
    }

    fn from_lengths(lit_lengths: Vec<u8>, dist_lengths: Vec<u8>) -> Self {
        HuffmanWriter {
            lit_huffman_codes: calc_huffman_codes(&lit_lengths),
            lit_code_lengths: lit_lengths,
            dist_huffman_codes: calc_huffman_codes(&dist_lengths),
            dist_code_lengths: dist_lengths,
        }
    }

    #[inline(always)]
    pub fn write_literal(&self, bitwriter: &mut BitWriter, output_buffer: &mut Vec<u8>, lit: u16) {
        let i = usize::from(lit);
        if let (Some(&code), Some(&c_bits)) =
            (self.lit_huffman_codes.get(i), self.lit_code_lengths.get(i))
        {
            bitwriter.write_reverse(code.into(), c_bits.into(), output_buffer);
        }
    }

    #[inline(always)]
    pub fn write_distance(
        &self,
        bitwriter: &mut BitWriter,
        output_buffer: &mut Vec<u8>,
        dist: u16,
    ) {
        let i = usize::from(dist);
        if let (Some(&code), Some(&c_bits)) =
            (self.dist_huffman_codes.get(i), self.dist_code_lengths.get(i))
        {
            bitwriter.write_reverse(code.into(), c_bits.into(), output_buffer);
        }
    }
}

#[test]
fn roundtrip_huffman_bitreadwrite() {
    let code_lengths = [1, 0, 3, 3, 4, 4, 3, 0];
    let codes = calc_huffman_codes(&code_lengths);

    let mut bit_writer = BitWriter::default();
    let mut data_buffer = Vec::new();
    for i in 0..code_lengths.len() {
        if code_lengths[i] != 0 {
            bit_writer.write_reverse(codes[i].into(), code_lengths[i].into(), &mut data_buffer);
        }
    }
    // write a sentinal to make sure that we read everything properly
    bit_writer.write(0x1234, 16, &mut data_buffer);
    bit_writer.pad(0, &mut data_buffer);

    let mut bit_reader = BitReader::new(&data_buffer[..]);
    let huffman_tree = HuffmanTree::new(&code_lengths, Completeness::Complete).unwrap();

    for i in 0..code_lengths.len() {
        if code_lengths[i] != 0 {
            assert_eq!(i as u16, huffman_tree.decode_symbol(&mut bit_reader).unwrap());
        }
    }

    assert_eq!(bit_reader.get(16).unwrap(), 0x1234, "sentinal value didn't match");
}

/// codes longer than 8 bits go through the slow path, make sure both agree
#[test]
fn long_codes_decode() {
    // lengths 1,2,..,14,15,15 form a complete code
    let mut code_lengths: Vec<u8> = (1..=15).collect();
    code_lengths.push(15);
    let codes = calc_huffman_codes(&code_lengths);

    let mut bit_writer = BitWriter::default();
    let mut data_buffer = Vec::new();
    for (i, &l) in code_lengths.iter().enumerate().rev() {
        bit_writer.write_reverse(codes[i].into(), l.into(), &mut data_buffer);
    }
    bit_writer.pad(0, &mut data_buffer);

    let mut bit_reader = BitReader::new(&data_buffer[..]);
    let huffman_tree = HuffmanTree::new(&code_lengths, Completeness::Complete).unwrap();
    for i in (0..code_lengths.len()).rev() {
        assert_eq!(i as u16, huffman_tree.decode_symbol(&mut bit_reader).unwrap());
    }
}

#[test]
fn validity_of_code_lengths() {
    assert!(is_valid_huffman_code_lengths(&[1, 1], Completeness::Complete));
    assert!(is_valid_huffman_code_lengths(&[1, 2, 2], Completeness::Complete));
    // oversubscribed
    assert!(!is_valid_huffman_code_lengths(&[1, 1, 1], Completeness::AllowSingleOrEmpty));
    // incomplete
    assert!(!is_valid_huffman_code_lengths(&[1, 2, 0], Completeness::AllowSingleOrEmpty));
    // single and empty codes
    assert!(!is_valid_huffman_code_lengths(&[0, 1, 0], Completeness::Complete));
    assert!(is_valid_huffman_code_lengths(&[0, 1, 0], Completeness::AllowSingle));
    assert!(!is_valid_huffman_code_lengths(&[0, 0], Completeness::AllowSingle));
    assert!(is_valid_huffman_code_lengths(&[0, 0], Completeness::AllowSingleOrEmpty));
    // too long
    assert!(!is_valid_huffman_code_lengths(&[16, 1], Completeness::AllowSingle));
}

#[test]
fn roundtrip_complicated() {
    let t = |v| (TreeCodeType::Code, v);

    let mut lengths = vec![(TreeCodeType::ZeroShort, 10), t(11), t(0), t(0), t(11)];
    lengths.extend([(TreeCodeType::ZeroLong, 18), t(6), t(14), (TreeCodeType::ZeroShort, 5)]);
    lengths.extend([t(11), t(9), t(10), t(7), t(6), (TreeCodeType::Repeat, 6), t(6), t(7)]);
    lengths.extend([t(10), t(8), (TreeCodeType::Repeat, 5), t(11), t(9), t(12), t(13)]);
    lengths.extend([(TreeCodeType::ZeroLong, 138), (TreeCodeType::ZeroLong, 55), t(8)]);
    // 257 literal codes so far, now 30 distance codes
    lengths.extend([t(5), t(5), t(4), (TreeCodeType::Repeat, 4), t(3), t(3)]);
    lengths.extend([(TreeCodeType::ZeroShort, 7), t(2), t(4), (TreeCodeType::ZeroLong, 11)]);
    lengths.push(t(6));

    let h = HuffmanOriginalEncoding {
        lengths,
        code_lengths: [4, 0, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 5, 5, 0, 4, 4, 4],
        num_literals: 257,
        num_dist: 30,
        num_code_lengths: 17,
    };

    rountrip_test(h);
}

#[test]
fn roundtrip_huffman_table() {
    // simple hardcoded encoding
    let encoding = HuffmanOriginalEncoding {
        lengths: vec![
            (TreeCodeType::Code, 1),
            (TreeCodeType::Code, 2),
            (TreeCodeType::Code, 3),
            (TreeCodeType::ZeroLong, 138),
            (TreeCodeType::ZeroLong, 115),
            (TreeCodeType::Code, 3),
            (TreeCodeType::Code, 1),
            (TreeCodeType::Code, 2),
            (TreeCodeType::Code, 2),
        ],
        code_lengths: [0, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2],
        num_literals: 257,
        num_dist: 3,
        num_code_lengths: 19,
    };

    rountrip_test(encoding);
}

#[cfg(test)]
fn rountrip_test(encoding: HuffmanOriginalEncoding) {
    let mut output_buffer = Vec::new();
    let mut bit_writer = BitWriter::default();
    encoding.write(&mut bit_writer, &mut output_buffer);

    // write a sentinal to make sure that we read everything properly
    bit_writer.write(0x1234, 16, &mut output_buffer);
    bit_writer.pad(0, &mut output_buffer);

    // now re-read the encoding
    let mut bit_reader = BitReader::new(&output_buffer[..]);
    let encoding2 = HuffmanOriginalEncoding::read(&mut bit_reader).unwrap();
    assert_eq!(encoding, encoding2);

    assert_eq!(bit_reader.get(16).unwrap(), 0x1234, "sentinal value didn't match");
}
