/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::Read;

use crate::{
    deflate::deflate_token::{DeflateHuffmanType, DeflateToken, DeflateTokenReference},
    preflate_error::{AddContext, ExitCode, Result, err_exit_code},
    preflate_input::PlainText,
};

use super::{
    bit_reader::BitReader,
    deflate_constants::{
        DIST_BASE_TABLE, DIST_CODE_COUNT, DIST_EXTRA_TABLE, END_OF_BLOCK, LEN_CODE_COUNT,
        LENGTH_BASE_TABLE, LENGTH_EXTRA_TABLE, MIN_MATCH, NONLEN_CODE_COUNT,
    },
    deflate_token::{DeflateTokenBlock, DeflateTokenBlockType},
    huffman_encoding::{HuffmanOriginalEncoding, HuffmanReader},
};

/// Parses a DEFLATE stream one block at a time, accumulating the inflated data
/// (with the 32KB window of the previous meta-block in front of it).
#[derive(Debug, Default)]
pub struct DeflateParser {
    plain_text: PlainText,
    done: bool,
}

impl DeflateParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// true once the block with the last bit set has been read
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn plain_text(&self) -> &PlainText {
        &self.plain_text
    }

    /// hands over the plain text read so far, keeping the window for the next meta-block
    pub fn split_off_meta_block(&mut self) -> PlainText {
        self.plain_text.split_off_meta_block()
    }

    /// Reads the next block. Fails with InvalidDeflate if the block is structurally invalid
    /// or ShortRead if the stream ends in the middle of the block.
    pub fn read_block<R: Read>(
        &mut self,
        bit_reader: &mut BitReader<R>,
    ) -> Result<DeflateTokenBlock> {
        if self.done {
            return err_exit_code(ExitCode::GeneralFailure, "read past the last block");
        }

        let last = bit_reader.get(1)? != 0;
        let mode = bit_reader.get(2)?;

        let block_type = match mode {
            0 => {
                let (padding_bits, _) = bit_reader.read_padding_bits()?;

                let len = bit_reader.get(16)?;
                let ilen = bit_reader.get(16)?;
                if (len ^ ilen) != 0xffff {
                    return err_exit_code(ExitCode::InvalidDeflate, "Block length mismatch");
                }

                let mut uncompressed = Vec::with_capacity(len as usize);
                bit_reader
                    .copy_bytes_to(&mut uncompressed, len as usize)
                    .context()?;
                self.plain_text.append(&uncompressed);

                DeflateTokenBlockType::Stored {
                    uncompressed,
                    padding_bits,
                }
            }
            1 => {
                let decoder = HuffmanReader::create_fixed()?;
                let tokens =
                    decode_tokens(&decoder, &mut self.plain_text, bit_reader).context()?;

                DeflateTokenBlockType::Huffman {
                    tokens,
                    huffman_type: DeflateHuffmanType::Static,
                }
            }
            2 => {
                let huffman_encoding = HuffmanOriginalEncoding::read(bit_reader)?;
                let decoder = HuffmanReader::create_from_original_encoding(&huffman_encoding)?;
                let tokens =
                    decode_tokens(&decoder, &mut self.plain_text, bit_reader).context()?;

                DeflateTokenBlockType::Huffman {
                    tokens,
                    huffman_type: DeflateHuffmanType::Dynamic { huffman_encoding },
                }
            }
            _ => return err_exit_code(ExitCode::InvalidDeflate, "Invalid block type"),
        };

        if last {
            self.done = true;
        }

        Ok(DeflateTokenBlock { block_type, last })
    }
}

fn decode_tokens<R: Read>(
    decoder: &HuffmanReader,
    plain_text: &mut PlainText,
    bit_reader: &mut BitReader<R>,
) -> Result<Vec<DeflateToken>> {
    let mut tokens = Vec::new();

    loop {
        let lit_len = decoder.fetch_next_literal_code(bit_reader)?;
        if lit_len < END_OF_BLOCK {
            plain_text.push(lit_len as u8);
            tokens.push(DeflateToken::Literal(lit_len as u8));
        } else if lit_len == END_OF_BLOCK {
            return Ok(tokens);
        } else {
            let lcode = usize::from(lit_len) - NONLEN_CODE_COUNT;
            if lcode >= LEN_CODE_COUNT {
                return err_exit_code(ExitCode::InvalidDeflate, "Invalid length code");
            }
            let len: u32 = MIN_MATCH
                + u32::from(LENGTH_BASE_TABLE[lcode])
                + bit_reader.get(LENGTH_EXTRA_TABLE[lcode].into())?;

            // length of 258 can be encoded two ways: 284 with 5 one bits (non-standard) or as 285 with 0 extra bits (standard)
            let irregular258 = len == 258 && lcode != LEN_CODE_COUNT - 1;

            let dcode = usize::from(decoder.fetch_next_distance_char(bit_reader)?);
            if dcode >= DIST_CODE_COUNT {
                return err_exit_code(ExitCode::InvalidDeflate, "Invalid distance code");
            }

            let dist = 1
                + u32::from(DIST_BASE_TABLE[dcode])
                + bit_reader.get(DIST_EXTRA_TABLE[dcode].into())?;

            plain_text.append_reference(dist, len)?;
            tokens.push(DeflateToken::Reference(DeflateTokenReference::new(
                len,
                dist,
                irregular258,
            )));
        }
    }
}

/// represents a complete deflate stream read in one go
#[cfg(test)]
#[derive(Debug)]
pub struct DeflateContents {
    pub compressed_size: usize,
    pub blocks: Vec<DeflateTokenBlock>,
    pub plain_text: PlainText,

    /// value of the bits after the last block up to the byte boundary
    pub tail_padding_bits: u8,
}

/// parses an entire deflate stream, failing if it isn't complete
#[cfg(test)]
pub fn parse_deflate_whole(compressed_data: &[u8]) -> Result<DeflateContents> {
    let mut bit_reader = BitReader::new(compressed_data);
    let mut parser = DeflateParser::new();
    let mut blocks = Vec::new();

    while !parser.is_done() {
        blocks.push(parser.read_block(&mut bit_reader)?);
    }

    let (tail_padding_bits, _) = bit_reader.read_padding_bits()?;

    Ok(DeflateContents {
        compressed_size: (bit_reader.bit_pos() / 8) as usize,
        blocks,
        plain_text: parser.split_off_meta_block(),
        tail_padding_bits,
    })
}

#[test]
fn parse_stored_and_fixed() {
    use crate::deflate::bit_writer::BitWriter;

    let mut w = BitWriter::default();
    let mut out = Vec::new();

    // stored block with non-zero alignment bits
    w.write(0, 1, &mut out);
    w.write(0, 2, &mut out);
    w.pad(0b10101, &mut out);
    w.write(3, 16, &mut out);
    w.write(!3 & 0xffff, 16, &mut out);
    w.flush_whole_bytes(&mut out);
    out.extend_from_slice(b"abc");

    // fixed block: 'd', then a reference (len 3, dist 4) and end of block
    w.write(1, 1, &mut out);
    w.write(1, 2, &mut out);
    w.write_reverse(0x30 + u32::from(b'd'), 8, &mut out);
    w.write_reverse(1, 7, &mut out); // length code 257 = 3
    w.write_reverse(3, 5, &mut out); // distance code 3 = 4
    w.write_reverse(0, 7, &mut out);
    w.pad(0b11, &mut out);

    let contents = parse_deflate_whole(&out).unwrap();
    assert_eq!(contents.plain_text.text(), b"abcdabc");
    assert_eq!(contents.compressed_size, out.len());
    assert_eq!(contents.tail_padding_bits, 0b11);
    assert_eq!(contents.blocks.len(), 2);
    assert_eq!(
        contents.blocks[0].block_type,
        DeflateTokenBlockType::Stored {
            uncompressed: b"abc".to_vec(),
            padding_bits: 0b10101
        }
    );
    assert!(contents.blocks[1].last);
}

#[test]
fn parse_invalid_streams() {
    // reserved block type 3
    assert_eq!(
        parse_deflate_whole(&[0b111]).unwrap_err().exit_code(),
        ExitCode::InvalidDeflate
    );

    // truncated stored block
    assert_eq!(
        parse_deflate_whole(&[0b001, 5, 0]).unwrap_err().exit_code(),
        ExitCode::ShortRead
    );

    // distance reaching before the start of the data
    let mut w = crate::deflate::bit_writer::BitWriter::default();
    let mut out = Vec::new();
    w.write(1, 1, &mut out);
    w.write(1, 2, &mut out);
    w.write_reverse(1, 7, &mut out);
    w.write_reverse(0, 5, &mut out);
    w.write_reverse(0, 7, &mut out);
    w.pad(0, &mut out);
    assert_eq!(
        parse_deflate_whole(&out).unwrap_err().exit_code(),
        ExitCode::InvalidDeflate
    );
}

#[test]
fn parse_miniz_levels() {
    let data = crate::utils::test_data(50000, 7);

    for level in 0..=9 {
        let compressed = miniz_oxide::deflate::compress_to_vec(&data, level);
        let contents = parse_deflate_whole(&compressed).unwrap();
        assert_eq!(contents.plain_text.text(), &data[..], "level {level}");
        assert_eq!(contents.compressed_size, compressed.len());
    }
}
