/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use super::deflate_token::{DeflateHuffmanType, DeflateTokenBlockType};
use super::{
    deflate_constants::{
        DIST_BASE_TABLE, DIST_EXTRA_TABLE, END_OF_BLOCK, LEN_CODE_COUNT, LENGTH_BASE_TABLE,
        LENGTH_EXTRA_TABLE, MIN_MATCH, NONLEN_CODE_COUNT, quantize_distance, quantize_length,
    },
    deflate_token::{DeflateToken, DeflateTokenBlock},
};

use super::bit_writer::BitWriter;
use super::huffman_encoding::HuffmanWriter;

/// Takes tokenized blocks and writes them back to the original compressed form. The
/// writer keeps the partial byte between calls so consecutive meta-blocks continue
/// the same bit stream.
#[derive(Default)]
pub struct DeflateWriter {
    /// bit writer to write partial bits to output
    bitwriter: BitWriter,

    /// compressed output
    output: Vec<u8>,
}

impl std::fmt::Debug for DeflateWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DeflateWriter {{ bitwriter: {:?}, output: len={} }}",
            self.bitwriter,
            self.output.len()
        )
    }
}

impl DeflateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// takes the whole bytes written so far
    pub fn detach_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn encode_block(&mut self, block: &DeflateTokenBlock) {
        self.bitwriter
            .write(u32::from(block.last), 1, &mut self.output);

        match &block.block_type {
            DeflateTokenBlockType::Stored {
                uncompressed,
                padding_bits,
            } => {
                self.bitwriter.write(0, 2, &mut self.output);
                self.bitwriter.pad(*padding_bits, &mut self.output);

                let len = uncompressed.len() as u16;
                self.output.extend_from_slice(&len.to_le_bytes());
                self.output.extend_from_slice(&(!len).to_le_bytes());
                self.output.extend_from_slice(uncompressed);
            }
            DeflateTokenBlockType::Huffman {
                tokens,
                huffman_type,
            } => match huffman_type {
                DeflateHuffmanType::Static => {
                    self.bitwriter.write(1, 2, &mut self.output);
                    let huffman_writer = HuffmanWriter::start_fixed_huffman_table();
                    self.encode_huffman(tokens, &huffman_writer);
                }
                DeflateHuffmanType::Dynamic { huffman_encoding } => {
                    self.bitwriter.write(2, 2, &mut self.output);

                    let huffman_writer = HuffmanWriter::start_dynamic_huffman_table(
                        &mut self.bitwriter,
                        huffman_encoding,
                        &mut self.output,
                    );

                    self.encode_huffman(tokens, &huffman_writer);
                }
            },
        }
    }

    /// pads the final byte of the stream with the original trailing bits
    pub fn finish_stream(&mut self, tail_padding_bits: u8) {
        self.bitwriter.pad(tail_padding_bits, &mut self.output);
    }

    /// moves the whole bytes out of the bit buffer
    pub fn flush(&mut self) {
        self.bitwriter.flush_whole_bytes(&mut self.output);
    }

    fn encode_huffman(&mut self, tokens: &[DeflateToken], huffman_writer: &HuffmanWriter) {
        for token in tokens {
            match token {
                DeflateToken::Literal(lit) => {
                    huffman_writer.write_literal(
                        &mut self.bitwriter,
                        &mut self.output,
                        u16::from(*lit),
                    );
                }
                DeflateToken::Reference(reference) => {
                    if reference.get_irregular258() {
                        // 258 written as code 284 with all extra bits set
                        huffman_writer.write_literal(
                            &mut self.bitwriter,
                            &mut self.output,
                            (NONLEN_CODE_COUNT + LEN_CODE_COUNT - 2) as u16,
                        );
                        self.bitwriter.write(31, 5, &mut self.output);
                    } else {
                        let lencode = quantize_length(reference.len());
                        huffman_writer.write_literal(
                            &mut self.bitwriter,
                            &mut self.output,
                            (NONLEN_CODE_COUNT + lencode) as u16,
                        );

                        let lenextra = LENGTH_EXTRA_TABLE[lencode];
                        if lenextra > 0 {
                            self.bitwriter.write(
                                reference.len() - MIN_MATCH - u32::from(LENGTH_BASE_TABLE[lencode]),
                                lenextra.into(),
                                &mut self.output,
                            );
                        }
                    }

                    let distcode = quantize_distance(reference.dist());
                    huffman_writer.write_distance(
                        &mut self.bitwriter,
                        &mut self.output,
                        distcode as u16,
                    );

                    let distextra = DIST_EXTRA_TABLE[distcode];
                    if distextra > 0 {
                        self.bitwriter.write(
                            reference.dist() - 1 - u32::from(DIST_BASE_TABLE[distcode]),
                            distextra.into(),
                            &mut self.output,
                        );
                    }
                }
            }
        }

        huffman_writer.write_literal(&mut self.bitwriter, &mut self.output, END_OF_BLOCK);
    }
}

/// writes a complete stream from its blocks
#[cfg(test)]
pub fn write_deflate_blocks(blocks: &[DeflateTokenBlock], tail_padding_bits: u8) -> Vec<u8> {
    let mut w = DeflateWriter::new();
    for b in blocks {
        w.encode_block(b);
    }
    w.finish_stream(tail_padding_bits);
    w.detach_output()
}

/// every level of a real encoder comes back bit exact from the parsed blocks
#[test]
fn roundtrip_deflate_writer() {
    use super::deflate_reader::parse_deflate_whole;

    let data = crate::utils::test_data(100000, 3);

    for level in 0..=10 {
        let compressed = miniz_oxide::deflate::compress_to_vec(&data, level);
        let contents = parse_deflate_whole(&compressed).unwrap();

        let recreated = write_deflate_blocks(&contents.blocks, contents.tail_padding_bits);
        assert!(recreated == compressed, "level {level} didn't match");
    }
}

#[test]
fn roundtrip_irregular258() {
    use super::deflate_reader::parse_deflate_whole;

    let mut tokens = vec![DeflateToken::Literal(0)];
    tokens.push(DeflateToken::new_ref(258, 1, true));
    tokens.push(DeflateToken::new_ref(258, 1, false));

    let blocks = [DeflateTokenBlock {
        block_type: DeflateTokenBlockType::Huffman {
            tokens,
            huffman_type: DeflateHuffmanType::Static,
        },
        last: true,
    }];

    let compressed = write_deflate_blocks(&blocks, 0);
    let contents = parse_deflate_whole(&compressed).unwrap();
    assert_eq!(contents.blocks, blocks);
    assert_eq!(contents.plain_text.len(), 517);
}
