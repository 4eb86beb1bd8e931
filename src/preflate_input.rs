/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::{
    deflate::deflate_constants::MAX_WINDOW_SIZE,
    preflate_error::{ExitCode, Result, err_exit_code},
};

/// represents the uncompressed data of one meta-block, including a prefix (the tail of
/// the previous meta-block) that may be referenced by the compressed data.
#[derive(Clone, Default)]
pub struct PlainText {
    /// the entire data, including the prefix
    data: Vec<u8>,

    /// how long the prefix is, after this the data starts
    prefix_length: usize,

    /// offset of the first byte after the prefix within the whole stream
    text_offset: u64,
}

impl std::fmt::Debug for PlainText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PlainText {{ prefix_length: {}, text_offset: {} data: len={} }}",
            self.prefix_length,
            self.text_offset,
            self.data.len()
        )
    }
}

impl PlainText {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// creates a plain text whose text starts at text_offset in the stream, with the
    /// given bytes directly before it available for references
    pub fn new_with_prefix(prefix: &[u8], text_offset: u64) -> Self {
        Self {
            data: prefix.to_vec(),
            prefix_length: prefix.len(),
            text_offset,
        }
    }

    #[cfg(test)]
    pub fn new_with_data(data: Vec<u8>) -> Self {
        Self {
            data,
            prefix_length: 0,
            text_offset: 0,
        }
    }

    /// Takes everything accumulated so far and leaves behind the last 32KB as the
    /// prefix of the next meta-block.
    pub fn split_off_meta_block(&mut self) -> PlainText {
        let amount_to_keep = self.data.len().min(MAX_WINDOW_SIZE as usize);
        let next = PlainText {
            data: self.data[self.data.len() - amount_to_keep..].to_vec(),
            prefix_length: amount_to_keep,
            text_offset: self.total_length(),
        };

        std::mem::replace(self, next)
    }

    /// length of the text, excluding the prefix
    pub fn len(&self) -> usize {
        self.data.len() - self.prefix_length
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// offset of the start of the text in the whole stream
    pub fn text_offset(&self) -> u64 {
        self.text_offset
    }

    /// the total length of the data from the beginning of the stream
    pub fn total_length(&self) -> u64 {
        self.text_offset + self.len() as u64
    }

    /// the data excluding the prefix
    pub fn text(&self) -> &[u8] {
        &self.data[self.prefix_length..]
    }

    #[cfg(test)]
    pub fn prefix(&self) -> &[u8] {
        &self.data[..self.prefix_length]
    }

    pub fn push(&mut self, c: u8) {
        self.data.push(c);
    }

    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// writes a reference to the buffer, which copies the text from a previous location
    /// to the current location. In most cases this is non-overlapping, but there are some
    /// cases where there is overlap between the source and destination.
    #[inline(always)]
    pub fn append_reference(&mut self, dist: u32, len: u32) -> Result<()> {
        let dist = dist as usize;
        let len = len as usize;

        if dist == 0 || dist > self.data.len() {
            return err_exit_code(
                ExitCode::InvalidDeflate,
                format!("Invalid distance {dist} in reference"),
            );
        }

        let start = self.data.len() - dist;
        if dist == 1 {
            // special case for distance 1, just repeat the last byte n times
            let byte = self.data[start];
            self.data.resize(self.data.len() + len, byte);
        } else if dist >= len {
            // no overlap
            self.data.extend_from_within(start..start + len);
        } else {
            // general case, rarely called, copy one character at a time
            self.data.reserve(len);
            for i in 0..len {
                let byte = self.data[start + i];
                self.data.push(byte);
            }
        }
        Ok(())
    }
}

/// A cursor over a PlainText, starting at the beginning of the text. Positions are
/// indexes into the data including the prefix.
#[derive(Clone, Debug)]
pub struct PreflateInput<'a> {
    data: &'a [u8],
    prefix_length: usize,
    pos: usize,
}

impl<'a> PreflateInput<'a> {
    pub fn new(v: &'a PlainText) -> Self {
        PreflateInput {
            data: &v.data,
            prefix_length: v.prefix_length,
            pos: v.prefix_length,
        }
    }

    /// current position as an index into the data including the prefix
    #[inline(always)]
    pub fn pos(&self) -> u32 {
        self.pos as u32
    }

    /// position relative to the start of the text
    #[cfg(test)]
    pub fn text_pos(&self) -> usize {
        self.pos - self.prefix_length
    }

    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    /// the entire data, including the prefix
    #[inline(always)]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    #[inline(always)]
    pub fn cur_chars(&self, offset: i32) -> &'a [u8] {
        &self.data[(self.pos as isize + offset as isize) as usize..]
    }

    #[inline(always)]
    pub fn cur_char(&self, offset: i32) -> u8 {
        self.data[(self.pos as isize + offset as isize) as usize]
    }

    #[inline(always)]
    pub fn advance(&mut self, l: u32) {
        self.pos += l as usize;
        debug_assert!(self.pos <= self.data.len());
    }

    #[inline(always)]
    pub fn remaining(&self) -> u32 {
        (self.data.len() - self.pos) as u32
    }
}

#[test]
fn test_length_behavior() {
    let mut data = PlainText::new_with_data(vec![0; 40000]);

    let mut input = PreflateInput::new(&data);
    assert_eq!(data.total_length(), 40000);
    assert_eq!(input.pos(), 0);
    assert_eq!(input.remaining(), 40000);

    input.advance(1000);
    assert_eq!(input.pos(), 1000);
    assert_eq!(input.text_pos(), 1000);
    assert_eq!(input.remaining(), 39000);

    input.advance(39000);
    assert_eq!(input.remaining(), 0);

    let first = data.split_off_meta_block();
    assert_eq!(first.len(), 40000);
    assert_eq!(first.text_offset(), 0);
    assert!(first.prefix().is_empty());

    // only the window is kept around as the prefix
    assert_eq!(data.prefix().len(), 32768);
    assert_eq!(data.len(), 0);
    assert_eq!(data.text_offset(), 40000);

    data.append(&[1; 10000]);

    let mut input = PreflateInput::new(&data);
    assert_eq!(data.total_length(), 50000);
    assert_eq!(input.pos(), 32768);
    assert_eq!(input.text_pos(), 0);
    assert_eq!(input.remaining(), 10000);
    assert_eq!(input.cur_char(0), 1);
    assert_eq!(input.cur_char(-1), 0);
    assert_eq!(input.cur_char(-1000), 0);

    input.advance(1000);
    assert_eq!(input.text_pos(), 1000);
    assert_eq!(input.remaining(), 9000);

    assert_eq!(input.cur_char(-1), 1);
    assert_eq!(input.cur_char(-1000), 1);
}

#[test]
fn test_append_reference() {
    let mut p = PlainText::new();
    p.append(b"abc");
    p.append_reference(3, 6).unwrap();
    assert_eq!(p.text(), b"abcabcabc");
    p.append_reference(1, 3).unwrap();
    assert_eq!(p.text(), b"abcabcabcccc");
    p.append_reference(12, 3).unwrap();
    assert_eq!(&p.text()[12..], b"abc");

    assert_eq!(
        p.append_reference(16, 3).unwrap_err().exit_code(),
        ExitCode::InvalidDeflate
    );
}
