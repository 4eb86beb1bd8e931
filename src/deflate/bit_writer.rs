/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::bit_helper::{bit_reverse, low_mask};

/// Used to write a variable number of bits to a byte buffer, least significant bit first.
///
/// Only whole bytes are ever moved to the output buffer, so `bits_in & 7` is always the
/// bit offset inside the byte currently being written.
#[derive(Default, Debug)]
pub struct BitWriter {
    bit_buffer: u64,
    bits_in: u32,
}

impl BitWriter {
    #[inline(always)]
    pub fn write(&mut self, bits: u32, len: u32, data_buffer: &mut Vec<u8>) {
        debug_assert!(len <= 32 && bits <= low_mask(len));
        self.bit_buffer |= u64::from(bits & low_mask(len)) << self.bits_in;
        self.bits_in += len;

        if self.bits_in > 32 {
            self.flush_whole_bytes(data_buffer);
        }
    }

    /// writes the low len bits of value in reverse order. Huffman codes are defined
    /// MSB first but are packed into the LSB first container.
    #[inline(always)]
    pub fn write_reverse(&mut self, value: u32, len: u32, data_buffer: &mut Vec<u8>) {
        self.write(bit_reverse(value, len), len, data_buffer);
    }

    /// number of bits pending that don't yet form a whole byte
    pub fn bits_to_byte_boundary(&self) -> u32 {
        (8 - (self.bits_in & 7)) & 7
    }

    /// pads up to the next byte boundary using the bits of fillbit, lowest first
    pub fn pad(&mut self, fillbit: u8, data_buffer: &mut Vec<u8>) {
        let cbit = self.bits_to_byte_boundary();
        self.write(u32::from(fillbit) & low_mask(cbit), cbit, data_buffer);
        self.flush_whole_bytes(data_buffer);
    }

    pub fn flush_whole_bytes(&mut self, data_buffer: &mut Vec<u8>) {
        while self.bits_in >= 8 {
            data_buffer.push(self.bit_buffer as u8);
            self.bit_buffer >>= 8;
            self.bits_in -= 8;
        }
    }

    /// Writes a self-terminating variable length integer. The first group fills the rest
    /// of the current byte (one continuation bit, then data), the following groups are
    /// a continuation bit plus 7 data bits each.
    pub fn put_vli(&mut self, mut value: u64, data_buffer: &mut Vec<u8>) {
        let mut data_bits = 7 - (self.bits_in & 7);

        loop {
            let chunk = (value & u64::from(low_mask(data_bits))) as u32;
            value >>= data_bits;

            let more = value != 0;
            self.write(u32::from(more), 1, data_buffer);
            self.write(chunk, data_bits, data_buffer);

            if !more {
                break;
            }
            data_bits = 7;
        }
    }
}

// write a fixed pattern and see if it matches the expected fixed output
#[test]
fn write_simple() {
    let mut b = BitWriter::default();
    let mut data_buffer = Vec::new();

    b.write(1, 4, &mut data_buffer);
    b.write(2, 4, &mut data_buffer);
    b.write(3, 4, &mut data_buffer);
    b.write(4, 4, &mut data_buffer);
    b.write(4, 4, &mut data_buffer);
    b.write(0x56, 8, &mut data_buffer);
    b.write(0x78, 8, &mut data_buffer);
    b.write(0x9f, 8, &mut data_buffer);
    b.write(0xfe, 8, &mut data_buffer);
    b.write(0xe, 4, &mut data_buffer);

    b.flush_whole_bytes(&mut data_buffer);

    assert_eq!(data_buffer[..], [0x21, 0x43, 0x64, 0x85, 0xf7, 0xe9, 0xef]);
}

/// every (value, n) with n up to 32 comes back masked to n bits
#[test]
fn write_roundtrip() {
    use super::bit_reader::BitReader;

    let mut b = BitWriter::default();
    let mut data_buffer = Vec::new();

    let mut pattern = Vec::new();
    let mut seed = 0x1234_5678u32;
    for n in 0..=32u32 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        pattern.push((seed & low_mask(n), n));
        pattern.push((low_mask(n), n));
    }

    for &(value, n) in &pattern {
        b.write(value, n, &mut data_buffer);
    }
    b.pad(0, &mut data_buffer);

    let mut r = BitReader::new(&data_buffer[..]);
    for &(value, n) in &pattern {
        assert_eq!(r.get(n).unwrap(), value & low_mask(n), "n={n}");
    }
}

#[test]
fn write_reverse_and_pad() {
    use super::bit_reader::BitReader;

    let mut b = BitWriter::default();
    let mut data_buffer = Vec::new();

    b.write_reverse(0b110, 3, &mut data_buffer);
    assert_eq!(b.bits_to_byte_boundary(), 5);
    b.pad(0b10110, &mut data_buffer);
    assert_eq!(b.bits_to_byte_boundary(), 0);
    assert_eq!(data_buffer, [0b1011_0011]);

    let mut r = BitReader::new(&data_buffer[..]);
    r.get(3).unwrap();
    assert_eq!(r.read_padding_bits().unwrap(), (0b10110, 5));
}

/// VLI values survive a roundtrip at every starting bit offset
#[test]
fn vli_roundtrip() {
    use super::bit_reader::BitReader;

    let values = [
        0u64,
        1,
        2,
        63,
        64,
        127,
        128,
        255,
        256,
        0x1234_5678,
        u32::MAX as u64,
        1 << 56,
        (1 << 63) + 12345,
        u64::MAX - 1,
        u64::MAX,
    ];

    for offset in 0..8 {
        let mut b = BitWriter::default();
        let mut data_buffer = Vec::new();

        b.write(0, offset, &mut data_buffer);
        for &v in &values {
            b.put_vli(v, &mut data_buffer);
            // vary the alignment between values as well
            b.write(1, 3, &mut data_buffer);
        }
        b.pad(0, &mut data_buffer);

        let mut r = BitReader::new(&data_buffer[..]);
        r.get(offset).unwrap();
        for &v in &values {
            assert_eq!(r.get_vli().unwrap(), v, "offset {offset}");
            assert_eq!(r.get(3).unwrap(), 1);
        }
    }
}

#[test]
fn vli_truncated_fails() {
    use super::bit_reader::BitReader;

    let mut b = BitWriter::default();
    let mut data_buffer = Vec::new();
    b.put_vli(u64::MAX, &mut data_buffer);
    b.pad(0, &mut data_buffer);

    let mut r = BitReader::new(&data_buffer[..data_buffer.len() - 1]);
    assert!(r.get_vli().is_err());
}
