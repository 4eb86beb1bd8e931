/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::{ErrorKind, Read, Write};

use byteorder::ReadBytesExt;

use crate::{
    bit_helper::low_mask,
    preflate_error::{AddContext, ExitCode, Result, err_exit_code},
};

pub trait ReadBits {
    fn get(&mut self, cbit: u32) -> Result<u32>;
}

/// BitReader reads a variable number of bits from a byte stream, least significant bit first.
pub struct BitReader<R: Read> {
    binary_reader: R,
    bit_buffer: u64,
    bit_count: u32,

    /// total number of bits handed out to the caller
    bit_pos: u64,

    /// the underlying reader returned EOF
    exhausted: bool,
}

impl<R: Read> ReadBits for BitReader<R> {
    fn get(&mut self, cbit: u32) -> Result<u32> {
        BitReader::get(self, cbit)
    }
}

impl<R: Read> BitReader<R> {
    pub fn new(binary_reader: R) -> Self {
        BitReader {
            binary_reader,
            bit_buffer: 0,
            bit_count: 0,
            bit_pos: 0,
            exhausted: false,
        }
    }

    /// total number of bits consumed so far
    pub fn bit_pos(&self) -> u64 {
        self.bit_pos
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos & 7 == 0
    }

    /// pulls bytes from the underlying reader until at least cbit bits are
    /// buffered or the reader has nothing more to give
    fn fill(&mut self, cbit: u32) -> Result<()> {
        while self.bit_count < cbit && !self.exhausted {
            match self.binary_reader.read_u8() {
                Ok(b) => {
                    self.bit_buffer |= u64::from(b) << self.bit_count;
                    self.bit_count += 8;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.exhausted = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    #[inline(always)]
    fn consume(&mut self, cbit: u32) {
        self.bit_buffer >>= cbit;
        self.bit_count -= cbit;
        self.bit_pos += u64::from(cbit);
    }

    /// Returns up to cbit bits without consuming them, along with the number of
    /// bits that were actually available (fewer only at the end of the stream).
    pub fn peek(&mut self, cbit: u32) -> Result<(u32, u32)> {
        debug_assert!(cbit <= 32);
        self.fill(cbit)?;

        let available = cbit.min(self.bit_count);
        Ok(((self.bit_buffer as u32) & low_mask(available), available))
    }

    /// Read cbit bits from the input stream. Only supports reads of 0 to 32 bits,
    /// fails with ShortRead if the stream ends first.
    pub fn get(&mut self, cbit: u32) -> Result<u32> {
        if cbit == 0 {
            return Ok(0);
        }

        if cbit > 32 {
            return err_exit_code(
                ExitCode::GeneralFailure,
                "BitReader Error: Attempt to read more than 32 bits",
            );
        }

        self.fill(cbit)?;
        if self.bit_count < cbit {
            return err_exit_code(
                ExitCode::ShortRead,
                format!("end of stream reading {cbit} bits at bit {}", self.bit_pos),
            );
        }

        let wret = (self.bit_buffer as u32) & low_mask(cbit);
        self.consume(cbit);

        Ok(wret)
    }

    pub fn skip(&mut self, mut cbit: u32) -> Result<()> {
        while cbit > 0 {
            let n = cbit.min(32);
            self.get(n)?;
            cbit -= n;
        }
        Ok(())
    }

    /// true only when both the buffered bits and the underlying reader are exhausted
    pub fn eof(&mut self) -> Result<bool> {
        self.fill(1)?;
        Ok(self.bit_count == 0)
    }

    /// reads the bits until the next byte boundary, returning their value and count
    pub fn read_padding_bits(&mut self) -> Result<(u8, u32)> {
        let cbit = ((8 - (self.bit_pos & 7)) & 7) as u32;
        let v = self.get(cbit)?;
        Ok((v as u8, cbit))
    }

    /// copies len bytes straight to the output. The current position must be on
    /// a byte boundary.
    pub fn copy_bytes_to(&mut self, output: &mut impl Write, len: usize) -> Result<()> {
        if !self.is_byte_aligned() {
            return err_exit_code(
                ExitCode::GeneralFailure,
                "BitReader Error: byte copy requested at an unaligned position",
            );
        }

        let mut remaining = len;

        // first whatever whole bytes are already buffered
        while remaining > 0 && self.bit_count >= 8 {
            output.write_all(&[self.bit_buffer as u8]).context()?;
            self.consume(8);
            remaining -= 1;
        }

        if remaining > 0 {
            let copied = std::io::copy(
                &mut (&mut self.binary_reader).take(remaining as u64),
                output,
            )
            .context()?;

            self.bit_pos += copied * 8;

            if copied != remaining as u64 {
                return err_exit_code(
                    ExitCode::ShortRead,
                    format!("end of stream copying {len} bytes"),
                );
            }
        }

        Ok(())
    }

    /// Reads a self-terminating variable length integer written by `BitWriter::put_vli`.
    ///
    /// The first group uses the bits left in the current byte: a continuation bit followed
    /// by the remaining bits of data. Every following group is a continuation bit and
    /// 7 bits of data, so after the first group the reader is always byte aligned.
    pub fn get_vli(&mut self) -> Result<u64> {
        let mut data_bits = 7 - (self.bit_pos & 7) as u32;
        let mut shift = 0u32;
        let mut value = 0u64;

        loop {
            let more = self.get(1)? != 0;
            let chunk = u64::from(self.get(data_bits)?);

            if chunk != 0 {
                if shift >= 64 || (shift > 0 && (chunk >> (64 - shift)) != 0) {
                    return err_exit_code(ExitCode::InvalidPredictionData, "VLI overflow");
                }
                value |= chunk << shift;
            }

            if !more {
                return Ok(value);
            }

            shift += data_bits;
            if shift >= 70 {
                return err_exit_code(ExitCode::InvalidPredictionData, "VLI too long");
            }
            data_bits = 7;
        }
    }
}

#[test]
fn read_partial_at_end() {
    let data = [0b1010_1100u8];
    let mut r = BitReader::new(&data[..]);

    assert_eq!(r.get(3).unwrap(), 0b100);
    assert_eq!(r.peek(8).unwrap(), (0b10101, 5));
    assert!(!r.eof().unwrap());

    let e = r.get(6).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ShortRead);

    r.skip(5).unwrap();
    assert_eq!(r.bit_pos(), 8);
    assert!(r.eof().unwrap());
}

#[test]
fn copy_bytes_aligned() {
    let data: Vec<u8> = (0..100u8).collect();
    let mut r = BitReader::new(&data[..]);

    assert_eq!(r.get(16).unwrap(), 0x0100);
    // buffer now holds some prefetched bits, the copy has to take those first
    r.peek(32).unwrap();

    let mut out = Vec::new();
    r.copy_bytes_to(&mut out, 50).unwrap();
    assert_eq!(out[..], data[2..52]);
    assert_eq!(r.bit_pos(), 52 * 8);
    assert_eq!(r.get(8).unwrap(), 52);

    let mut out = Vec::new();
    assert_eq!(
        r.copy_bytes_to(&mut out, 100).unwrap_err().exit_code(),
        ExitCode::ShortRead
    );

    let mut r = BitReader::new(&data[..]);
    r.get(1).unwrap();
    assert!(r.copy_bytes_to(&mut Vec::new(), 1).is_err());
}
