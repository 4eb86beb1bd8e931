/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! The diff is a bit stream that starts with a version byte followed by one record
//! per meta-block, each padded to a whole byte:
//!
//! - model id (VLI). An id equal to the number of models seen so far introduces a new
//!   model, followed by its serialized length (VLI), padding and the serialized bytes.
//! - inflated size of the meta-block (VLI)
//! - CRC32 of the inflated bytes (32 bits)
//! - is_last (1 bit)
//! - for adaptive models only: the length of the corrections (VLI), padding and the
//!   corrections themselves.
//! - CRC32 of all the bytes of the record above (32 bits). Damaged corrections could
//!   otherwise still decode to a valid but different deflate stream.

use bitcode::{Decode, Encode};

use crate::{
    deflate::{bit_reader::BitReader, bit_writer::BitWriter},
    estimator::preflate_parameter_estimator::TokenPredictorParameters,
    preflate_error::{ExitCode, PreflateError, Result, err_exit_code},
};

pub const DIFF_VERSION: u8 = 2;

/// how the corrections of a meta-block are stored
#[derive(Encode, Decode, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ModelKind {
    /// every decision was predicted, so there is nothing to store
    Perfect,
    /// the corrections are arithmetic coded after the record
    Adaptive,
}

#[derive(Encode, Decode, Debug, Copy, Clone, Eq, PartialEq)]
pub struct ModelRecord {
    pub kind: ModelKind,
    pub params: TokenPredictorParameters,
}

/// everything the diff stores about one meta-block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaBlockRecord {
    pub model: ModelRecord,
    pub inflated_size: u64,
    pub crc32: u32,
    pub is_last: bool,
    /// empty for perfect models
    pub corrections: Vec<u8>,
}

/// Writes the records in order. Models are deduplicated, so a stream where every
/// meta-block uses the same parameters stores them only once.
#[derive(Debug)]
pub struct DiffWriter {
    bit_writer: BitWriter,
    output: Vec<u8>,
    models: Vec<ModelRecord>,
}

impl Default for DiffWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffWriter {
    pub fn new() -> Self {
        DiffWriter {
            bit_writer: BitWriter::default(),
            output: vec![DIFF_VERSION],
            models: Vec::new(),
        }
    }

    pub fn write_meta_block(&mut self, record: &MetaBlockRecord) {
        let w = &mut self.bit_writer;
        let out = &mut self.output;
        let start = out.len();

        match self.models.iter().position(|m| *m == record.model) {
            Some(id) => w.put_vli(id as u64, out),
            None => {
                let serialized = bitcode::encode(&record.model);

                w.put_vli(self.models.len() as u64, out);
                w.put_vli(serialized.len() as u64, out);
                w.pad(0, out);
                out.extend_from_slice(&serialized);

                log::debug!(
                    "model {} is {:?} with {:?}",
                    self.models.len(),
                    record.model.kind,
                    record.model.params
                );
                self.models.push(record.model);
            }
        }

        w.put_vli(record.inflated_size, out);
        w.write(record.crc32, 32, out);
        w.write(u32::from(record.is_last), 1, out);

        if record.model.kind == ModelKind::Adaptive {
            w.put_vli(record.corrections.len() as u64, out);
            w.pad(0, out);
            out.extend_from_slice(&record.corrections);
        }

        w.pad(0, out);

        let record_crc = crc32fast::hash(&out[start..]);
        w.write(record_crc, 32, out);
        w.pad(0, out);
    }

    /// number of distinct models written so far
    #[cfg(test)]
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// hands over the bytes written so far. Records always end on a byte
    /// boundary so nothing is left behind.
    pub fn detach_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

/// a diff that ends in the middle of a record is malformed, not a short read
fn truncated(e: PreflateError) -> PreflateError {
    if e.exit_code() == ExitCode::ShortRead {
        PreflateError::new(ExitCode::InvalidPredictionData, "diff ends in the middle of a record")
    } else {
        e
    }
}

/// Reads the records back in order, checking the structure as it goes.
pub struct DiffReader<'a> {
    records: &'a [u8],
    bit_reader: BitReader<&'a [u8]>,
    models: Vec<ModelRecord>,
    done: bool,
}

impl<'a> DiffReader<'a> {
    pub fn new(diff: &'a [u8]) -> Result<Self> {
        match diff.first() {
            Some(&DIFF_VERSION) => {}
            Some(v) => {
                return err_exit_code(
                    ExitCode::InvalidPredictionData,
                    format!("unsupported diff version {v}"),
                );
            }
            None => return err_exit_code(ExitCode::InvalidPredictionData, "empty diff"),
        }

        Ok(DiffReader {
            records: &diff[1..],
            bit_reader: BitReader::new(&diff[1..]),
            models: Vec::new(),
            done: false,
        })
    }

    /// Returns the next record, or None after the record marked as last. Fails if
    /// the diff ends before the last record or has data after it.
    pub fn read_meta_block(&mut self) -> Result<Option<MetaBlockRecord>> {
        if self.done {
            return Ok(None);
        }

        if self.bit_reader.eof()? {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                "diff ends before the last meta-block",
            );
        }

        let record = self.read_record().map_err(truncated)?;

        if record.is_last {
            self.done = true;
            if !self.bit_reader.eof()? {
                return err_exit_code(
                    ExitCode::InvalidPredictionData,
                    "unexpected data after the last meta-block",
                );
            }
        }

        Ok(Some(record))
    }

    fn read_record(&mut self) -> Result<MetaBlockRecord> {
        let r = &mut self.bit_reader;
        let start = (r.bit_pos() / 8) as usize;

        let id = r.get_vli()?;
        let model = if id < self.models.len() as u64 {
            self.models[id as usize]
        } else if id == self.models.len() as u64 {
            let len = r.get_vli()?;
            read_zero_padding(r)?;

            let mut serialized = Vec::new();
            r.copy_bytes_to(&mut serialized, usize::try_from(len).unwrap_or(usize::MAX))?;
            let model: ModelRecord = bitcode::decode(&serialized)?;

            self.models.push(model);
            model
        } else {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("unknown model id {id}"),
            );
        };

        let inflated_size = r.get_vli()?;
        let crc32 = r.get(32)?;
        let is_last = r.get(1)? != 0;

        let mut corrections = Vec::new();
        if model.kind == ModelKind::Adaptive {
            let len = r.get_vli()?;
            read_zero_padding(r)?;
            r.copy_bytes_to(&mut corrections, usize::try_from(len).unwrap_or(usize::MAX))?;
        }

        read_zero_padding(r)?;

        let end = (r.bit_pos() / 8) as usize;
        let record_crc = r.get(32)?;
        if crc32fast::hash(&self.records[start..end]) != record_crc {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                "diff record is damaged",
            );
        }

        Ok(MetaBlockRecord {
            model,
            inflated_size,
            crc32,
            is_last,
            corrections,
        })
    }
}

fn read_zero_padding(r: &mut BitReader<&[u8]>) -> Result<()> {
    let (bits, _) = r.read_padding_bits()?;
    if bits != 0 {
        return err_exit_code(ExitCode::InvalidPredictionData, "non-zero padding in diff");
    }
    Ok(())
}

#[cfg(test)]
fn test_records() -> Vec<MetaBlockRecord> {
    let perfect = ModelRecord {
        kind: ModelKind::Perfect,
        params: TokenPredictorParameters::default(),
    };
    let adaptive = ModelRecord {
        kind: ModelKind::Adaptive,
        params: TokenPredictorParameters {
            nice_length: 258,
            ..TokenPredictorParameters::default()
        },
    };

    vec![
        MetaBlockRecord {
            model: perfect,
            inflated_size: 1 << 21,
            crc32: 0xdeadbeef,
            is_last: false,
            corrections: Vec::new(),
        },
        MetaBlockRecord {
            model: adaptive,
            inflated_size: 12345,
            crc32: 0x01020304,
            is_last: false,
            corrections: vec![1, 2, 3, 4, 5],
        },
        MetaBlockRecord {
            model: perfect,
            inflated_size: 0,
            crc32: 0,
            is_last: true,
            corrections: Vec::new(),
        },
    ]
}

#[cfg(test)]
fn write_records(records: &[MetaBlockRecord]) -> Vec<u8> {
    let mut w = DiffWriter::new();
    let mut out = Vec::new();
    for r in records {
        w.write_meta_block(r);
        out.extend(w.detach_output());
    }
    out
}

#[test]
fn records_roundtrip_and_models_are_shared() {
    let records = test_records();

    let mut w = DiffWriter::new();
    for r in &records {
        w.write_meta_block(r);
    }
    assert_eq!(w.model_count(), 2);
    let diff = w.detach_output();

    let mut reader = DiffReader::new(&diff).unwrap();
    for r in &records {
        assert_eq!(reader.read_meta_block().unwrap().as_ref(), Some(r));
    }
    assert_eq!(reader.read_meta_block().unwrap(), None);
}

#[test]
fn malformed_diffs_are_rejected() {
    let diff = write_records(&test_records());

    let expect_invalid = |data: &[u8]| {
        let mut reader = match DiffReader::new(data) {
            Ok(r) => r,
            Err(e) => {
                assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);
                return;
            }
        };
        loop {
            match reader.read_meta_block() {
                Ok(Some(_)) => {}
                Ok(None) => panic!("malformed diff was accepted"),
                Err(e) => {
                    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData, "{e}");
                    return;
                }
            }
        }
    };

    // wrong version
    let mut bad = diff.clone();
    bad[0] = 99;
    expect_invalid(&bad);

    // empty
    expect_invalid(&[]);

    // every truncation
    for len in 1..diff.len() {
        expect_invalid(&diff[..len]);
    }

    // trailing data after the last record
    let mut bad = diff.clone();
    bad.push(0);
    expect_invalid(&bad);

    // refer to a model that was never defined
    let mut w = DiffWriter::new();
    let mut bad = w.detach_output();
    let mut bw = BitWriter::default();
    bw.put_vli(5, &mut bad);
    bw.pad(0, &mut bad);
    expect_invalid(&bad);
}

#[test]
fn damaged_records_are_rejected() {
    let diff = write_records(&test_records());

    for byte in 1..diff.len() {
        for bit in 0..8 {
            let mut bad = diff.clone();
            bad[byte] ^= 1 << bit;

            let mut reader = DiffReader::new(&bad).unwrap();
            let r = (0..test_records().len()).try_for_each(|_| reader.read_meta_block().map(|_| ()));
            let e = r.unwrap_err();
            assert_eq!(
                e.exit_code(),
                ExitCode::InvalidPredictionData,
                "byte {byte} bit {bit}: {e}"
            );
        }
    }
}
