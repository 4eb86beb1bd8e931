/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Stores prediction corrections with CABAC. Since nearly all actions are the
//! default prediction, the stream consists of the lengths of the runs of default
//! actions, each followed by the single non-default action that ended the run.

use cabac::{CabacReader, CabacWriter};

use crate::{
    bit_helper::bit_length,
    preflate_error::{ExitCode, PreflateError, Result, err_exit_code},
    statistical_codec::{CodecCorrection, CodecMisprediction, PredictionDecoder, PredictionEncoder},
};

/// any failure of the reader means the corrections can't be trusted
pub fn corrupt(e: std::io::Error) -> PreflateError {
    PreflateError::new(
        ExitCode::InvalidPredictionData,
        format!("corrupted corrections: {e}"),
    )
}

/// contexts for an exponent-golomb style encoded u32: a unary bit length
/// followed by the bits below the leading one
struct ExpContext<CTX> {
    length: [CTX; 33],
    bits: [CTX; 32],
}

impl<CTX: Default> Default for ExpContext<CTX> {
    fn default() -> Self {
        Self {
            length: std::array::from_fn(|_| CTX::default()),
            bits: std::array::from_fn(|_| CTX::default()),
        }
    }
}

impl<CTX> ExpContext<CTX> {
    fn write<W: CabacWriter<CTX>>(&mut self, value: u32, writer: &mut W) -> std::io::Result<()> {
        let bl = bit_length(value) as usize;

        writer.put_unary_encoded(bl, &mut self.length)?;

        for i in (0..bl.saturating_sub(1)).rev() {
            writer.put((value >> i) & 1 != 0, &mut self.bits[i])?;
        }
        Ok(())
    }

    fn read<R: CabacReader<CTX>>(&mut self, reader: &mut R) -> Result<u32> {
        let bl = reader
            .get_unary_encoded(&mut self.length)
            .map_err(corrupt)?;

        match bl {
            0 => Ok(0),
            1 => Ok(1),
            2..=32 => {
                let mut value = 1u32 << (bl - 1);
                for i in (0..bl - 1).rev() {
                    if reader.get(&mut self.bits[i]).map_err(corrupt)? {
                        value |= 1 << i;
                    }
                }
                Ok(value)
            }
            _ => err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("bit length {bl} out of range"),
            ),
        }
    }
}

struct PredictionCabacContext<CTX> {
    default_run: ExpContext<CTX>,
    correction: [ExpContext<CTX>; CodecCorrection::MAX as usize],
}

impl<CTX: Default> Default for PredictionCabacContext<CTX> {
    fn default() -> Self {
        Self {
            default_run: ExpContext::default(),
            correction: std::array::from_fn(|_| ExpContext::default()),
        }
    }
}

/// Encodes the corrections of a meta-block. Errors of the underlying writer are
/// kept and reported by finish_stream.
pub struct PredictionEncoderCabac<W, CTX> {
    writer: W,
    context: PredictionCabacContext<CTX>,
    default_count: u32,
    error: Option<std::io::Error>,
}

impl<W: CabacWriter<CTX>, CTX: Default> PredictionEncoderCabac<W, CTX> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            context: PredictionCabacContext::default(),
            default_count: 0,
            error: None,
        }
    }

    /// writes the pending default run and flushes the writer
    pub fn finish_stream(mut self) -> Result<()> {
        self.finish();
        let r = self.writer.finish();
        self.keep_error(r);

        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn keep_error(&mut self, r: std::io::Result<()>) {
        if let Err(e) = r {
            self.error.get_or_insert(e);
        }
    }

    fn end_default_run(&mut self) {
        let r = self
            .context
            .default_run
            .write(self.default_count, &mut self.writer);
        self.keep_error(r);
        self.default_count = 0;
    }
}

impl<W: CabacWriter<CTX>, CTX: Default> PredictionEncoder for PredictionEncoderCabac<W, CTX> {
    fn encode_correction(&mut self, action: CodecCorrection, value: u32) {
        if value == 0 {
            self.default_count += 1;
        } else {
            self.end_default_run();
            let r = self.context.correction[action as usize].write(value, &mut self.writer);
            self.keep_error(r);
        }
    }

    fn encode_misprediction(&mut self, _action: CodecMisprediction, value: bool) {
        if value {
            self.end_default_run();
        } else {
            self.default_count += 1;
        }
    }

    fn encode_value(&mut self, value: u16, max_bits: u8) {
        // the run before the value has to be known to find it when reading
        self.end_default_run();
        for i in (0..max_bits).rev() {
            let r = self.writer.put_bypass((value >> i) & 1 != 0);
            self.keep_error(r);
        }
    }

    fn finish(&mut self) {
        if self.default_count > 0 {
            self.end_default_run();
        }
    }
}

pub struct PredictionDecoderCabac<R, CTX> {
    reader: R,
    context: PredictionCabacContext<CTX>,
    default_count: u32,

    /// default_count holds a run that was read from the stream
    default_read: bool,
}

impl<R: CabacReader<CTX>, CTX: Default> PredictionDecoderCabac<R, CTX> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            context: PredictionCabacContext::default(),
            default_count: 0,
            default_read: false,
        }
    }

    /// fails if the corrections ended in the middle of a run of defaults
    pub fn finish(&self) -> Result<()> {
        if self.default_read && self.default_count > 0 {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                "unused default predictions at the end of the corrections",
            );
        }
        Ok(())
    }

    /// returns true if the next action is the default prediction
    fn next_is_default(&mut self) -> Result<bool> {
        if !self.default_read {
            self.default_count = self.context.default_run.read(&mut self.reader)?;
            self.default_read = true;
        }

        if self.default_count > 0 {
            self.default_count -= 1;
            Ok(true)
        } else {
            self.default_read = false;
            Ok(false)
        }
    }
}

impl<R: CabacReader<CTX>, CTX: Default> PredictionDecoder for PredictionDecoderCabac<R, CTX> {
    fn decode_value(&mut self, max_bits: u8) -> Result<u16> {
        if self.next_is_default()? {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                "default prediction where a value was expected",
            );
        }

        let mut value = 0u16;
        for _ in 0..max_bits {
            value = (value << 1) | u16::from(self.reader.get_bypass().map_err(corrupt)?);
        }
        Ok(value)
    }

    fn decode_correction(&mut self, correction: CodecCorrection) -> Result<u32> {
        if self.next_is_default()? {
            return Ok(0);
        }

        let value = self.context.correction[correction as usize].read(&mut self.reader)?;
        if value == 0 {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("zero correction stored for {correction:?}"),
            );
        }
        Ok(value)
    }

    fn decode_misprediction(&mut self, _misprediction: CodecMisprediction) -> Result<bool> {
        Ok(!self.next_is_default()?)
    }
}

#[cfg(test)]
fn sample_actions() -> Vec<crate::statistical_codec::CodecAction> {
    use crate::statistical_codec::CodecAction;

    let mut actions = Vec::new();
    for i in 0..2000u32 {
        actions.push(CodecAction::Misprediction(
            CodecMisprediction::LiteralPredictionWrong,
            i % 97 == 0,
        ));
        actions.push(CodecAction::Correction(
            CodecCorrection::LenCorrection,
            if i % 13 == 0 { i } else { 0 },
        ));
        if i % 500 == 0 {
            actions.push(CodecAction::Value((i & 0xff) as u16, 8));
        }
    }
    actions.push(CodecAction::Correction(
        CodecCorrection::DistAfterLenCorrection,
        u32::MAX,
    ));
    actions.push(CodecAction::Misprediction(
        CodecMisprediction::NonZeroPadding,
        false,
    ));
    actions
}

#[cfg(test)]
fn encode_actions(actions: &[crate::statistical_codec::CodecAction]) -> Vec<u8> {
    use cabac::vp8::{VP8Context, VP8Writer};

    let mut buffer = Vec::new();
    let mut encoder =
        PredictionEncoderCabac::<_, VP8Context>::new(VP8Writer::new(&mut buffer).unwrap());
    crate::statistical_codec::drive_encoder(&mut encoder, actions);
    encoder.finish_stream().unwrap();
    buffer
}

#[test]
fn roundtrip_cabac_codec() {
    use crate::statistical_codec::verify_decoder;
    use cabac::vp8::{VP8Context, VP8Reader};
    use std::io::Cursor;

    let actions = sample_actions();
    let buffer = encode_actions(&actions);

    // mostly defaults, so well below one bit per action
    assert!(buffer.len() < actions.len() / 4);

    let mut decoder =
        PredictionDecoderCabac::<_, VP8Context>::new(VP8Reader::new(Cursor::new(&buffer)).unwrap());
    verify_decoder(&mut decoder, &actions);
    decoder.finish().unwrap();
}

#[test]
fn roundtrip_cabac_large_values() {
    use cabac::vp8::{VP8Context, VP8Reader, VP8Writer};
    use std::io::Cursor;

    let values = [0u32, 1, 2, 3, 255, 256, 65535, 1 << 31, u32::MAX];

    let mut buffer = Vec::new();
    let mut writer = VP8Writer::new(&mut buffer).unwrap();
    let mut context = ExpContext::<VP8Context>::default();
    for &v in &values {
        context.write(v, &mut writer).unwrap();
    }
    writer.finish().unwrap();

    let mut reader = VP8Reader::new(Cursor::new(&buffer)).unwrap();
    let mut context = ExpContext::<VP8Context>::default();
    for &v in &values {
        assert_eq!(context.read(&mut reader).unwrap(), v);
    }
}

/// damaged corrections fail or decode to something else, but never panic
#[test]
fn damaged_corrections_are_not_trusted() {
    use crate::statistical_codec::CodecAction;
    use cabac::vp8::{VP8Context, VP8Reader};
    use std::io::Cursor;

    let actions = sample_actions();
    let buffer = encode_actions(&actions);

    let decode_all = |data: &[u8]| -> Result<Vec<CodecAction>> {
        let mut decoder = PredictionDecoderCabac::<_, VP8Context>::new(
            VP8Reader::new(Cursor::new(data)).map_err(corrupt)?,
        );
        let mut decoded = Vec::new();
        for a in &actions {
            decoded.push(match *a {
                CodecAction::Value(_, bits) => CodecAction::Value(decoder.decode_value(bits)?, bits),
                CodecAction::Correction(c, _) => {
                    CodecAction::Correction(c, decoder.decode_correction(c)?)
                }
                CodecAction::Misprediction(m, _) => {
                    CodecAction::Misprediction(m, decoder.decode_misprediction(m)?)
                }
            });
        }
        decoder.finish()?;
        Ok(decoded)
    };

    assert_eq!(decode_all(&buffer).unwrap(), actions);

    for len in [1, buffer.len() / 4, buffer.len() / 2] {
        match decode_all(&buffer[..len]) {
            Ok(decoded) => assert_ne!(decoded, actions, "len {len}"),
            Err(e) => assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData),
        }
    }
}
