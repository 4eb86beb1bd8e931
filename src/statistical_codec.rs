/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::preflate_error::{ExitCode, PreflateError, Result, err_exit_code};

/// boolean misprediction indictions
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CodecMisprediction {
    TokenCountMisprediction,
    LiteralPredictionWrong,
    ReferencePredictionWrong,
    IrregularLen258,
    EndOfMetaBlockMisprediction,
    LastBlockMisprediction,
    NonZeroPadding,

    TreeCodeCountMisprediction,
    LiteralCountMisprediction,
    DistanceCountMisprediction,
    MAX,
}

/// correction indictions, the value 0 always means "as predicted"
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CodecCorrection {
    BlockTypeCorrection,
    TokenCount,
    StoredLenCorrection,
    StoredPaddingCorrection,
    LenCorrection,
    LiteralReferenceLen,
    DistOnlyCorrection,
    DistAfterLenCorrection,
    TreeCodeBitLengthCorrection,
    LDTypeCorrection,
    RepeatCountCorrection,
    LDBitLengthCorrection,
    MAX,
}

pub trait PredictionEncoder {
    fn encode_correction(&mut self, action: CodecCorrection, value: u32);
    fn encode_misprediction(&mut self, action: CodecMisprediction, value: bool);
    fn encode_value(&mut self, value: u16, max_bits: u8);

    fn finish(&mut self);

    /// encodes the difference between the actual and predicted value
    fn encode_correction_diff(&mut self, action: CodecCorrection, actual: u32, predicted: u32) {
        self.encode_correction(action, encode_difference(predicted, actual));
    }
}

pub trait PredictionDecoder {
    fn decode_value(&mut self, max_bits: u8) -> Result<u16>;
    fn decode_correction(&mut self, correction: CodecCorrection) -> Result<u32>;
    fn decode_misprediction(&mut self, misprediction: CodecMisprediction) -> Result<bool>;

    /// inverse of encode_correction_diff. Fails if the correction would take the
    /// value out of the range of u32.
    fn decode_correction_diff(&mut self, action: CodecCorrection, predicted: u32) -> Result<u32> {
        let encoded = self.decode_correction(action)?;
        decode_difference(predicted, encoded)
    }
}

/// calculates the difference between two values, keeping track
/// of the sign as the lowest bit so that the difference is never negative
pub fn encode_difference(pred_val: u32, act_val: u32) -> u32 {
    if pred_val >= act_val {
        (pred_val - act_val) << 1
    } else {
        ((act_val - pred_val) << 1) | 1
    }
}

/// decodes the result of the previous calculation
pub fn decode_difference(pred_val: u32, encoded_val: u32) -> Result<u32> {
    let r = if encoded_val & 1 == 0 {
        pred_val.checked_sub(encoded_val >> 1)
    } else {
        pred_val.checked_add(encoded_val >> 1)
    };

    r.ok_or_else(|| {
        PreflateError::new(
            ExitCode::InvalidPredictionData,
            format!("correction {encoded_val} out of range for {pred_val}"),
        )
    })
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CodecAction {
    Misprediction(CodecMisprediction, bool),
    Correction(CodecCorrection, u32),
    Value(u16, u8),
}

/// Counts the actions that were not the default prediction. Used to decide which
/// model is used to store the corrections of a meta-block.
#[derive(Default, Debug, Clone)]
pub struct CountNonDefaultActions {
    pub total_non_default: u32,
    pub mispredictions_count: [u32; CodecMisprediction::MAX as usize],
    pub corrections_count: [u32; CodecCorrection::MAX as usize],
    pub value_count: u32,
}

impl CountNonDefaultActions {
    pub fn record_correction(&mut self, correction: CodecCorrection, value: u32) {
        if value != 0 {
            self.corrections_count[correction as usize] += 1;
            self.total_non_default += 1;
        }
    }

    pub fn record_misprediction(&mut self, misprediction: CodecMisprediction, value: bool) {
        if value {
            self.mispredictions_count[misprediction as usize] += 1;
            self.total_non_default += 1;
        }
    }

    pub fn record_value(&mut self) {
        self.value_count += 1;
        self.total_non_default += 1;
    }

    /// true if nothing needs to be stored to recreate the data
    pub fn is_all_default(&self) -> bool {
        self.total_non_default == 0
    }

    /// logs the non-zero counters
    pub fn log_counts(&self) {
        use CodecCorrection::*;
        use CodecMisprediction::*;

        let corr = [
            BlockTypeCorrection,
            TokenCount,
            StoredLenCorrection,
            StoredPaddingCorrection,
            LenCorrection,
            LiteralReferenceLen,
            DistOnlyCorrection,
            DistAfterLenCorrection,
            TreeCodeBitLengthCorrection,
            LDTypeCorrection,
            RepeatCountCorrection,
            LDBitLengthCorrection,
        ];

        let mispred = [
            TokenCountMisprediction,
            LiteralPredictionWrong,
            ReferencePredictionWrong,
            IrregularLen258,
            EndOfMetaBlockMisprediction,
            LastBlockMisprediction,
            NonZeroPadding,
            TreeCodeCountMisprediction,
            LiteralCountMisprediction,
            DistanceCountMisprediction,
        ];

        for i in corr {
            if self.corrections_count[i as usize] != 0 {
                log::trace!("{:?}: {}", i, self.corrections_count[i as usize]);
            }
        }

        for i in mispred {
            if self.mispredictions_count[i as usize] != 0 {
                log::trace!("{:?}: {}", i, self.mispredictions_count[i as usize]);
            }
        }
    }
}

impl PredictionEncoder for CountNonDefaultActions {
    fn encode_correction(&mut self, action: CodecCorrection, value: u32) {
        self.record_correction(action, value);
    }

    fn encode_misprediction(&mut self, action: CodecMisprediction, value: bool) {
        self.record_misprediction(action, value);
    }

    fn encode_value(&mut self, _value: u16, _max_bits: u8) {
        self.record_value();
    }

    fn finish(&mut self) {}
}

/// Records every action so that it can be stored, counted and replayed later. This is
/// how the decode path collects the corrections of a meta-block before the model
/// used to store them is chosen.
#[derive(Default, Debug)]
pub struct RecordingPredictionEncoder {
    actions: Vec<CodecAction>,
    count: CountNonDefaultActions,
}

impl RecordingPredictionEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[CodecAction] {
        &self.actions
    }

    pub fn count(&self) -> &CountNonDefaultActions {
        &self.count
    }

    pub fn count_nondefault_actions(&self) -> usize {
        self.count.total_non_default as usize
    }
}

impl PredictionEncoder for RecordingPredictionEncoder {
    fn encode_value(&mut self, value: u16, max_bits: u8) {
        self.actions.push(CodecAction::Value(value, max_bits));
        self.count.record_value();
    }

    fn encode_correction(&mut self, action: CodecCorrection, value: u32) {
        self.actions.push(CodecAction::Correction(action, value));
        self.count.record_correction(action, value);
    }

    fn encode_misprediction(&mut self, action: CodecMisprediction, value: bool) {
        self.actions.push(CodecAction::Misprediction(action, value));
        self.count.record_misprediction(action, value);
    }

    fn finish(&mut self) {}
}

/// Replays a recorded set of actions, failing if the caller asks for a
/// different action than the one that was recorded.
#[cfg(test)]
pub struct ReplayPredictionDecoder<'a> {
    actions: &'a [CodecAction],
    index: usize,
}

#[cfg(test)]
impl<'a> ReplayPredictionDecoder<'a> {
    pub fn new(actions: &'a [CodecAction]) -> Self {
        Self { actions, index: 0 }
    }

    /// true if every recorded action was consumed
    pub fn is_done(&self) -> bool {
        self.index == self.actions.len()
    }

    fn pop(&mut self) -> Result<CodecAction> {
        let Some(a) = self.actions.get(self.index) else {
            return err_exit_code(ExitCode::RoundtripMismatch, "ran out of recorded actions");
        };
        self.index += 1;
        Ok(*a)
    }

    fn mismatch<T>(&self, expected: &str, found: CodecAction) -> Result<T> {
        err_exit_code(
            ExitCode::RoundtripMismatch,
            format!(
                "action {} expected {expected} but recorded {found:?}",
                self.index - 1
            ),
        )
    }
}

#[cfg(test)]
impl PredictionDecoder for ReplayPredictionDecoder<'_> {
    fn decode_value(&mut self, max_bits: u8) -> Result<u16> {
        match self.pop()? {
            CodecAction::Value(value, b) if b == max_bits => Ok(value),
            x => self.mismatch("value", x),
        }
    }

    fn decode_correction(&mut self, correction: CodecCorrection) -> Result<u32> {
        match self.pop()? {
            CodecAction::Correction(c, value) if c == correction => Ok(value),
            x => self.mismatch("correction", x),
        }
    }

    fn decode_misprediction(&mut self, misprediction: CodecMisprediction) -> Result<bool> {
        match self.pop()? {
            CodecAction::Misprediction(m, value) if m == misprediction => Ok(value),
            x => self.mismatch("misprediction", x),
        }
    }
}

/// Decoder for meta-blocks where everything was predicted perfectly, so nothing
/// was stored in the diff.
#[derive(Default)]
pub struct DefaultOnlyDecoder {}

impl PredictionDecoder for DefaultOnlyDecoder {
    fn decode_value(&mut self, _max_bits: u8) -> Result<u16> {
        err_exit_code(
            ExitCode::InvalidPredictionData,
            "value requested from a perfectly predicted meta-block",
        )
    }

    fn decode_correction(&mut self, _correction: CodecCorrection) -> Result<u32> {
        Ok(0)
    }

    fn decode_misprediction(&mut self, _misprediction: CodecMisprediction) -> Result<bool> {
        Ok(false)
    }
}

/// Sends the actions to an encoder in the order they were recorded
pub fn drive_encoder<T: PredictionEncoder>(encoder: &mut T, actions: &[CodecAction]) {
    for action in actions {
        match *action {
            CodecAction::Value(value, max_bits) => {
                encoder.encode_value(value, max_bits);
            }
            CodecAction::Correction(correction, value) => {
                encoder.encode_correction(correction, value);
            }
            CodecAction::Misprediction(misprediction, value) => {
                encoder.encode_misprediction(misprediction, value);
            }
        }
    }
}

#[cfg(test)]
pub fn verify_decoder<T: PredictionDecoder>(decoder: &mut T, actions: &[CodecAction]) {
    for action in actions {
        match *action {
            CodecAction::Value(value, max_bits) => {
                let x = decoder.decode_value(max_bits).unwrap();
                assert_eq!(x, value);
            }
            CodecAction::Correction(correction, value) => {
                let x = decoder.decode_correction(correction).unwrap();
                assert_eq!(x, value, "{correction:?}");
            }
            CodecAction::Misprediction(misprediction, value) => {
                let x = decoder.decode_misprediction(misprediction).unwrap();
                assert_eq!(x, value, "{misprediction:?}");
            }
        }
    }
}

// used by tests to ensure that perfect prediction is performed for data
// that we know should be encoded without any mispredictions or corrections
#[cfg(test)]
#[derive(Default)]
pub struct AssertDefaultOnlyEncoder {}

#[cfg(test)]
impl PredictionEncoder for AssertDefaultOnlyEncoder {
    fn encode_correction(&mut self, action: CodecCorrection, value: u32) {
        assert_eq!(0, value, "unexpected correction {:?}", action);
    }

    fn encode_misprediction(&mut self, action: CodecMisprediction, value: bool) {
        assert!(!value, "unexpected misprediction {:?}", action);
    }

    fn encode_value(&mut self, _value: u16, _max_bits: u8) {
        panic!("unexpected value");
    }

    fn finish(&mut self) {}
}

#[test]
fn test_encode_decode_difference() {
    for i in 0..10 {
        assert_eq!(i, decode_difference(0, encode_difference(0, i)).unwrap());
        assert_eq!(i, decode_difference(10, encode_difference(10, i)).unwrap());
        assert_eq!(i, decode_difference(100, encode_difference(100, i)).unwrap());
    }

    // a corrupted correction can't underflow
    assert_eq!(
        decode_difference(3, 10).unwrap_err().exit_code(),
        ExitCode::InvalidPredictionData
    );
}

#[test]
fn test_record_and_replay() {
    let mut enc = RecordingPredictionEncoder::new();
    enc.encode_correction(CodecCorrection::LenCorrection, 0);
    enc.encode_misprediction(CodecMisprediction::LiteralPredictionWrong, true);
    enc.encode_correction_diff(CodecCorrection::StoredLenCorrection, 5, 8);
    enc.encode_value(3, 4);

    assert_eq!(enc.count_nondefault_actions(), 3);
    assert_eq!(
        enc.count().mispredictions_count[CodecMisprediction::LiteralPredictionWrong as usize],
        1
    );

    let mut dec = ReplayPredictionDecoder::new(enc.actions());
    verify_decoder(&mut dec, enc.actions());
    assert!(dec.is_done());

    // asking for the wrong action is a mismatch
    let mut dec = ReplayPredictionDecoder::new(enc.actions());
    assert_eq!(
        dec.decode_misprediction(CodecMisprediction::IrregularLen258)
            .unwrap_err()
            .exit_code(),
        ExitCode::RoundtripMismatch
    );
}
