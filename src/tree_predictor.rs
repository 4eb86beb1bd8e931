/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::{
    deflate::{
        deflate_constants::{
            CODETREE_CODE_COUNT, DIST_CODE_COUNT, LITLEN_CODE_COUNT, MAX_CODE_BITS,
            MAX_CODETREE_BITS, NONLEN_CODE_COUNT, TREE_CODE_ORDER_TABLE,
        },
        deflate_token::TokenFrequency,
        huffman_encoding::{HuffmanOriginalEncoding, TreeCodeType},
    },
    huffman_calc::calc_bit_lengths,
    preflate_error::{ExitCode, Result, err_exit_code},
    statistical_codec::{
        CodecCorrection, CodecMisprediction, PredictionDecoder, PredictionEncoder,
    },
};

/// Predicts the dynamic huffman table of a block from the frequencies of the tokens
/// it contains and encodes where the actual table differs.
pub fn predict_tree_for_block<D: PredictionEncoder>(
    huffman_encoding: &HuffmanOriginalEncoding,
    freq: &TokenFrequency,
    encoder: &mut D,
) -> Result<()> {
    let (predicted_lit, predicted_dist) = build_ld_bit_lengths(freq);

    // first the size of the literal tree
    let lit_count_wrong = predicted_lit.len() != huffman_encoding.num_literals;
    encoder.encode_misprediction(CodecMisprediction::LiteralCountMisprediction, lit_count_wrong);
    if lit_count_wrong {
        encoder.encode_value((huffman_encoding.num_literals - NONLEN_CODE_COUNT) as u16, 5);
    }

    // now the size of the distance tree
    let dist_count_wrong = predicted_dist.len() != huffman_encoding.num_dist;
    encoder.encode_misprediction(
        CodecMisprediction::DistanceCountMisprediction,
        dist_count_wrong,
    );
    if dist_count_wrong {
        encoder.encode_value((huffman_encoding.num_dist - 1) as u16, 5);
    }

    let bit_lengths = combine_lengths(
        &predicted_lit,
        huffman_encoding.num_literals,
        &predicted_dist,
        huffman_encoding.num_dist,
    );

    // now predict each length code
    predict_ld_trees(encoder, &bit_lengths, &huffman_encoding.lengths)?;

    // final step, the second level huffman tree that is used to store the bit
    // lengths of the huffman tree we just created
    let (tc_code_tree, predicted_c_tree_size) =
        build_tc_bit_lengths(&calc_codetree_freq(&huffman_encoding.lengths));

    let tc_count_wrong = predicted_c_tree_size != huffman_encoding.num_code_lengths;
    encoder.encode_misprediction(CodecMisprediction::TreeCodeCountMisprediction, tc_count_wrong);
    if tc_count_wrong {
        encoder.encode_value((huffman_encoding.num_code_lengths - 4) as u16, 4);
    }

    for &sym in &TREE_CODE_ORDER_TABLE[..huffman_encoding.num_code_lengths] {
        encoder.encode_correction_diff(
            CodecCorrection::TreeCodeBitLengthCorrection,
            u32::from(huffman_encoding.code_lengths[sym]),
            u32::from(tc_code_tree[sym]),
        );
    }

    Ok(())
}

/// Mirror of predict_tree_for_block: rebuilds the original table from the
/// frequencies and the corrections.
pub fn recreate_tree_for_block<D: PredictionDecoder>(
    freq: &TokenFrequency,
    codec: &mut D,
) -> Result<HuffmanOriginalEncoding> {
    let (predicted_lit, predicted_dist) = build_ld_bit_lengths(freq);

    let mut num_literals = predicted_lit.len();
    if codec.decode_misprediction(CodecMisprediction::LiteralCountMisprediction)? {
        num_literals = usize::from(codec.decode_value(5)?) + NONLEN_CODE_COUNT;
        if num_literals > LITLEN_CODE_COUNT {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("invalid literal count {num_literals}"),
            );
        }
    }

    let mut num_dist = predicted_dist.len();
    if codec.decode_misprediction(CodecMisprediction::DistanceCountMisprediction)? {
        num_dist = usize::from(codec.decode_value(5)?) + 1;
        if num_dist > DIST_CODE_COUNT {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("invalid distance count {num_dist}"),
            );
        }
    }

    let bit_lengths = combine_lengths(&predicted_lit, num_literals, &predicted_dist, num_dist);

    let lengths = reconstruct_ld_trees(codec, &bit_lengths)?;

    let (tc_code_tree, mut num_code_lengths) =
        build_tc_bit_lengths(&calc_codetree_freq(&lengths));

    if codec.decode_misprediction(CodecMisprediction::TreeCodeCountMisprediction)? {
        num_code_lengths = usize::from(codec.decode_value(4)?) + 4;
    }

    let mut code_lengths = [0u8; CODETREE_CODE_COUNT];
    for &sym in &TREE_CODE_ORDER_TABLE[..num_code_lengths] {
        let l = codec.decode_correction_diff(
            CodecCorrection::TreeCodeBitLengthCorrection,
            u32::from(tc_code_tree[sym]),
        )?;
        if l > MAX_CODETREE_BITS {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("invalid tree code length {l}"),
            );
        }
        code_lengths[sym] = l as u8;
    }

    Ok(HuffmanOriginalEncoding {
        lengths,
        code_lengths,
        num_literals,
        num_dist,
        num_code_lengths,
    })
}

/// zlib always gives a tree at least two codes, adding symbols with a frequency
/// of one (the next unused symbols if the highest used is below 2, otherwise 0)
fn force_two_codes(freq: &mut [u32]) {
    let mut max_code = freq.iter().rposition(|&f| f != 0).map_or(-1, |i| i as i32);
    let mut nonzero = freq.iter().filter(|&&f| f != 0).count();

    while nonzero < 2 {
        let node = if max_code < 2 {
            max_code += 1;
            max_code as usize
        } else {
            0
        };
        freq[node] = 1;
        nonzero += 1;
    }
}

/// the predicted literal and distance code lengths, trimmed to the symbols in use
fn build_ld_bit_lengths(freq: &TokenFrequency) -> (Vec<u8>, Vec<u8>) {
    let mut lit_freq = freq.literal_codes;
    force_two_codes(&mut lit_freq);
    let mut lit = calc_bit_lengths(&lit_freq, MAX_CODE_BITS as usize);
    if lit.len() < NONLEN_CODE_COUNT {
        lit.resize(NONLEN_CODE_COUNT, 0);
    }

    let mut dist_freq = freq.distance_codes;
    force_two_codes(&mut dist_freq);
    let dist = calc_bit_lengths(&dist_freq, MAX_CODE_BITS as usize);

    (lit, dist)
}

/// lengths of the combined literal and distance alphabet as they are run length
/// coded, sized to the actual number of symbols in the table
fn combine_lengths(lit: &[u8], num_literals: usize, dist: &[u8], num_dist: usize) -> Vec<u8> {
    let mut bit_lengths = Vec::with_capacity(num_literals + num_dist);
    bit_lengths.extend(lit.iter().copied().chain(std::iter::repeat(0)).take(num_literals));
    bit_lengths.extend(dist.iter().copied().chain(std::iter::repeat(0)).take(num_dist));
    bit_lengths
}

/// calculates the code length tree and how many of its entries are written
fn build_tc_bit_lengths(bl_freqs: &[u32; CODETREE_CODE_COUNT]) -> ([u8; CODETREE_CODE_COUNT], usize) {
    let mut freq = *bl_freqs;
    force_two_codes(&mut freq);

    let mut bit_lengths = [0u8; CODETREE_CODE_COUNT];
    for (d, s) in bit_lengths
        .iter_mut()
        .zip(calc_bit_lengths(&freq, MAX_CODETREE_BITS as usize))
    {
        *d = s;
    }

    let mut predicted_c_tree_size = CODETREE_CODE_COUNT;
    while predicted_c_tree_size > 4
        && bit_lengths[TREE_CODE_ORDER_TABLE[predicted_c_tree_size - 1]] == 0
    {
        predicted_c_tree_size -= 1;
    }

    (bit_lengths, predicted_c_tree_size)
}

fn tree_code_type_index(t: TreeCodeType) -> u32 {
    match t {
        TreeCodeType::Code => 0,
        TreeCodeType::Repeat => 1,
        TreeCodeType::ZeroShort => 2,
        TreeCodeType::ZeroLong => 3,
    }
}

fn tree_code_type_from_index(i: u32) -> Result<TreeCodeType> {
    match i {
        0 => Ok(TreeCodeType::Code),
        1 => Ok(TreeCodeType::Repeat),
        2 => Ok(TreeCodeType::ZeroShort),
        3 => Ok(TreeCodeType::ZeroLong),
        _ => err_exit_code(
            ExitCode::InvalidPredictionData,
            format!("invalid tree code type {i}"),
        ),
    }
}

/// valid range of the run length for each tree code type
fn run_length_range(t: TreeCodeType) -> std::ops::RangeInclusive<u32> {
    match t {
        TreeCodeType::Code => 0..=MAX_CODE_BITS,
        TreeCodeType::Repeat => 3..=6,
        TreeCodeType::ZeroShort => 3..=10,
        TreeCodeType::ZeroLong => 11..=138,
    }
}

fn predict_ld_trees<D: PredictionEncoder>(
    encoder: &mut D,
    sym_bit_len: &[u8],
    target_codes: &[(TreeCodeType, u8)],
) -> Result<()> {
    let mut symbols = sym_bit_len;
    let mut prev_code = None;

    for &(target_tree_code_type, target_tree_code_data) in target_codes.iter() {
        if symbols.is_empty() {
            return err_exit_code(
                ExitCode::PredictionFailure,
                "huffman table has more lengths than symbols",
            );
        }

        let predicted_tree_code_type = predict_code_type(symbols, prev_code);
        prev_code = Some(symbols[0]);

        encoder.encode_correction(
            CodecCorrection::LDTypeCorrection,
            if predicted_tree_code_type == target_tree_code_type {
                0
            } else {
                tree_code_type_index(target_tree_code_type) + 1
            },
        );

        let predicted_tree_code_data = predict_code_data(symbols, target_tree_code_type);

        if target_tree_code_type != TreeCodeType::Code {
            encoder.encode_correction_diff(
                CodecCorrection::RepeatCountCorrection,
                u32::from(target_tree_code_data),
                u32::from(predicted_tree_code_data),
            );
        } else {
            encoder.encode_correction_diff(
                CodecCorrection::LDBitLengthCorrection,
                u32::from(target_tree_code_data),
                u32::from(predicted_tree_code_data),
            );
        }

        let advance = if target_tree_code_type == TreeCodeType::Code {
            1
        } else {
            usize::from(target_tree_code_data)
        };

        symbols = symbols.get(advance..).unwrap_or_default();
    }

    if !symbols.is_empty() {
        return err_exit_code(
            ExitCode::PredictionFailure,
            "huffman table has fewer lengths than symbols",
        );
    }

    Ok(())
}

fn reconstruct_ld_trees<D: PredictionDecoder>(
    codec: &mut D,
    sym_bit_len: &[u8],
) -> Result<Vec<(TreeCodeType, u8)>> {
    let mut symbols = sym_bit_len;
    let mut prev_code = None;
    let mut result: Vec<(TreeCodeType, u8)> = Vec::new();

    while !symbols.is_empty() {
        let predicted_tree_code_type = predict_code_type(symbols, prev_code);
        prev_code = Some(symbols[0]);

        let tree_code_type = match codec.decode_correction(CodecCorrection::LDTypeCorrection)? {
            0 => predicted_tree_code_type,
            c => tree_code_type_from_index(c - 1)?,
        };

        let predicted_tree_code_data = predict_code_data(symbols, tree_code_type);

        let tree_code_data = if tree_code_type != TreeCodeType::Code {
            if result.is_empty() && tree_code_type == TreeCodeType::Repeat {
                return err_exit_code(
                    ExitCode::InvalidPredictionData,
                    "repeat code with no previous length",
                );
            }

            codec.decode_correction_diff(
                CodecCorrection::RepeatCountCorrection,
                u32::from(predicted_tree_code_data),
            )?
        } else {
            codec.decode_correction_diff(
                CodecCorrection::LDBitLengthCorrection,
                u32::from(predicted_tree_code_data),
            )?
        };

        if !run_length_range(tree_code_type).contains(&tree_code_data) {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("invalid tree code {tree_code_type:?} {tree_code_data}"),
            );
        }

        let advance = if tree_code_type == TreeCodeType::Code {
            1
        } else {
            tree_code_data as usize
        };

        if advance > symbols.len() {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                "run length goes past the end of the huffman table",
            );
        }

        result.push((tree_code_type, tree_code_data as u8));
        symbols = &symbols[advance..];
    }

    Ok(result)
}

/// calculates the treecode frequence for the given block, which is used to
/// to calculate the huffman tree for encoding the treecodes themselves
fn calc_codetree_freq(codes: &[(TreeCodeType, u8)]) -> [u32; CODETREE_CODE_COUNT] {
    let mut bl_freqs = [0u32; CODETREE_CODE_COUNT];

    for &(code, data) in codes.iter() {
        let sym = match code {
            TreeCodeType::Code => usize::from(data),
            _ => code as usize,
        };
        if let Some(f) = bl_freqs.get_mut(sym) {
            *f += 1;
        }
    }

    bl_freqs
}

fn predict_code_type(sym_bit_len: &[u8], previous_code: Option<u8>) -> TreeCodeType {
    let code = sym_bit_len[0];
    if code == 0 {
        let max_cur_len = sym_bit_len.len().min(11);
        let curlen = sym_bit_len[..max_cur_len]
            .iter()
            .take_while(|&&c| c == 0)
            .count();

        if curlen >= 11 {
            TreeCodeType::ZeroLong
        } else if curlen >= 3 {
            TreeCodeType::ZeroShort
        } else {
            TreeCodeType::Code
        }
    } else if previous_code == Some(code) {
        let curlen = sym_bit_len.iter().take_while(|&&c| c == code).count();
        if curlen >= 3 {
            TreeCodeType::Repeat
        } else {
            TreeCodeType::Code
        }
    } else {
        TreeCodeType::Code
    }
}

fn predict_code_data(sym_bit_len: &[u8], code_type: TreeCodeType) -> u8 {
    let code = sym_bit_len[0];

    let (min_len, max_len) = match code_type {
        TreeCodeType::Code => return code,
        TreeCodeType::Repeat => (3, 6),
        TreeCodeType::ZeroShort => (3, 10),
        TreeCodeType::ZeroLong => (11, 138),
    };

    let run = sym_bit_len[..sym_bit_len.len().min(max_len)]
        .iter()
        .take_while(|&&c| c == code)
        .count();

    run.max(min_len) as u8
}

#[test]
fn encode_roundtrip_perfect() {
    use crate::statistical_codec::{AssertDefaultOnlyEncoder, DefaultOnlyDecoder};

    let mut freq = TokenFrequency::default();
    freq.literal_codes[0] = 100;
    freq.literal_codes[1] = 50;
    freq.literal_codes[2] = 25;

    freq.distance_codes[0] = 100;
    freq.distance_codes[1] = 50;
    freq.distance_codes[2] = 25;

    let mut empty_decoder = DefaultOnlyDecoder {};
    let regenerated_header = recreate_tree_for_block(&freq, &mut empty_decoder).unwrap();

    assert_eq!(regenerated_header.num_literals, 257);
    assert_eq!(regenerated_header.num_dist, 3);
    assert_eq!(regenerated_header.lengths[0], (TreeCodeType::Code, 1));
    assert_eq!(regenerated_header.lengths[1], (TreeCodeType::Code, 2));
    assert_eq!(regenerated_header.lengths[2], (TreeCodeType::Code, 3));

    let mut empty_encoder = AssertDefaultOnlyEncoder {};
    predict_tree_for_block(&regenerated_header, &freq, &mut empty_encoder).unwrap();
}

/// a table that is nothing like the prediction still comes back exactly
#[test]
fn encode_tree_roundtrip() {
    use crate::statistical_codec::{RecordingPredictionEncoder, ReplayPredictionDecoder};

    let mut freq = TokenFrequency::default();
    freq.literal_codes[0] = 100;
    freq.literal_codes[1] = 50;
    freq.literal_codes[2] = 25;

    freq.distance_codes[0] = 100;
    freq.distance_codes[1] = 50;
    freq.distance_codes[2] = 25;

    let mut code_lengths = [0; CODETREE_CODE_COUNT];
    code_lengths[1] = 3;
    code_lengths[2] = 3;
    code_lengths[3] = 3;
    code_lengths[4] = 3;
    code_lengths[16] = 3;
    code_lengths[17] = 3;
    code_lengths[18] = 2;

    let huff_origin = HuffmanOriginalEncoding {
        lengths: vec![
            (TreeCodeType::Code, 4),
            (TreeCodeType::Code, 4),
            (TreeCodeType::Repeat, 3),
            (TreeCodeType::ZeroLong, 138),
            (TreeCodeType::ZeroLong, 112),
            (TreeCodeType::ZeroShort, 3),
            (TreeCodeType::Code, 3),
            (TreeCodeType::Code, 1),
            (TreeCodeType::Code, 2),
            (TreeCodeType::Code, 2),
            (TreeCodeType::ZeroShort, 8),
        ],
        code_lengths,
        num_literals: 258,
        num_dist: 12,
        num_code_lengths: 19,
    };

    let mut encoder = RecordingPredictionEncoder::new();
    predict_tree_for_block(&huff_origin, &freq, &mut encoder).unwrap();
    assert!(encoder.count_nondefault_actions() > 0);

    let mut decoder = ReplayPredictionDecoder::new(encoder.actions());
    let regenerated_header = recreate_tree_for_block(&freq, &mut decoder).unwrap();

    assert_eq!(huff_origin, regenerated_header);
}

/// corrupted corrections are rejected rather than producing an inconsistent table
#[test]
fn reject_out_of_range_runs() {
    use crate::statistical_codec::{CodecAction, ReplayPredictionDecoder};

    let freq = TokenFrequency::default();

    // switch the first code to a long zero run, then correct the predicted
    // run of 11 up to 200 which is more than the format allows
    let actions = [
        CodecAction::Misprediction(CodecMisprediction::LiteralCountMisprediction, false),
        CodecAction::Misprediction(CodecMisprediction::DistanceCountMisprediction, false),
        CodecAction::Correction(CodecCorrection::LDTypeCorrection, 4),
        CodecAction::Correction(
            CodecCorrection::RepeatCountCorrection,
            crate::statistical_codec::encode_difference(11, 200),
        ),
    ];
    let mut decoder = ReplayPredictionDecoder::new(&actions);
    let e = recreate_tree_for_block(&freq, &mut decoder).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);
}
