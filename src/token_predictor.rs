/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::{
    deflate::{
        deflate_constants::{MAX_MATCH, MAX_STORED_BLOCK_LEN, MAX_WINDOW_SIZE, MIN_MATCH},
        deflate_token::{
            BT_DYNAMICHUFF, BT_STATICHUFF, BT_STORED, DeflateHuffmanType, DeflateToken,
            DeflateTokenBlock, DeflateTokenBlockType, DeflateTokenReference, TokenFrequency,
        },
    },
    estimator::{
        preflate_parameter_estimator::{BlockTypeStrategy, TokenPredictorParameters},
        preflate_parse_config::{DictionaryAddPolicy, MatchTieBreak, MatchingType},
    },
    hash_chain::HashChain,
    preflate_error::{AddContext, ExitCode, Result, err_exit_code},
    preflate_input::PreflateInput,
    statistical_codec::{
        CodecCorrection, CodecMisprediction, PredictionDecoder, PredictionEncoder,
    },
    tree_predictor::{predict_tree_for_block, recreate_tree_for_block},
};

/// how many chain entries are walked to find the index of a reference that
/// wasn't predicted. References further down the chain are stored explicitly.
const MAX_HOP_CHAIN: usize = 4096;

/// Replays the match search of a zlib-like encoder over the plain text of one
/// meta-block and encodes (or decodes) where the actual tokens differ.
pub struct TokenPredictor {
    chain: HashChain,
    params: TokenPredictorParameters,

    /// the longer match the lazy search found at the next position, which
    /// zlib carries over instead of searching again
    pending_reference: Option<(usize, DeflateTokenReference)>,

    prev_block_type: Option<u32>,
}

impl std::fmt::Debug for TokenPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPredictor")
            .field("params", &self.params)
            .field("pending_reference", &self.pending_reference)
            .field("prev_block_type", &self.prev_block_type)
            .finish()
    }
}

impl TokenPredictor {
    /// Creates a predictor for the data seen by input. The prefix (the window
    /// carried over from the previous meta-block) is added to the dictionary
    /// right away so the first tokens can refer to it.
    pub fn new(params: &TokenPredictorParameters, input: &PreflateInput) -> Self {
        let mut chain = HashChain::new(input.data().len());
        chain.insert_upto(input.data(), input.prefix_length());

        Self {
            chain,
            params: *params,
            pending_reference: None,
            prev_block_type: None,
        }
    }

    fn predict_block_type(&self) -> u32 {
        if let Some(bt) = self.prev_block_type {
            return bt;
        }

        match self.params.block_type_strategy {
            BlockTypeStrategy::Dynamic | BlockTypeStrategy::Mixed => BT_DYNAMICHUFF,
            BlockTypeStrategy::Static => BT_STATICHUFF,
            BlockTypeStrategy::Uncompressed => BT_STORED,
        }
    }

    /// Encodes the corrections for one block. end_of_meta_block is true for the
    /// last block of the meta-block and final_meta_block for the meta-block that
    /// ends the stream.
    pub fn predict_block<D: PredictionEncoder>(
        &mut self,
        block: &DeflateTokenBlock,
        codec: &mut D,
        input: &mut PreflateInput,
        end_of_meta_block: bool,
        final_meta_block: bool,
    ) -> Result<()> {
        let block_len = block.plain_text_len();
        if block_len > input.remaining() as usize {
            return err_exit_code(
                ExitCode::PredictionFailure,
                "block is longer than the remaining plain text",
            );
        }

        let bt = match &block.block_type {
            DeflateTokenBlockType::Stored { .. } => BT_STORED,
            DeflateTokenBlockType::Huffman {
                huffman_type: DeflateHuffmanType::Static,
                ..
            } => BT_STATICHUFF,
            DeflateTokenBlockType::Huffman {
                huffman_type: DeflateHuffmanType::Dynamic { .. },
                ..
            } => BT_DYNAMICHUFF,
        };

        codec.encode_correction(
            CodecCorrection::BlockTypeCorrection,
            if bt == self.predict_block_type() {
                0
            } else {
                bt + 1
            },
        );
        self.prev_block_type = Some(bt);

        match &block.block_type {
            DeflateTokenBlockType::Stored {
                uncompressed,
                padding_bits,
            } => {
                codec.encode_correction_diff(
                    CodecCorrection::StoredLenCorrection,
                    uncompressed.len() as u32,
                    predict_stored_len(input),
                );
                codec.encode_correction(
                    CodecCorrection::StoredPaddingCorrection,
                    u32::from(*padding_bits),
                );

                input.advance(uncompressed.len() as u32);
            }
            DeflateTokenBlockType::Huffman {
                tokens,
                huffman_type,
            } => {
                let n = tokens.len();
                let max_token_count = self.params.max_token_count as usize;
                let consumes_rest = block_len == input.remaining() as usize;

                // the end of the block is implicit if it is full or if it ends with the data
                if n == max_token_count || (n < max_token_count && consumes_rest) {
                    codec.encode_correction(CodecCorrection::TokenCount, 0);
                } else {
                    codec.encode_correction(CodecCorrection::TokenCount, n as u32 + 1);
                }

                let mut freq = TokenFrequency::default();
                for (i, target_token) in tokens.iter().enumerate() {
                    self.predict_single_token(target_token, codec, input)
                        .with_context(|| format!("token {i}"))?;
                    freq.commit_token(target_token);
                }

                if let DeflateHuffmanType::Dynamic { huffman_encoding } = huffman_type {
                    predict_tree_for_block(huffman_encoding, &freq, codec)?;
                }
            }
        }

        codec.encode_misprediction(
            CodecMisprediction::EndOfMetaBlockMisprediction,
            end_of_meta_block != (input.remaining() == 0),
        );
        codec.encode_misprediction(
            CodecMisprediction::LastBlockMisprediction,
            block.last != (end_of_meta_block && final_meta_block),
        );

        Ok(())
    }

    /// Mirror of predict_block. Returns the block and whether it was the last
    /// block of the meta-block.
    pub fn recreate_block<D: PredictionDecoder>(
        &mut self,
        codec: &mut D,
        input: &mut PreflateInput,
        final_meta_block: bool,
    ) -> Result<(DeflateTokenBlock, bool)> {
        let bt = match codec.decode_correction(CodecCorrection::BlockTypeCorrection)? {
            0 => self.predict_block_type(),
            c @ 1..=3 => c - 1,
            c => {
                return err_exit_code(
                    ExitCode::InvalidPredictionData,
                    format!("invalid block type correction {c}"),
                );
            }
        };
        self.prev_block_type = Some(bt);

        let block_type = if bt == BT_STORED {
            let len = codec.decode_correction_diff(
                CodecCorrection::StoredLenCorrection,
                predict_stored_len(input),
            )?;
            if len as usize > MAX_STORED_BLOCK_LEN || len > input.remaining() {
                return err_exit_code(
                    ExitCode::InvalidPredictionData,
                    format!("invalid stored block length {len}"),
                );
            }

            let padding_bits = codec.decode_correction(CodecCorrection::StoredPaddingCorrection)?;
            if padding_bits >= 128 {
                return err_exit_code(
                    ExitCode::InvalidPredictionData,
                    format!("invalid stored block padding {padding_bits}"),
                );
            }

            let uncompressed = input.cur_chars(0)[..len as usize].to_vec();
            input.advance(len);

            DeflateTokenBlockType::Stored {
                uncompressed,
                padding_bits: padding_bits as u8,
            }
        } else {
            let (explicit, count) = match codec.decode_correction(CodecCorrection::TokenCount)? {
                0 => (false, self.params.max_token_count),
                c => (true, c - 1),
            };

            let mut tokens = Vec::new();
            let mut freq = TokenFrequency::default();

            while (tokens.len() as u32) < count {
                if input.remaining() == 0 {
                    if explicit {
                        return err_exit_code(
                            ExitCode::InvalidPredictionData,
                            "block token count is larger than the plain text",
                        );
                    }
                    break;
                }

                let token = self
                    .recreate_single_token(codec, input)
                    .with_context(|| format!("token {}", tokens.len()))?;
                freq.commit_token(&token);
                tokens.push(token);
            }

            let huffman_type = if bt == BT_STATICHUFF {
                DeflateHuffmanType::Static
            } else {
                DeflateHuffmanType::Dynamic {
                    huffman_encoding: recreate_tree_for_block(&freq, codec)?,
                }
            };

            DeflateTokenBlockType::Huffman {
                tokens,
                huffman_type,
            }
        };

        let end_of_meta_block = (input.remaining() == 0)
            != codec.decode_misprediction(CodecMisprediction::EndOfMetaBlockMisprediction)?;
        let last = (end_of_meta_block && final_meta_block)
            != codec.decode_misprediction(CodecMisprediction::LastBlockMisprediction)?;

        Ok((DeflateTokenBlock { block_type, last }, end_of_meta_block))
    }

    /// Predicts the token at the current position, encodes how the target differs
    /// and moves past it.
    pub fn predict_single_token<D: PredictionEncoder>(
        &mut self,
        target_token: &DeflateToken,
        codec: &mut D,
        input: &mut PreflateInput,
    ) -> Result<()> {
        let predicted_token = self.predict_token(input);

        match target_token {
            DeflateToken::Literal(_) => match predicted_token {
                DeflateToken::Literal(_) => {
                    codec.encode_misprediction(CodecMisprediction::LiteralPredictionWrong, false);
                }
                DeflateToken::Reference(_) => {
                    // target had a literal, so we were wrong if we predicted a reference
                    codec.encode_misprediction(CodecMisprediction::ReferencePredictionWrong, true);
                }
            },
            DeflateToken::Reference(target_ref) => {
                if target_ref.len() > input.remaining() || target_ref.dist() > input.pos() {
                    return err_exit_code(
                        ExitCode::PredictionFailure,
                        format!("reference {target_ref:?} doesn't fit the plain text"),
                    );
                }

                match predicted_token {
                    DeflateToken::Literal(_) => {
                        // target had a reference, so we were wrong if we predicted a literal
                        codec.encode_misprediction(CodecMisprediction::LiteralPredictionWrong, true);
                        codec.encode_correction(
                            CodecCorrection::LiteralReferenceLen,
                            target_ref.len() - MIN_MATCH,
                        );
                        codec.encode_correction(
                            CodecCorrection::DistAfterLenCorrection,
                            self.calculate_hops(target_ref, input),
                        );
                    }
                    DeflateToken::Reference(predicted_ref) => {
                        codec.encode_misprediction(
                            CodecMisprediction::ReferencePredictionWrong,
                            false,
                        );
                        codec.encode_correction_diff(
                            CodecCorrection::LenCorrection,
                            target_ref.len(),
                            predicted_ref.len(),
                        );

                        if predicted_ref.len() != target_ref.len() {
                            codec.encode_correction(
                                CodecCorrection::DistAfterLenCorrection,
                                self.calculate_hops(target_ref, input),
                            );
                        } else if predicted_ref.dist() != target_ref.dist() {
                            codec.encode_correction(
                                CodecCorrection::DistOnlyCorrection,
                                self.calculate_hops(target_ref, input) + 1,
                            );
                        } else {
                            codec.encode_correction(CodecCorrection::DistOnlyCorrection, 0);
                        }
                    }
                }

                if target_ref.len() == MAX_MATCH {
                    codec.encode_misprediction(
                        CodecMisprediction::IrregularLen258,
                        target_ref.get_irregular258(),
                    );
                }
            }
        }

        self.commit_token(target_token, input);
        Ok(())
    }

    fn recreate_single_token<D: PredictionDecoder>(
        &mut self,
        codec: &mut D,
        input: &mut PreflateInput,
    ) -> Result<DeflateToken> {
        let literal = DeflateToken::Literal(input.cur_char(0));

        let mut reference = match self.predict_token(input) {
            DeflateToken::Literal(_) => {
                if !codec.decode_misprediction(CodecMisprediction::LiteralPredictionWrong)? {
                    self.commit_token(&literal, input);
                    return Ok(literal);
                }

                let len = codec
                    .decode_correction(CodecCorrection::LiteralReferenceLen)?
                    .saturating_add(MIN_MATCH);
                self.validate_len(len, input)?;

                let hops = codec.decode_correction(CodecCorrection::DistAfterLenCorrection)?;
                DeflateTokenReference::new(len, self.hop_match(len, hops, input)?, false)
            }
            DeflateToken::Reference(predicted_ref) => {
                if codec.decode_misprediction(CodecMisprediction::ReferencePredictionWrong)? {
                    self.commit_token(&literal, input);
                    return Ok(literal);
                }

                let len = codec
                    .decode_correction_diff(CodecCorrection::LenCorrection, predicted_ref.len())?;
                self.validate_len(len, input)?;

                if len != predicted_ref.len() {
                    let hops = codec.decode_correction(CodecCorrection::DistAfterLenCorrection)?;
                    DeflateTokenReference::new(len, self.hop_match(len, hops, input)?, false)
                } else {
                    match codec.decode_correction(CodecCorrection::DistOnlyCorrection)? {
                        0 => predicted_ref,
                        hops => DeflateTokenReference::new(
                            len,
                            self.hop_match(len, hops - 1, input)?,
                            false,
                        ),
                    }
                }
            }
        };

        if reference.len() == MAX_MATCH {
            reference.set_irregular258(
                codec.decode_misprediction(CodecMisprediction::IrregularLen258)?,
            );
        }

        let token = DeflateToken::Reference(reference);
        self.commit_token(&token, input);
        Ok(token)
    }

    fn validate_len(&self, len: u32, input: &PreflateInput) -> Result<()> {
        if !(MIN_MATCH..=MAX_MATCH).contains(&len) || len > input.remaining() {
            return err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("invalid reference length {len}"),
            );
        }
        Ok(())
    }

    /// the token the encoder would most likely have written at the current position
    pub(crate) fn predict_token(&mut self, input: &PreflateInput) -> DeflateToken {
        let pos = input.pos() as usize;
        let literal = DeflateToken::Literal(input.cur_char(0));

        self.chain.insert_upto(input.data(), pos);

        if pos == 0 || input.remaining() < MIN_MATCH {
            return literal;
        }

        let m = match self.pending_reference.take() {
            Some((pending_pos, r)) if pending_pos == pos => Some(r),
            _ => self.longest_match(input, 0, MIN_MATCH - 1, self.params.max_chain),
        };

        let Some(match_token) = m else {
            return literal;
        };

        if let MatchingType::Lazy {
            good_length,
            max_lazy,
        } = self.params.matching_type
        {
            // match is too small and far way to be worth encoding as a distance/length pair.
            if self.too_far(&match_token) {
                return literal;
            }

            // Check for a longer match that starts at the next byte, in which case we should
            // just emit a literal instead of a distance/length pair.
            if match_token.len() < u32::from(max_lazy)
                && input.remaining() >= match_token.len() + 2
            {
                let mut max_chain = self.params.max_chain;

                if self.params.zlib_compatible && match_token.len() >= u32::from(good_length) {
                    // zlib shortens the search if the match is "good" enough
                    max_chain >>= 2;
                }

                self.chain.insert_upto(input.data(), pos + 1);

                if let Some(next) = self.longest_match(input, 1, match_token.len(), max_chain) {
                    if next.len() > match_token.len() && !self.too_far(&next) {
                        if self.params.zlib_compatible {
                            self.pending_reference = Some((pos + 1, next));
                        }
                        return literal;
                    }
                }
            }
        }

        DeflateToken::Reference(match_token)
    }

    fn too_far(&self, r: &DeflateTokenReference) -> bool {
        r.len() == MIN_MATCH && r.dist() > self.params.max_dist_3_matches
    }

    /// searches the hash chain for the longest match at the current position + offset
    /// that is longer than prev_len
    fn longest_match(
        &self,
        input: &PreflateInput,
        offset: usize,
        prev_len: u32,
        max_chain: u32,
    ) -> Option<DeflateTokenReference> {
        let data = input.data();
        let pos = input.pos() as usize + offset;
        let remaining = data.len() - pos;
        if remaining < MIN_MATCH as usize {
            return None;
        }

        let max_len = remaining.min(MAX_MATCH as usize);
        let nice_length = self.params.nice_length as usize;
        let farthest = self.params.tie_break == MatchTieBreak::Farthest;

        let mut best_len = prev_len as usize;
        let mut best = None;

        for p in self
            .chain
            .iterate(data, pos, self.params.max_dist())
            .take(max_chain as usize)
        {
            // can't be longer if the byte just past the best match differs
            if !farthest && data[p + best_len] != data[pos + best_len] {
                continue;
            }

            let len = match_len(data, p, pos, max_len);
            if len > best_len || (farthest && best.is_some() && len == best_len) {
                best_len = len;
                best = Some(DeflateTokenReference::new(
                    len as u32,
                    (pos - p) as u32,
                    false,
                ));

                if len >= nice_length || len == max_len {
                    break;
                }
            }
        }

        best
    }

    /// distances of the chain candidates that supply at least len bytes, nearest first
    fn hop_candidates(&self, input: &PreflateInput, len: u32) -> impl Iterator<Item = u32> {
        let data = input.data();
        let pos = input.pos() as usize;
        let len = len as usize;

        self.chain
            .iterate(data, pos, MAX_WINDOW_SIZE)
            .take(MAX_HOP_CHAIN)
            .filter(move |&p| match_len(data, p, pos, len) >= len)
            .map(move |p| (pos - p) as u32)
    }

    /// Index of the target among the candidates that could have been chosen. A target
    /// that isn't found is coded past the end of the list with its distance.
    fn calculate_hops(&self, target: &DeflateTokenReference, input: &PreflateInput) -> u32 {
        let mut count = 0;
        for dist in self.hop_candidates(input, target.len()) {
            if dist == target.dist() {
                return count;
            }
            count += 1;
        }

        count + target.dist() - 1
    }

    /// inverse of calculate_hops
    fn hop_match(&self, len: u32, hops: u32, input: &PreflateInput) -> Result<u32> {
        let mut count = 0;
        for dist in self.hop_candidates(input, len) {
            if count == hops {
                return Ok(dist);
            }
            count += 1;
        }

        match (hops - count).checked_add(1) {
            Some(dist) if dist <= input.pos() && dist <= MAX_WINDOW_SIZE => Ok(dist),
            _ => err_exit_code(
                ExitCode::InvalidPredictionData,
                format!("distance correction {hops} out of range"),
            ),
        }
    }

    fn commit_token(&mut self, token: &DeflateToken, input: &mut PreflateInput) {
        match token {
            DeflateToken::Literal(_) => {
                input.advance(1);
            }
            DeflateToken::Reference(r) => {
                if let DictionaryAddPolicy::AddFirst(limit) = self.params.add_policy {
                    if r.len() > u32::from(limit) {
                        // only the start of the match goes into the dictionary
                        let pos = input.pos() as usize;
                        self.chain.insert_upto(input.data(), pos + 1);
                        self.chain.skip_to(pos + r.len() as usize);
                    }
                }
                input.advance(r.len());
            }
        }
    }
}

/// number of bytes (up to max_len) that match between the two positions
#[inline]
fn match_len(data: &[u8], a: usize, b: usize, max_len: usize) -> usize {
    data[a..]
        .iter()
        .zip(&data[b..b + max_len])
        .take_while(|(x, y)| x == y)
        .count()
}

fn predict_stored_len(input: &PreflateInput) -> u32 {
    input.remaining().min(MAX_STORED_BLOCK_LEN as u32)
}

/// The bits after the final block up to the byte boundary. Zero padding is
/// what every encoder writes, so anything else is stored as a value.
pub fn predict_tail_padding<D: PredictionEncoder>(tail_padding_bits: u8, codec: &mut D) {
    codec.encode_misprediction(CodecMisprediction::NonZeroPadding, tail_padding_bits != 0);
    if tail_padding_bits != 0 {
        codec.encode_value(u16::from(tail_padding_bits), 7);
    }
}

pub fn recreate_tail_padding<D: PredictionDecoder>(codec: &mut D) -> Result<u8> {
    if codec.decode_misprediction(CodecMisprediction::NonZeroPadding)? {
        Ok(codec.decode_value(7)? as u8)
    } else {
        Ok(0)
    }
}

#[cfg(test)]
fn test_params(
    matching_type: MatchingType,
    add_policy: DictionaryAddPolicy,
    tie_break: MatchTieBreak,
) -> TokenPredictorParameters {
    TokenPredictorParameters {
        window_bits: 15,
        very_far_matches_detected: false,
        matching_type,
        add_policy,
        nice_length: 128,
        max_chain: 128,
        max_dist_3_matches: 4096,
        tie_break,
        zlib_compatible: true,
        max_token_count: 1000,
        block_type_strategy: BlockTypeStrategy::Dynamic,
    }
}

/// Compresses the data with the predictor itself, so the result is a stream
/// the predictor has to predict without any corrections.
#[cfg(test)]
pub(crate) fn generate_predicted_blocks(
    plain_text: &crate::preflate_input::PlainText,
    params: &TokenPredictorParameters,
) -> Vec<DeflateTokenBlock> {
    use crate::statistical_codec::DefaultOnlyDecoder;

    let mut input = PreflateInput::new(plain_text);
    let mut predictor = TokenPredictor::new(params, &input);
    let mut blocks = Vec::new();

    while input.remaining() > 0 {
        let mut tokens = Vec::new();
        while input.remaining() > 0 && tokens.len() < params.max_token_count as usize {
            let t = predictor.predict_token(&input);
            predictor.commit_token(&t, &mut input);
            tokens.push(t);
        }

        let freq = TokenFrequency::from_tokens(&tokens);
        let huffman_encoding = recreate_tree_for_block(&freq, &mut DefaultOnlyDecoder {}).unwrap();

        blocks.push(DeflateTokenBlock {
            block_type: DeflateTokenBlockType::Huffman {
                tokens,
                huffman_type: DeflateHuffmanType::Dynamic { huffman_encoding },
            },
            last: input.remaining() == 0,
        });
    }

    blocks
}

/// Runs the blocks through the predictor and back again, returning the number of
/// corrections that were needed.
#[cfg(test)]
fn roundtrip_blocks(
    plain_text: &crate::preflate_input::PlainText,
    params: &TokenPredictorParameters,
    blocks: &[DeflateTokenBlock],
) -> usize {
    use crate::statistical_codec::{RecordingPredictionEncoder, ReplayPredictionDecoder};

    let mut encoder = RecordingPredictionEncoder::new();
    let mut input = PreflateInput::new(plain_text);
    let mut predictor = TokenPredictor::new(params, &input);
    for (i, b) in blocks.iter().enumerate() {
        predictor
            .predict_block(b, &mut encoder, &mut input, i == blocks.len() - 1, true)
            .unwrap();
    }

    let mut decoder = ReplayPredictionDecoder::new(encoder.actions());
    let mut input = PreflateInput::new(plain_text);
    let mut predictor = TokenPredictor::new(params, &input);
    let mut recreated = Vec::new();
    loop {
        let (b, end) = predictor
            .recreate_block(&mut decoder, &mut input, true)
            .unwrap();
        recreated.push(b);
        if end {
            break;
        }
    }

    assert!(decoder.is_done());
    assert!(recreated == blocks, "recreated blocks differ");

    encoder.count_nondefault_actions()
}

#[test]
fn predicted_stream_is_perfect() {
    use crate::preflate_input::PlainText;
    use crate::statistical_codec::{AssertDefaultOnlyEncoder, DefaultOnlyDecoder};

    let plain_text = PlainText::new_with_data(crate::utils::test_data(60000, 1));

    for params in [
        test_params(
            MatchingType::Lazy {
                good_length: 8,
                max_lazy: 16,
            },
            DictionaryAddPolicy::AddAll,
            MatchTieBreak::Nearest,
        ),
        test_params(
            MatchingType::Greedy,
            DictionaryAddPolicy::AddFirst(4),
            MatchTieBreak::Nearest,
        ),
        test_params(
            MatchingType::Lazy {
                good_length: 32,
                max_lazy: 258,
            },
            DictionaryAddPolicy::AddAll,
            MatchTieBreak::Farthest,
        ),
    ] {
        let blocks = generate_predicted_blocks(&plain_text, &params);
        assert!(blocks.len() > 1);

        let mut input = PreflateInput::new(&plain_text);
        let mut predictor = TokenPredictor::new(&params, &input);
        for (i, b) in blocks.iter().enumerate() {
            predictor
                .predict_block(
                    b,
                    &mut AssertDefaultOnlyEncoder {},
                    &mut input,
                    i == blocks.len() - 1,
                    true,
                )
                .unwrap();
        }

        // nothing stored, so the blocks come back from defaults alone
        let mut input = PreflateInput::new(&plain_text);
        let mut predictor = TokenPredictor::new(&params, &input);
        for b in blocks.iter() {
            let (r, end) = predictor
                .recreate_block(&mut DefaultOnlyDecoder {}, &mut input, true)
                .unwrap();
            assert!(r == *b);
            assert_eq!(end, b.last);
        }
    }
}

/// a stream written by a different encoder needs corrections, but still comes back exactly
#[test]
fn miniz_stream_roundtrip() {
    use crate::deflate::deflate_reader::parse_deflate_whole;

    let data = crate::utils::test_data(80000, 2);

    for level in [1, 6, 9] {
        let compressed = miniz_oxide::deflate::compress_to_vec(&data, level);
        let contents = parse_deflate_whole(&compressed).unwrap();

        let params = test_params(
            MatchingType::Lazy {
                good_length: 8,
                max_lazy: 16,
            },
            DictionaryAddPolicy::AddAll,
            MatchTieBreak::Nearest,
        );

        let corrections = roundtrip_blocks(&contents.plain_text, &params, &contents.blocks);
        assert!(corrections > 0);
    }
}

#[test]
fn stored_block_with_padding() {
    use crate::preflate_input::PlainText;

    let mut plain_text = PlainText::new();
    plain_text.append(b"stored data that isn't compressed");
    plain_text.append(b"abcabcabc");

    let blocks = [
        DeflateTokenBlock {
            block_type: DeflateTokenBlockType::Stored {
                uncompressed: b"stored data that isn't compressed".to_vec(),
                padding_bits: 0b101,
            },
            last: false,
        },
        DeflateTokenBlock {
            block_type: DeflateTokenBlockType::Huffman {
                tokens: vec![
                    DeflateToken::Literal(b'a'),
                    DeflateToken::Literal(b'b'),
                    DeflateToken::Literal(b'c'),
                    DeflateToken::new_ref(6, 3, false),
                ],
                huffman_type: DeflateHuffmanType::Static,
            },
            last: true,
        },
    ];

    let corrections = roundtrip_blocks(&plain_text, &TokenPredictorParameters::default(), &blocks);
    assert!(corrections > 0);
}

/// a reference from the start of a meta-block that reaches back to the very first
/// byte of the 32K window carried over from the previous one
#[test]
fn reference_into_prefix_at_window_limit() {
    use crate::preflate_input::PlainText;

    let prefix = crate::utils::test_data(32768, 5);
    let mut plain_text = PlainText::new_with_prefix(&prefix, 1000000);
    plain_text.append(&prefix[..20]);
    plain_text.append(b"xyz");

    let blocks = [DeflateTokenBlock {
        block_type: DeflateTokenBlockType::Huffman {
            tokens: vec![
                DeflateToken::new_ref(20, 32768, false),
                DeflateToken::Literal(b'x'),
                DeflateToken::Literal(b'y'),
                DeflateToken::Literal(b'z'),
            ],
            huffman_type: DeflateHuffmanType::Static,
        },
        last: true,
    }];

    roundtrip_blocks(&plain_text, &TokenPredictorParameters::default(), &blocks);

    // without the prefix the same reference points before the start of the data
    let mut no_prefix = PlainText::new();
    no_prefix.append(&prefix[..20]);
    no_prefix.append(b"xyz");

    let mut input = PreflateInput::new(&no_prefix);
    let mut predictor = TokenPredictor::new(&TokenPredictorParameters::default(), &input);
    let e = predictor
        .predict_block(
            &blocks[0],
            &mut crate::statistical_codec::CountNonDefaultActions::default(),
            &mut input,
            true,
            true,
        )
        .unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::PredictionFailure);
}

#[test]
fn tail_padding_roundtrip() {
    use crate::statistical_codec::{RecordingPredictionEncoder, ReplayPredictionDecoder};

    for bits in [0u8, 1, 0b1010101] {
        let mut encoder = RecordingPredictionEncoder::new();
        predict_tail_padding(bits, &mut encoder);
        assert_eq!(encoder.count_nondefault_actions(), if bits == 0 { 0 } else { 2 });

        let mut decoder = ReplayPredictionDecoder::new(encoder.actions());
        assert_eq!(recreate_tail_padding(&mut decoder).unwrap(), bits);
    }
}
