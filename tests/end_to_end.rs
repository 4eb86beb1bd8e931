/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::sync::Arc;

use preflate_engine::{
    ExitCode, NoProgress, PreflateConfig, ProgressCounter, preflate_decode, preflate_reencode,
    preflate_whole_deflate_stream, recreate_whole_deflate_stream,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// repetitive text with some noise mixed in, deterministic for the seed
fn sample_data(len: usize, seed: u64) -> Vec<u8> {
    const WORDS: [&[u8]; 16] = [
        b"the", b"quick", b"brown", b"fox", b"jumps", b"over", b"lazy", b"dog", b"deflate",
        b"stream", b"block", b"token", b"window", b"match", b"literal", b"huffman",
    ];

    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut data = Vec::with_capacity(len + 16);

    while data.len() < len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let r = state >> 33;

        if r % 17 == 0 {
            data.push((r >> 8) as u8);
        } else {
            data.extend_from_slice(WORDS[(r % 16) as usize]);
            data.push(b' ');
        }
    }

    data.truncate(len);
    data
}

/// packs (value, bit count) pairs LSB first the way deflate does
fn pack_bits(fields: &[(u32, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut acc = 0u64;
    let mut count = 0;

    for &(value, bits) in fields {
        acc |= u64::from(value) << count;
        count += bits;
        while count >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            count -= 8;
        }
    }
    if count > 0 {
        out.push(acc as u8);
    }
    out
}

/// raw deflate stream from the real zlib at the given level
fn zlib_compress(input: &[u8], level: i32) -> Vec<u8> {
    use libz_sys::{compress2, uLong, uLongf, Z_OK};

    let mut output = vec![0u8; input.len() + input.len() / 1000 + 1024];
    let mut output_len = output.len() as uLongf;

    let r = unsafe {
        compress2(
            output.as_mut_ptr(),
            &mut output_len,
            input.as_ptr(),
            input.len() as uLong,
            level,
        )
    };
    assert_eq!(r, Z_OK);
    output.truncate(output_len as usize);

    // strip the zlib header and the adler32 trailer
    output[2..output.len() - 4].to_vec()
}

fn verify_roundtrip(compressed: &[u8], config: &PreflateConfig) -> (Vec<u8>, Vec<u8>) {
    let r = preflate_whole_deflate_stream(compressed, config).unwrap();
    assert_eq!(r.compressed_size, compressed.len());

    let recreated = recreate_whole_deflate_stream(&r.diff, &r.plain_text, config).unwrap();
    assert!(recreated == compressed, "recreated stream differs");

    (r.plain_text, r.diff)
}

#[test]
fn end_to_end_miniz_levels() {
    init_logging();

    let data = sample_data(300_000, 1);
    for level in 0..=10 {
        let compressed = miniz_oxide::deflate::compress_to_vec(&data, level);
        let (plain_text, diff) = verify_roundtrip(&compressed, &PreflateConfig::default());
        assert_eq!(plain_text, data, "level {level}");

        println!(
            "level {level}: compressed {} diff {}",
            compressed.len(),
            diff.len()
        );
    }
}

#[test]
fn end_to_end_zlib_levels() {
    init_logging();

    let data = sample_data(200_000, 10);
    for level in 1..=9 {
        let compressed = zlib_compress(&data, level);
        let (plain_text, diff) = verify_roundtrip(&compressed, &PreflateConfig::default());
        assert!(plain_text == data, "level {level}");

        println!(
            "zlib level {level}: compressed {} diff {}",
            compressed.len(),
            diff.len()
        );

        // the estimator models zlib, so there is little left to correct
        assert!(
            diff.len() * 10 < compressed.len(),
            "level {level}: diff {} for {} compressed bytes",
            diff.len(),
            compressed.len()
        );
    }
}

#[test]
fn ten_kilobyte_file() {
    let data = sample_data(10240, 2);
    let compressed = zlib_compress(&data, 6);

    let mut payload = Vec::new();
    let mut diff = Vec::new();
    let summary = preflate_decode(
        &compressed,
        &mut payload,
        &mut diff,
        Arc::new(NoProgress),
        &PreflateConfig::default(),
    )
    .unwrap();

    assert_eq!(payload.len(), 10240);
    assert_eq!(summary.payload_size, 10240);
    assert_eq!(summary.compressed_size, compressed.len());
    assert_eq!(summary.meta_block_count, 1);

    let mut output = Vec::new();
    preflate_reencode(
        &diff,
        &payload,
        &mut output,
        Arc::new(NoProgress),
        &PreflateConfig::default(),
    )
    .unwrap();
    assert!(output == compressed);
}

#[test]
fn meta_block_size_does_not_change_payload() {
    let data = sample_data(1_200_000, 3);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 5);

    let small = PreflateConfig {
        meta_block_size: 256 * 1024,
        ..PreflateConfig::default()
    };
    let large = PreflateConfig {
        meta_block_size: 2 * 1024 * 1024,
        ..PreflateConfig::default()
    };

    let small_result = preflate_whole_deflate_stream(&compressed, &small).unwrap();
    let large_result = preflate_whole_deflate_stream(&compressed, &large).unwrap();

    assert!(small_result.meta_block_count > 1);
    assert_eq!(large_result.meta_block_count, 1);
    assert!(small_result.plain_text == large_result.plain_text);
    assert!(small_result.plain_text == data);

    // each diff recreates the stream with its own payload
    for (r, config) in [(&small_result, &small), (&large_result, &large)] {
        let recreated = recreate_whole_deflate_stream(&r.diff, &r.plain_text, config).unwrap();
        assert!(recreated == compressed);
    }
}

#[test]
fn worker_count_is_not_observable() {
    let data = sample_data(1_000_000, 4);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 7);

    let mut results = Vec::new();
    for worker_threads in [1, 4] {
        let config = PreflateConfig {
            meta_block_size: 256 * 1024,
            worker_threads,
            ..PreflateConfig::default()
        };
        results.push(preflate_whole_deflate_stream(&compressed, &config).unwrap());
    }

    assert!(results[0].plain_text == results[1].plain_text);
    assert!(results[0].diff == results[1].diff);
}

#[test]
fn tail_padding_bits_are_restored() {
    // a static block with the literal 'a' uses 18 bits, leaving 6 bits of padding
    for padding in [0u8, 1, 0b101101, 0b111111] {
        let compressed = [0x4b, 0x04, padding << 2];

        let (plain_text, _) = verify_roundtrip(&compressed, &PreflateConfig::default());
        assert_eq!(plain_text, b"a");
    }
}

#[test]
fn progress_counts_every_byte() {
    let data = sample_data(600_000, 5);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 3);
    let config = PreflateConfig {
        meta_block_size: 256 * 1024,
        ..PreflateConfig::default()
    };

    let progress = Arc::new(ProgressCounter::new());
    let mut payload = Vec::new();
    let mut diff = Vec::new();
    preflate_decode(
        &compressed,
        &mut payload,
        &mut diff,
        progress.clone(),
        &config,
    )
    .unwrap();

    assert_eq!(progress.bytes(), data.len() as u64);
}

#[test]
fn invalid_huffman_table_fails() {
    // a stored block with "hello", then a dynamic block whose code length code
    // has four codes of length one
    let mut compressed = pack_bits(&[(0, 1), (0, 2), (0, 5), (5, 16), (!5 & 0xffff, 16)]);
    compressed.extend_from_slice(b"hello");
    compressed.extend(pack_bits(&[
        (1, 1),
        (2, 2),
        (0, 5),
        (0, 5),
        (0, 4),
        (1, 3),
        (1, 3),
        (1, 3),
        (1, 3),
        (0, 32),
    ]));

    let e = preflate_whole_deflate_stream(&compressed, &PreflateConfig::default()).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidDeflate);
}

#[test]
fn truncated_stream_fails() {
    let data = sample_data(50_000, 6);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 6);

    let e = preflate_whole_deflate_stream(&compressed[..compressed.len() / 2], &PreflateConfig::default())
        .unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ShortRead);
}

#[test]
fn corrupted_diff_fails() {
    let data = sample_data(100_000, 7);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 6);
    let r = preflate_whole_deflate_stream(&compressed, &PreflateConfig::default()).unwrap();
    let config = PreflateConfig::default();

    // the first record refers to a model that doesn't exist
    let mut bad_model = r.diff.clone();
    bad_model[1] = 5 << 1;
    let e = recreate_whole_deflate_stream(&bad_model, &r.plain_text, &config).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);

    // truncated
    let e = recreate_whole_deflate_stream(&r.diff[..r.diff.len() - 1], &r.plain_text, &config)
        .unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);

    // unknown version
    let mut bad_version = r.diff.clone();
    bad_version[0] = 0xff;
    let e = recreate_whole_deflate_stream(&bad_version, &r.plain_text, &config).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);
}

#[test]
fn damaged_diff_never_recreates_a_different_stream() {
    let data = sample_data(20_000, 11);
    let compressed = zlib_compress(&data, 6);
    let config = PreflateConfig::default();
    let r = preflate_whole_deflate_stream(&compressed, &config).unwrap();

    for byte in 0..r.diff.len() {
        for bit in 0..8 {
            let mut damaged = r.diff.clone();
            damaged[byte] ^= 1 << bit;

            match recreate_whole_deflate_stream(&damaged, &r.plain_text, &config) {
                Ok(recreated) => assert!(
                    recreated == compressed,
                    "byte {byte} bit {bit} recreated a different stream"
                ),
                Err(e) => assert_eq!(
                    e.exit_code(),
                    ExitCode::InvalidPredictionData,
                    "byte {byte} bit {bit}: {e}"
                ),
            }
        }
    }
}

#[test]
fn payload_mismatch_fails() {
    let data = sample_data(100_000, 8);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 6);
    let r = preflate_whole_deflate_stream(&compressed, &PreflateConfig::default()).unwrap();
    let config = PreflateConfig::default();

    let mut longer = r.plain_text.clone();
    longer.push(0);
    let e = recreate_whole_deflate_stream(&r.diff, &longer, &config).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);

    let shorter = &r.plain_text[..r.plain_text.len() - 1];
    let e = recreate_whole_deflate_stream(&r.diff, shorter, &config).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);

    let mut changed = r.plain_text.clone();
    changed[500] ^= 0x20;
    let e = recreate_whole_deflate_stream(&r.diff, &changed, &config).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidPredictionData);
}

#[test]
fn verification_can_be_turned_off() {
    let data = sample_data(80_000, 9);
    let compressed = miniz_oxide::deflate::compress_to_vec(&data, 9);

    let config = PreflateConfig {
        verify: false,
        ..PreflateConfig::default()
    };
    let (plain_text, _) = verify_roundtrip(&compressed, &config);
    assert!(plain_text == data);
}
