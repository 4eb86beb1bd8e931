/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

/// Deterministic text-like test data: words from a small vocabulary, with an
/// occasional run of random bytes so there are also literals to predict.
#[cfg(test)]
pub fn test_data(len: usize, seed: u64) -> Vec<u8> {
    const SYLLABLES: [&[u8]; 8] = [b"ka", b"lo", b"mer", b"tis", b"qu", b"an", b"dre", b"po"];

    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    // 64 words made of two or three syllables
    let mut vocabulary = Vec::with_capacity(64);
    for i in 0..64usize {
        let mut word = Vec::new();
        word.extend_from_slice(SYLLABLES[i % 8]);
        word.extend_from_slice(SYLLABLES[(i / 8) % 8]);
        if i % 3 == 0 {
            word.extend_from_slice(SYLLABLES[(i * 5 + 1) % 8]);
        }
        vocabulary.push(word);
    }

    let mut data = Vec::with_capacity(len + 32);
    while data.len() < len {
        let r = next();
        if r % 29 == 0 {
            let run = 1 + (r >> 8) % 24;
            for _ in 0..run {
                data.push(next() as u8);
            }
        } else {
            data.extend_from_slice(&vocabulary[((r >> 16) % 64) as usize]);
            data.push(if r % 11 == 0 { b'\n' } else { b' ' });
        }
    }

    data.truncate(len);
    data
}

#[test]
fn test_data_is_deterministic() {
    assert_eq!(test_data(1000, 1), test_data(1000, 1));
    assert_ne!(test_data(1000, 1), test_data(1000, 2));
    assert_eq!(test_data(12345, 3).len(), 12345);
}
