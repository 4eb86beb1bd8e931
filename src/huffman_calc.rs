/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Length limited Huffman code length calculation (in-place minimum redundancy
//! followed by the miniz style max code size enforcement).

const MAX_SUPPORTED_HUFF_CODESIZE: usize = 32;

/// calculates the bit lengths for a given distribution of symbols.
/// Trailing unused symbols are removed and the maximum code size is enforced.
pub fn calc_bit_lengths(sym_count: &[u32], code_size_limit: usize) -> Vec<u8> {
    let mut symbols: Vec<SymFreq> = sym_count
        .iter()
        .enumerate()
        .filter(|(_, c)| **c != 0)
        .map(|(i, &c)| SymFreq {
            key: c,
            sym_index: i as u16,
        })
        .collect();

    let max_used = symbols.last().map_or(0, |s| usize::from(s.sym_index) + 1);
    let num_used_symbols = symbols.len();

    // stable, so equal frequencies stay in symbol order
    symbols.sort_by_key(|s| s.key);
    calculate_minimum_redundancy(&mut symbols);

    let mut num_codes = [0i32; MAX_SUPPORTED_HUFF_CODESIZE + 1];
    for symbol in symbols.iter() {
        num_codes[(symbol.key as usize).min(MAX_SUPPORTED_HUFF_CODESIZE)] += 1;
    }

    enforce_max_code_size(&mut num_codes, num_used_symbols, code_size_limit);

    let mut code_sizes = vec![0; max_used];

    let mut last = num_used_symbols;
    for (i, &num_item) in num_codes
        .iter()
        .enumerate()
        .take(code_size_limit + 1)
        .skip(1)
    {
        let first = last - num_item as usize;
        for symbol in &symbols[first..last] {
            code_sizes[usize::from(symbol.sym_index)] = i as u8;
        }
        last = first;
    }

    code_sizes
}

#[derive(Copy, Clone, Debug)]
struct SymFreq {
    key: u32,
    sym_index: u16,
}

/// Moffat and Katajainen in-place calculation of code lengths on a list sorted
/// by ascending frequency. On return key holds the code length of each symbol.
fn calculate_minimum_redundancy(symbols: &mut [SymFreq]) {
    match symbols.len() {
        0 => (),
        1 => symbols[0].key = 1,
        n => {
            symbols[0].key += symbols[1].key;
            let mut root = 0;
            let mut leaf = 2;
            for next in 1..n - 1 {
                if (leaf >= n) || (symbols[root].key < symbols[leaf].key) {
                    symbols[next].key = symbols[root].key;
                    symbols[root].key = next as u32;
                    root += 1;
                } else {
                    symbols[next].key = symbols[leaf].key;
                    leaf += 1;
                }

                if (leaf >= n) || (root < next && symbols[root].key < symbols[leaf].key) {
                    symbols[next].key = symbols[next].key.wrapping_add(symbols[root].key);
                    symbols[root].key = next as u32;
                    root += 1;
                } else {
                    symbols[next].key = symbols[next].key.wrapping_add(symbols[leaf].key);
                    leaf += 1;
                }
            }

            symbols[n - 2].key = 0;
            for next in (0..n - 2).rev() {
                symbols[next].key = symbols[symbols[next].key as usize].key + 1;
            }

            let mut avbl = 1;
            let mut used = 0;
            let mut dpth = 0;
            let mut root = (n - 2) as i32;
            let mut next = (n - 1) as i32;
            while avbl > 0 {
                while (root >= 0) && (symbols[root as usize].key == dpth) {
                    used += 1;
                    root -= 1;
                }
                while avbl > used {
                    symbols[next as usize].key = dpth;
                    next -= 1;
                    avbl -= 1;
                }
                avbl = 2 * used;
                dpth += 1;
                used = 0;
            }
        }
    }
}

fn enforce_max_code_size(num_codes: &mut [i32], code_list_len: usize, max_code_size: usize) {
    if code_list_len <= 1 {
        return;
    }

    num_codes[max_code_size] += num_codes[max_code_size + 1..].iter().sum::<i32>();
    let total = num_codes[1..=max_code_size]
        .iter()
        .rev()
        .enumerate()
        .fold(0u32, |total, (i, &x)| total + ((x as u32) << i));

    for _ in (1 << max_code_size)..total {
        num_codes[max_code_size] -= 1;
        for i in (1..max_code_size).rev() {
            if num_codes[i] != 0 {
                num_codes[i] -= 1;
                num_codes[i + 1] += 2;
                break;
            }
        }
    }
}

#[test]
fn calc_simple_distributions() {
    assert_eq!(calc_bit_lengths(&[], 15), Vec::<u8>::new());
    assert_eq!(calc_bit_lengths(&[0, 0, 5, 0], 15), [0, 0, 1]);
    assert_eq!(calc_bit_lengths(&[1, 1, 2, 0], 15), [2, 2, 1]);
    assert_eq!(calc_bit_lengths(&[1, 1, 1, 1], 15), [2, 2, 2, 2]);
}

/// the code lengths must always form a complete prefix code within the limit
#[test]
fn calc_length_limited() {
    // fibonacci frequencies would need very long codes without the limit
    let mut freq = vec![1u32, 1];
    while freq.len() < 30 {
        let n = freq[freq.len() - 1] + freq[freq.len() - 2];
        freq.push(n);
    }

    for limit in [7usize, 15] {
        let lengths = calc_bit_lengths(&freq, limit);
        assert_eq!(lengths.len(), freq.len());
        assert!(lengths.iter().all(|&l| l >= 1 && usize::from(l) <= limit));

        let kraft: u64 = lengths.iter().map(|&l| 1u64 << (limit - usize::from(l))).sum();
        assert_eq!(kraft, 1 << limit, "limit {limit}");
    }
}
