/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

/// number of bits needed to represent n (0 for 0)
pub fn bit_length(n: u32) -> u32 {
    32 - n.leading_zeros()
}

/// reverses the order of the low `len` bits of `value`
pub fn bit_reverse(value: u32, len: u32) -> u32 {
    if len == 0 {
        0
    } else {
        value.reverse_bits() >> (32 - len)
    }
}

/// mask with the low `len` bits set, valid for len in 0..=32
#[inline(always)]
pub fn low_mask(len: u32) -> u32 {
    if len >= 32 { u32::MAX } else { (1u32 << len) - 1 }
}

#[test]
fn test_bit_helpers() {
    assert_eq!(bit_length(0), 0);
    assert_eq!(bit_length(1), 1);
    assert_eq!(bit_length(255), 8);
    assert_eq!(bit_length(256), 9);
    assert_eq!(bit_length(u32::MAX), 32);

    assert_eq!(bit_reverse(0b001, 3), 0b100);
    assert_eq!(bit_reverse(0b1101, 4), 0b1011);
    assert_eq!(bit_reverse(0x1234, 0), 0);

    assert_eq!(low_mask(0), 0);
    assert_eq!(low_mask(5), 0x1f);
    assert_eq!(low_mask(32), u32::MAX);
}
