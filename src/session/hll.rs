//! HyperLogLog approximation for `COUNT` (spec §4.7, NIP-45, §9 Open Question).
//! 256 one-byte registers, hex-encoded to 512 chars. The offset derivation is
//! preserved verbatim from the source behavior the spec calls out, even
//! though it yields only 16 possible offsets (8..23) — do not "fix" it.

use crate::event::leading_zero_bits;
use sha2::{Digest, Sha256};

pub const REGISTER_COUNT: usize = 256;

/// Derives the byte offset used to both index a register and measure
/// leading-zero bits, from a filter's first tag value (spec §4.7).
pub fn derive_offset(tag_value: &str) -> usize {
    let canonical = if is_64_hex(tag_value) {
        tag_value.to_string()
    } else if let Some(second) = tag_value.split(':').nth(1) {
        if is_64_hex(second) {
            second.to_string()
        } else {
            hex::encode(Sha256::digest(tag_value.as_bytes()))
        }
    } else {
        hex::encode(Sha256::digest(tag_value.as_bytes()))
    };

    let digit = canonical.as_bytes()[32] as char;
    let value = digit.to_digit(16).unwrap_or(0) as usize;
    value + 8
}

fn is_64_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Updates `registers` for one matching `pubkey` (spec §4.7):
/// `registers[index] = max(registers[index], leadingZeros(pubkey, offset+1) + 1)`,
/// saturated at 255, where `index` is the byte at `offset` in the 32-byte pubkey.
pub fn update_registers(registers: &mut [u8; REGISTER_COUNT], pubkey_hex: &str, offset: usize) {
    let Ok(bytes) = hex::decode(pubkey_hex) else { return };
    if bytes.len() != 32 || offset >= 32 {
        return;
    }
    let index = bytes[offset] as usize;
    let measured = if offset + 1 < 32 { leading_zero_bits(&bytes[offset + 1..]) } else { 0 };
    let candidate = (measured + 1).min(255) as u8;
    registers[index] = registers[index].max(candidate);
}

pub fn encode_registers(registers: &[u8; REGISTER_COUNT]) -> String {
    hex::encode(registers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_uses_hex_value_directly() {
        let tag = "a".repeat(64);
        // position 32 is 'a' -> 10 + 8 = 18
        assert_eq!(derive_offset(&tag), 18);
    }

    #[test]
    fn offset_range_is_8_to_23() {
        for digit in "0123456789abcdef".chars() {
            let mut s = "f".repeat(64);
            s.replace_range(32..33, &digit.to_string());
            let offset = derive_offset(&s);
            assert!((8..=23).contains(&offset));
        }
    }

    #[test]
    fn non_hex_value_falls_back_to_sha256() {
        let offset = derive_offset("not-a-hex-value");
        assert!((8..=23).contains(&offset));
    }

    #[test]
    fn register_update_is_monotonic() {
        let mut regs = [0u8; REGISTER_COUNT];
        let pk = "00".repeat(32);
        update_registers(&mut regs, &pk, 8);
        let after_first = regs[regs.iter().position(|&b| b != 0).unwrap_or(0)];
        update_registers(&mut regs, &pk, 8);
        // second update of the same pubkey never lowers a register
        assert!(regs.iter().sum::<u8>() as u32 >= after_first as u32);
    }
}
