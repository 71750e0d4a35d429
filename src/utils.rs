//! Utility functions for identifiers and one-time codes

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Numeric one-time code of `digits` length, zero padded.
///
/// Draws on the random tail of a fresh uuid7 (bytes 8..16).
pub fn new_numeric_code(digits: u32) -> String {
    let id = uuid7();
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&id.as_bytes()[8..16]);
    let modulus = 10u64.pow(digits.min(18));
    let code = u64::from_be_bytes(tail) % modulus;

    format!("{:0width$}", code, width = digits as usize)
}

/// Fixed width, lexically sortable key segment for a sequence number.
pub fn sortable_seq(seq: u64) -> String {
    hex::encode(seq.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        let id = new_uuid_to_bech32("order_").unwrap();
        assert!(id.starts_with("order_1"));
        assert_ne!(id, new_uuid_to_bech32("order_").unwrap());
    }

    #[test]
    fn numeric_codes_have_fixed_width() {
        for _ in 0..50 {
            let code = new_numeric_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn sortable_seq_preserves_order() {
        assert!(sortable_seq(9) < sortable_seq(10));
        assert!(sortable_seq(255) < sortable_seq(256));
        assert_eq!(sortable_seq(1).len(), 16);
    }
}
