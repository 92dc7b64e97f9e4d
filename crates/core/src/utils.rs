//! Small helpers shared by workers building bursts.

use alloy::primitives::{keccak256, Address, B256};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random identifier of `len` ASCII letters and digits.
pub fn make_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Hash of a fresh random identifier, used to tag bursts without revealing their content.
pub fn stealth_hash() -> B256 {
    keccak256(make_id(32).as_bytes())
}

/// Uniformly random address with no known private key.
pub fn random_address() -> Address {
    Address::from(rand::random::<[u8; 20]>())
}

/// Replaces every whitespace run with `-` and lowercases the result.
pub fn to_kebab_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_whitespace = false;
    for c in value.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('-');
            }
            in_whitespace = true;
        } else {
            out.extend(c.to_lowercase());
            in_whitespace = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{make_id, random_address, stealth_hash, to_kebab_case};
    use alloy::primitives::keccak256;
    use test_case::test_case;

    #[test]
    fn make_id_is_alphanumeric_of_requested_length() {
        let id = make_id(32);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(make_id(0).is_empty());
    }

    #[test]
    fn stealth_hashes_do_not_repeat() {
        let first = stealth_hash();
        assert_ne!(first, stealth_hash());
        assert_ne!(first, keccak256(""));
    }

    #[test]
    fn random_addresses_do_not_repeat() {
        assert_ne!(random_address(), random_address());
    }

    #[test_case("Liquidation Bot", "liquidation-bot" ; "single space")]
    #[test_case("Arb  \t Keeper", "arb-keeper" ; "whitespace run")]
    #[test_case(" lead", "-lead" ; "leading whitespace")]
    #[test_case("already-kebab", "already-kebab" ; "unchanged")]
    fn kebab_case_collapses_whitespace(input: &str, expected: &str) {
        assert_eq!(to_kebab_case(input), expected);
    }
}
