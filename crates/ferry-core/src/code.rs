//! One-time access codes
//!
//! Every share gets a short human-transcribable code that the receiver has
//! to present before joining. Codes use an unambiguous alphabet so they
//! survive being read over the phone or copied from a screenshot.

/// Length of an access code in characters
pub const CODE_LENGTH: usize = 6;

/// Characters used in access codes. Excludes I, O, 0 and 1, which are too
/// easy to confuse in most fonts.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a random access code.
///
/// The alphabet has exactly 32 symbols, so reducing each random byte
/// modulo the alphabet length is unbiased.
pub fn mint_code() -> String {
    let mut bytes = [0u8; CODE_LENGTH];
    getrandom::getrandom(&mut bytes).expect("RNG failed");

    bytes
        .iter()
        .map(|b| CODE_ALPHABET[(*b as usize) % CODE_ALPHABET.len()] as char)
        .collect()
}

/// Normalize a user-entered code (strip whitespace and dashes, uppercase)
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Check that a normalized code has the right length and alphabet
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_shape() {
        let code = mint_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(is_well_formed(&code));
    }

    #[test]
    fn test_mint_varies() {
        let a = mint_code();
        let b = mint_code();
        // Collision probability is 32^-6, effectively zero for one pair
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_code("abc-def"), "ABCDEF");
        assert_eq!(normalize_code("  ab cd ef "), "ABCDEF");
        assert_eq!(normalize_code("AB2-34F"), "AB234F");
    }

    #[test]
    fn test_well_formed_rejects_ambiguous() {
        assert!(is_well_formed("ABCDEF"));
        assert!(is_well_formed("234567"));
        assert!(!is_well_formed("ABCDE")); // too short
        assert!(!is_well_formed("ABCDEFG")); // too long
        assert!(!is_well_formed("ABCDE1")); // 1 not in alphabet
        assert!(!is_well_formed("ABCDE0")); // 0 not in alphabet
        assert!(!is_well_formed("ABCDEO")); // O not in alphabet
        assert!(!is_well_formed("ABCDEI")); // I not in alphabet
    }
}
