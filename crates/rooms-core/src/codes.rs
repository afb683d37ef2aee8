use rand::RngExt;

/// 32-symbol alphabet for room codes and session tokens. Visually ambiguous
/// glyphs (`0`/`O`, `1`/`I`) are excluded.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
pub const CODE_LEN: usize = 6;

/// Draw a random string of `len` symbols from the code alphabet.
pub fn random_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Canonical form of a room code. Codes are case-insensitive on the wire;
/// uppercase is canonical.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_32_distinct_symbols() {
        assert_eq!(CODE_ALPHABET.len(), 32);
        let mut sorted = CODE_ALPHABET.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 32);
    }

    #[test]
    fn alphabet_excludes_ambiguous_glyphs() {
        for banned in [b'0', b'O', b'1', b'I'] {
            assert!(!CODE_ALPHABET.contains(&banned));
        }
    }

    #[test]
    fn codes_draw_from_the_alphabet() {
        for _ in 0..50 {
            let code = random_code(CODE_LEN);
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize(" ab2c3d "), "AB2C3D");
    }
}
