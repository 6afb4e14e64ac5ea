//! Opaque upload token generation.

use rand::Rng;

/// Default template: alternating free hex digits and variant digits.
pub const TOKEN_PATTERN: &str = "xyxyxyxyxy";

/// Generate a token from a template.
///
/// Each `x` becomes a random hex digit and each `y` a hex digit from `8..=b`.
/// Letters are randomly upper-cased. Other characters are copied as-is.
pub fn generate_token(pattern: &str) -> String {
    let mut rng = rand::rng();
    pattern
        .chars()
        .map(|c| {
            let digit = match c {
                'x' => rng.random_range(0..16u32),
                'y' => (rng.random_range(0..16u32) & 0x3) | 0x8,
                other => return other,
            };
            let ch = char::from_digit(digit, 16).unwrap_or('0');
            if rng.random_bool(0.5) {
                ch.to_ascii_uppercase()
            } else {
                ch
            }
        })
        .collect()
}

/// Generate a token with [`TOKEN_PATTERN`].
pub fn new_token() -> String {
    generate_token(TOKEN_PATTERN)
}
