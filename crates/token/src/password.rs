use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// Generated password length.
pub const PASSWORD_LEN: usize = 24;

/// Generate a token password: 24 characters uniform over `[A-Za-z0-9]`,
/// drawn from the operating system's CSPRNG.
#[must_use]
pub fn generate() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Constant-time string equality.
///
/// Comparison time depends only on the lengths, not on where the strings
/// first differ.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
