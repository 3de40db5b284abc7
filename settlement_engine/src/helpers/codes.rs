use std::collections::HashSet;

use log::warn;
use rand::Rng;

/// No 0/O, 1/I/L or 5/S, so codes survive being read out over the phone.
const CODE_ALPHABET: &[u8] = b"2346789ABCDEFGHJKMNPQRTUVWXYZ";
const CODE_LENGTH: usize = 6;

pub const PAYMENT_CODE_PREFIX: &str = "P-";
pub const CREDIT_CODE_PREFIX: &str = "C-";

pub fn random_code<R: Rng>(prefix: &str, rng: &mut R) -> String {
    let body = (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect::<String>();
    format!("{prefix}{body}")
}

/// Draws codes until one is not in `taken`. After `attempts` collisions, gives up and returns `fallback`.
pub fn unique_code(prefix: &str, taken: &HashSet<&str>, attempts: usize, fallback: &str) -> String {
    let mut rng = rand::thread_rng();
    unique_code_with(prefix, taken, attempts, fallback, &mut rng)
}

pub fn unique_code_with<R: Rng>(
    prefix: &str,
    taken: &HashSet<&str>,
    attempts: usize,
    fallback: &str,
    rng: &mut R,
) -> String {
    for _ in 0..attempts {
        let code = random_code(prefix, rng);
        if !taken.contains(code.as_str()) {
            return code;
        }
    }
    warn!("🔢️ Could not draw a unique {prefix} code in {attempts} attempts. Using {fallback}");
    fallback.to_string()
}
