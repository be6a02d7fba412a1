//! Random alphanumeric identifier generation, used for connection ids and
//! handshake nonces.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub fn random_alphanumeric(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Fixed-length connection identifier used in logs, never transmitted.
pub fn connection_id() -> String {
    random_alphanumeric(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_fixed_length() {
        assert_eq!(connection_id().len(), 10);
    }

    #[test]
    fn random_alphanumeric_only_uses_the_alphabet() {
        let s = random_alphanumeric(64);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
