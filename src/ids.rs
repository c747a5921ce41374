//! Random identifiers for transport URLs, subscriptions and chat messages.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use rand::Rng;

const RANDOM_ID_BYTES: usize = 16;
const SOCKJS_SERVER_ID_RANGE: u16 = 1000;

/// Returns 16 random bytes in base64 with every non-alphanumeric character
/// removed.
pub fn random_id() -> String {
    let mut bytes = [0u8; RANDOM_ID_BYTES];
    rand::rng().fill(&mut bytes);
    BASE64_STANDARD
        .encode(bytes)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Returns the SockJS server-shard segment, `0..=999`.
pub fn sockjs_server_id() -> u16 {
    rand::rng().random_range(0..SOCKJS_SERVER_ID_RANGE)
}

#[cfg(test)]
mod tests {
    use super::{random_id, sockjs_server_id};

    #[test]
    fn random_id_is_alphanumeric() {
        let id = random_id();
        assert!(!id.is_empty());
        assert!(id.len() <= 24);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(random_id(), random_id());
    }

    #[test]
    fn server_id_stays_below_one_thousand() {
        for _ in 0..200 {
            assert!(sockjs_server_id() < 1000);
        }
    }
}
