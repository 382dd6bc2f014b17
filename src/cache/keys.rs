//! Stable cache key construction.
//!
//! Keys are namespaced by a fixed prefix per entry kind so that routing,
//! response, and conversation entries never collide even if their
//! fingerprinted inputs happen to match, then fingerprinted with SHA-256 the
//! same way the teacher's `CacheKey::generate` hashes chat messages.

use sha2::{Digest, Sha256};

const ROUTING_PREFIX: &str = "routing";
const RESPONSE_PREFIX: &str = "response";
const CONVERSATION_PREFIX: &str = "conversation";

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

/// Key for a cached routing decision, scoped by task type and query text.
pub fn routing_key(task_type: &str, query: &str) -> String {
    format!("{ROUTING_PREFIX}:{}", fingerprint(&[task_type, query]))
}

/// Key for a cached final response, scoped by model and prompt.
pub fn response_key(model: &str, prompt: &str) -> String {
    format!("{RESPONSE_PREFIX}:{}", fingerprint(&[model, prompt]))
}

/// Key for a cached conversation turn, scoped by conversation id and turn
/// index.
pub fn conversation_key(conversation_id: &str, turn_index: u64) -> String {
    format!(
        "{CONVERSATION_PREFIX}:{}",
        fingerprint(&[conversation_id, &turn_index.to_string()])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_key() {
        assert_eq!(
            routing_key("search", "what is rust"),
            routing_key("search", "what is rust")
        );
    }

    #[test]
    fn different_prefixes_never_collide_even_with_equal_fingerprints() {
        let routing = routing_key("search", "x");
        let response = response_key("search", "x");
        assert_ne!(routing, response);
    }

    #[test]
    fn distinct_turn_indices_produce_distinct_keys() {
        assert_ne!(
            conversation_key("conv-1", 0),
            conversation_key("conv-1", 1)
        );
    }
}
