use sha2::{Digest, Sha256};

/// Normalize a claim statement for hashing: Unicode lowercase + collapse
/// whitespace runs to single spaces + trim. Must stay identical across
/// re-extractions or claim hashes drift.
pub fn normalize_statement(statement: &str) -> String {
    statement
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic claim identity: SHA-256 over `normalized|claim_type|document_id`.
///
/// Two literally identical claims in the same document share a hash across
/// sections; the same claim in a different document hashes differently.
pub fn claim_hash(statement: &str, claim_type: &str, document_id: &str) -> String {
    let input = format!("{}|{}|{}", normalize_statement(statement), claim_type, document_id);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of raw content, used for fetch deduplication.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate to at most `max_chars` characters (not bytes), preserving
/// char boundaries. Returns the input unchanged when it fits.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_collapses() {
        assert_eq!(normalize_statement("  Python   is a Language "), "python is a language");
        assert_eq!(normalize_statement("Python\tis\na language"), "python is a language");
    }

    #[test]
    fn claim_hash_deterministic() {
        let a = claim_hash("Python is a language", "definition", "doc1");
        let b = claim_hash("Python is a language", "definition", "doc1");
        assert_eq!(a, b);
    }

    #[test]
    fn claim_hash_case_insensitive() {
        let a = claim_hash("Python is a language", "definition", "doc1");
        let b = claim_hash("python is a language", "definition", "doc1");
        assert_eq!(a, b);
    }

    #[test]
    fn claim_hash_whitespace_normalized() {
        let a = claim_hash("Python is a language", "definition", "doc1");
        let b = claim_hash("  Python is a language  ", "definition", "doc1");
        assert_eq!(a, b);
    }

    #[test]
    fn claim_hash_differs_across_documents() {
        let a = claim_hash("Python is a language", "definition", "doc1");
        let b = claim_hash("Python is a language", "definition", "doc2");
        assert_ne!(a, b);
    }

    #[test]
    fn claim_hash_differs_across_types() {
        let a = claim_hash("Python is fast", "capability", "doc1");
        let b = claim_hash("Python is fast", "definition", "doc1");
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("hello"));
        assert_ne!(h, content_hash("hello "));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("Hello 世界", 7), "Hello 世");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("A".repeat(2000).as_str(), 1000).len(), 1000);
    }
}
