//! Content hashing for fingerprints and change detection

/// Compute the BLAKE3 hash of `content` as a lowercase hex string.
///
/// Used for bridge fingerprints and for checksum-based control change
/// detection. The algorithm is part of bridge identity: changing it restarts
/// every running bridge on the next reconciliation.
pub fn compute_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}
