//! Hashing for transactions, blocks and event topics
//!
//! This module provides:
//! - SHA-256 hashing of arbitrary bytes
//! - Deterministic transaction hashes
//! - Merkle roots over the transactions sealed into a block

use crate::types::{Address, TxHash};
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a transaction
///
/// The global transaction sequence makes the hash unique even when the same
/// caller submits the same payload twice.
pub fn tx_hash(caller: &Address, sequence: u64, payload: &[u8]) -> TxHash {
    let mut hasher = Sha256::new();
    hasher.update(caller.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(sequence.to_be_bytes());
    hasher.update(payload);
    TxHash::from_bytes(hasher.finalize().into())
}

/// Create a Merkle root from transaction hashes
///
/// If a level has odd length, the last hash is duplicated.
pub fn merkle_root(tx_hashes: &[TxHash]) -> [u8; 32] {
    if tx_hashes.is_empty() {
        return [0u8; 32];
    }

    let mut current_level: Vec<[u8; 32]> = tx_hashes.iter().map(|h| *h.as_bytes()).collect();

    while current_level.len() > 1 {
        let next_level = current_level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);

                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();

        current_level = next_level;
    }

    current_level[0]
}
