use sha2::{Digest, Sha256};
use shared::types::HostRecord;

/// Computes a SHA-256 digest of the host inventory.
/// Records are ordered by IP so the digest does not depend on discovery order.
pub fn compute_hash(records: &[HostRecord]) -> String {
    let mut sorted: Vec<&HostRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.ip.cmp(&b.ip));

    let json = serde_json::to_vec(&sorted).expect("Failed to serialize host records");

    let hash = Sha256::digest(&json);
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::PortEntry;

    fn record(ip: &str) -> HostRecord {
        HostRecord {
            hostname: "nas.lan".to_string(),
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
            ..HostRecord::new(ip)
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let a = record("10.0.0.1");
        let b = record("10.0.0.2");

        let hash1 = compute_hash(&[a.clone(), b.clone()]);
        let hash2 = compute_hash(&[b, a]);

        assert_eq!(hash1, hash2, "Hash should be same regardless of input order");
    }

    #[test]
    fn test_hash_changes_on_modification() {
        let a = record("10.0.0.1");
        let mut b = record("10.0.0.1");
        b.ports.push(PortEntry { port: 22, name: "ssh".to_string() });

        assert_ne!(compute_hash(&[a]), compute_hash(&[b]), "Hash should change when a record changes");
    }

    #[test]
    fn test_empty_inventory_hash() {
        assert_eq!(compute_hash(&[]).len(), 64);
    }
}
