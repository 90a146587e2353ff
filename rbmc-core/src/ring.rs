//! A consistent-hash ring mapping keys to server indices.
//!
//! This only computes *which* index owns a key; it knows nothing about
//! engines, connections, or I/O. [`crate::router::ConsistentHashRouter`]
//! pairs it with a `Vec` of engines in the same order the ring was built
//! with.

use murmur3::murmur3_32;

/// The number of ring positions handed out per server by default. Each
/// server gets an equal share, so the ring stays balanced as long as
/// `size` is a multiple of the server count.
const DEFAULT_RING_SIZE: usize = 360;

#[derive(Debug, Clone)]
pub struct HashRing {
    // Sorted by ring position; `find_bucket` binary-searches this.
    buckets: Vec<(u32, usize)>,
}

impl HashRing {
    pub fn new(labels: &[String]) -> Self {
        HashRing::with_size(labels, DEFAULT_RING_SIZE)
    }

    pub fn with_size(labels: &[String], size: usize) -> Self {
        let mut buckets = vec![];
        if labels.is_empty() {
            return HashRing { buckets };
        }
        let share = size / labels.len();
        for (index, label) in labels.iter().enumerate() {
            for i in 0..share {
                let hash = murmur3_32(&mut label.as_bytes(), i as u32)
                    .expect("murmur3 over an in-memory buffer cannot fail");
                buckets.push((hash, index));
            }
        }
        buckets.sort_unstable();
        HashRing { buckets }
    }

    /// The index of the server owning `key`.
    ///
    /// # Panics
    ///
    /// Panics if the ring was built from an empty label list.
    pub fn index_for(&self, key: &[u8]) -> usize {
        let mut key = key;
        let ring_pos = murmur3_32(&mut key, 0).expect("murmur3 over an in-memory buffer cannot fail");
        let bucket_index = self
            .buckets
            .binary_search_by_key(&ring_pos, |(pos, _)| *pos)
            .unwrap_or_else(|next| next);
        let (_, index) = self.buckets.get(bucket_index).copied().unwrap_or(self.buckets[0]);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_index_is_stable_per_server_label() {
        let labels = vec![
            "localhost:11211".to_string(),
            "localhost:11212".to_string(),
            "localhost:11213".to_string(),
        ];
        let ring = HashRing::new(&labels);
        assert_eq!(ring.index_for(b"localhost:11211"), 0);
        assert_eq!(ring.index_for(b"localhost:11212"), 1);
        assert_eq!(ring.index_for(b"localhost:11213"), 2);
        // Stable: calling twice for the same key returns the same owner.
        assert_eq!(ring.index_for(b"q"), ring.index_for(b"q"));
    }

    #[test]
    fn test_boundary_behavior_matches_known_buckets() {
        let labels = vec!["localhost:11211".to_string(), "localhost:11212".to_string()];
        let ring = HashRing::with_size(&labels, 2);
        assert_eq!(ring.buckets, vec![(748582396, 1), (1636863978, 0)]);
        assert_eq!(ring.index_for(b"q"), 1);
    }

    #[test]
    fn test_empty_ring_has_no_buckets() {
        let ring = HashRing::new(&[]);
        assert!(ring.buckets.is_empty());
    }
}
