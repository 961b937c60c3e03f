//! Stable key → partition routing
//!
//! FNV-1a keeps the mapping identical across processes and builds, which the
//! standard library hasher does not promise.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(key: &str) -> u64 {
    key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Partition owning `key` among `partitions` instances
pub fn partition_for(key: &str, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    (fnv1a(key) % partitions as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_partition() {
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn test_known_hash() {
        // FNV-1a reference value for "a"
        assert_eq!(fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }

    proptest! {
        #[test]
        fn prop_partition_is_stable_and_in_range(key in ".{0,64}", partitions in 1usize..64) {
            let first = partition_for(&key, partitions);
            prop_assert!(first < partitions);
            prop_assert_eq!(first, partition_for(&key, partitions));
        }
    }
}
