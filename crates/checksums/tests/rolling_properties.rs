//! Property coverage for the rolling checksum: the incrementally-updated
//! value must always equal a from-scratch computation over the same window
//! (`spec` §8, "Rolling-hash correctness").

use checksums::RollingChecksum;
use proptest::prelude::*;

proptest! {
    #[test]
    fn roll_matches_recompute_from_scratch(
        data in prop::collection::vec(any::<u8>(), 16..128),
        block_size in 2usize..16,
    ) {
        prop_assume!(data.len() > block_size);

        let mut rolling = RollingChecksum::new();
        rolling.update(&data[0..block_size]);

        for start in 1..=(data.len() - block_size) {
            rolling.roll(data[start - 1], data[start + block_size - 1]).unwrap();

            let mut fresh = RollingChecksum::new();
            fresh.update(&data[start..start + block_size]);

            prop_assert_eq!(rolling.value(), fresh.value());
        }
    }

    #[test]
    fn update_is_chunk_boundary_independent(
        data in prop::collection::vec(any::<u8>(), 0..200),
        split_at in 0usize..200,
    ) {
        let split_at = split_at.min(data.len());

        let mut whole = RollingChecksum::new();
        whole.update(&data);

        let mut split = RollingChecksum::new();
        split.update(&data[..split_at]);
        split.update(&data[split_at..]);

        prop_assert_eq!(whole.value(), split.value());
        prop_assert_eq!(whole.len(), split.len());
    }
}
