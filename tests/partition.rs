use proptest::prelude::*;
use warpsim::{Engine, EngineConfig};

proptest! {
    #[test]
    fn lanes_split_into_ceil_warps(lanes in 1usize..64, warp_size in 1usize..64, sms in 1usize..4) {
        let config = EngineConfig::default()
            .with_lanes(lanes)
            .with_warp_size(warp_size)
            .with_sms(sms);
        let engine = Engine::with_config(vec![], config).unwrap();
        let warps = engine.warp_lanes();

        prop_assert_eq!(warps.len(), lanes.div_ceil(warp_size));

        let (last, full) = warps.split_last().unwrap();
        prop_assert!(full.iter().all(|w| w.len() == warp_size));
        prop_assert!(!last.is_empty() && last.len() <= warp_size);

        // every lane exactly once, in order
        let flat: Vec<usize> = warps.into_iter().flatten().collect();
        prop_assert_eq!(flat, (0..lanes).collect::<Vec<_>>());
    }

    #[test]
    fn reset_returns_every_lane_to_zero(lanes in 1usize..24, warp_size in 1usize..8) {
        let config = EngineConfig::default().with_lanes(lanes).with_warp_size(warp_size);
        let mut engine = Engine::with_config(warpsim::programs::vector_add(2.0), config).unwrap();
        engine.run().unwrap();
        engine.reset().unwrap();

        prop_assert_eq!(engine.cycle_count(), 0);
        prop_assert!(engine.global_memory_snapshot().iter().all(|&c| c == 0.0));
        for lane in engine.lanes() {
            prop_assert_eq!(lane.pc, 0);
            prop_assert!(lane.active);
            prop_assert!(!lane.predicate);
            prop_assert!(lane.registers.iter().all(|&r| r == 0.0));
        }
    }
}
