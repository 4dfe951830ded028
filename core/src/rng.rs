//! Deterministic random number generation.
//!
//! RULE: Nothing in the core may call any platform RNG.
//! The capture, economy and victory rules are fully deterministic; the only
//! randomness is synthetic host input (skirmish presence for headless runs),
//! and it flows through SubsystemRng instances derived from one master seed.
//!
//! Each stream is seeded from (master_seed XOR slot_index * golden ratio):
//!   - Adding a new slot never changes existing streams.
//!   - Each stream is fully reproducible in isolation.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG stream.
pub struct SubsystemRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl SubsystemRng {
    /// Create a stream from the master seed and a stable slot index.
    /// The index must never change once assigned.
    pub fn new(master_seed: u64, slot_index: u64) -> Self {
        let derived_seed = master_seed ^ (slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// All RNG streams for a single campaign, indexed by stable slot.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_slot(&self, slot: RngSlot) -> SubsystemRng {
        SubsystemRng::new(self.master_seed, slot as u64).with_name(slot.name())
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries; only append.
/// Reordering changes every stream's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngSlot {
    Presence = 0,
    Agents = 1,
    // Add new streams here, append only.
}

impl RngSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Agents => "agents",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_are_reproducible_per_slot() {
        let mut a = RngBank::new(12345).for_slot(RngSlot::Presence);
        let mut b = RngBank::new(12345).for_slot(RngSlot::Presence);
        for _ in 0..32 {
            assert_eq!(a.next_u64_below(1000), b.next_u64_below(1000));
        }
    }

    #[test]
    fn slots_produce_distinct_streams() {
        let bank = RngBank::new(7);
        let mut p = bank.for_slot(RngSlot::Presence);
        let mut g = bank.for_slot(RngSlot::Agents);
        let draws_p: Vec<u64> = (0..8).map(|_| p.next_u64_below(u64::MAX)).collect();
        let draws_g: Vec<u64> = (0..8).map(|_| g.next_u64_below(u64::MAX)).collect();
        assert_ne!(draws_p, draws_g);
    }

    #[test]
    fn next_f64_stays_in_unit_interval() {
        let mut rng = RngBank::new(99).for_slot(RngSlot::Agents);
        for _ in 0..1000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
        }
    }
}
