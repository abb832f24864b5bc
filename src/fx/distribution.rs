use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};

/// A custom, caller-supplied distribution.
pub trait CustomDistribution: std::fmt::Debug + Send + Sync {
    fn offset(&self, member_index: usize, group_size: usize, normalized_position: f64) -> f64;
    fn distinct_slots(&self, group_size: usize) -> usize;
}

/// Maps a group member to a phase offset in `[0,1)`. Each variant is a
/// pure function of `(memberIndex, groupSize, normalizedPosition)`.
#[derive(Debug, Clone)]
pub enum DistributionStrategy {
    /// Each member gets an evenly spaced offset: `i / n`.
    Linear,
    /// All members share phase 0 - a single slot.
    Unified,
    /// Members grouped by distance from the group's center.
    CenterOut,
    /// Members grouped by distance from the nearest edge.
    EdgesIn,
    /// Linear, but index-reversed.
    Reverse,
    /// Group split into two independently advancing halves.
    Split,
    /// Bounce traversal: forward half of a 2n-2 cycle.
    PingPong,
    /// Uses the caller-supplied `normalized_position` directly, ignoring index.
    Positional,
    /// Deterministic pseudo-random offset per member, seeded.
    Random(u64),
    Custom(Arc<dyn CustomDistribution>),
}

impl DistributionStrategy {
    pub fn offset(&self, member_index: usize, group_size: usize, normalized_position: f64) -> f64 {
        if group_size == 0 {
            return 0.0;
        }
        let n = group_size;
        let i = member_index.min(n - 1);

        match self {
            DistributionStrategy::Linear => i as f64 / n as f64,
            DistributionStrategy::Unified => 0.0,
            DistributionStrategy::Reverse => (n - 1 - i) as f64 / n as f64,
            DistributionStrategy::CenterOut => {
                let center = (n - 1) as f64 / 2.0;
                (i as f64 - center).abs() / n as f64
            }
            DistributionStrategy::EdgesIn => {
                let m = i.min(n - 1 - i);
                m as f64 / n as f64
            }
            DistributionStrategy::Split => {
                let first_half = (n + 1) / 2;
                let second_half = n - first_half;
                if i < first_half {
                    (i as f64 / first_half.max(1) as f64) * 0.5
                } else {
                    let j = i - first_half;
                    0.5 + (j as f64 / second_half.max(1) as f64) * 0.5
                }
            }
            DistributionStrategy::PingPong => {
                let period = if n <= 1 { 1 } else { 2 * (n - 1) };
                i as f64 / period as f64
            }
            DistributionStrategy::Positional => normalized_position.clamp(0.0, 1.0),
            DistributionStrategy::Random(seed) => pseudo_random(*seed, i as u64),
            DistributionStrategy::Custom(custom) => {
                custom.offset(member_index, group_size, normalized_position).rem_euclid(1.0)
            }
        }
    }

    /// Count of unique offsets this strategy produces for `group_size` members.
    pub fn distinct_slots(&self, group_size: usize) -> usize {
        match self {
            DistributionStrategy::Custom(custom) => custom.distinct_slots(group_size),
            // Position- or randomness-driven: assumed (not guaranteed) to be
            // pairwise distinct across members.
            DistributionStrategy::Positional | DistributionStrategy::Random(_) => group_size,
            _ => {
                if group_size == 0 {
                    return 0;
                }
                let mut seen: Vec<f64> = Vec::with_capacity(group_size);
                for i in 0..group_size {
                    let o = self.offset(i, group_size, 0.0);
                    if !seen.iter().any(|s| (s - o).abs() < 1e-9) {
                        seen.push(o);
                    }
                }
                seen.len()
            }
        }
    }
}

/// Deterministic pseudo-random value in `[0,1)` for a given `(seed, bucket)` pair.
pub fn pseudo_random(seed: u64, bucket: u64) -> f64 {
    let mut rng = SmallRng::seed_from_u64(seed ^ bucket.wrapping_mul(0x9E3779B97F4A7C15));
    rng.gen_range(0.0..1.0)
}
