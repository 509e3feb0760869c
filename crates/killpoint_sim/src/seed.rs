//! Seed management for reproducible simulated clusters.

use killpoint_core::DaemonName;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Source of simulation seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedSource {
    /// From a literal value
    Literal(u64),
    /// From a string (hashed)
    FromString(String),
    /// From a daemon name
    FromDaemon(DaemonName),
    /// Random seed (non-deterministic)
    Random,
}

impl SeedSource {
    /// Generate a seed value
    #[must_use]
    pub fn to_seed(&self) -> u64 {
        match self {
            SeedSource::Literal(seed) => *seed,
            SeedSource::FromString(s) => fnv64(s.as_bytes()),
            SeedSource::FromDaemon(name) => fnv64(name.as_str().as_bytes()),
            SeedSource::Random => {
                use std::time::SystemTime;
                SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or_default()
            }
        }
    }
}

fn fnv64(bytes: &[u8]) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Simulation seed for reproducibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSeed {
    /// Base seed value
    pub seed: u64,
    /// Source of the seed
    pub source: SeedSource,
}

impl SimSeed {
    /// Create a new simulation seed
    #[must_use]
    pub fn new(source: SeedSource) -> Self {
        let seed = source.to_seed();
        Self { seed, source }
    }

    /// Create a seed from a literal value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self::new(SeedSource::Literal(seed))
    }

    /// Create a seed from a string
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self::new(SeedSource::FromString(s))
    }

    /// Derive a seed for a specific context
    #[must_use]
    pub fn derive(&self, context: &str) -> Self {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write_u64(self.seed);
        hasher.write(context.as_bytes());
        Self::from_literal(hasher.finish())
    }

    /// Create RNG borrowing seed
    #[must_use]
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self::new(SeedSource::Literal(42))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seed_source_literal() {
        assert_eq!(SeedSource::Literal(123).to_seed(), 123);
    }

    #[test]
    fn test_seed_source_from_string_reproducible() {
        let a = SeedSource::FromString("test".to_string());
        let b = SeedSource::FromString("test".to_string());
        let c = SeedSource::FromString("other".to_string());
        assert_eq!(a.to_seed(), b.to_seed());
        assert_ne!(a.to_seed(), c.to_seed());
    }

    #[test]
    fn test_seed_from_daemon() {
        let a = SeedSource::FromDaemon(DaemonName::new("a")).to_seed();
        let b = SeedSource::FromDaemon(DaemonName::new("b")).to_seed();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sim_seed_derive() {
        let base = SimSeed::from_literal(42);
        let derived1 = base.derive("jitter");
        let derived2 = base.derive("restart");

        assert_ne!(derived1.seed, derived2.seed);
        assert_eq!(derived1.seed, base.derive("jitter").seed);
        assert_ne!(derived1.seed, base.seed);
    }

    #[test]
    fn test_sim_seed_rng() {
        let seed = SimSeed::from_literal(42);
        let val1: u64 = seed.rng().r#gen();
        let val2: u64 = seed.rng().r#gen();
        assert_eq!(val1, val2);
    }

    #[test]
    fn test_sim_seed_default() {
        assert_eq!(SimSeed::default().seed, 42);
    }
}
