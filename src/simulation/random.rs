use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::models::DOWNTIME_REASONS;

/// Random draws used by the simulator.
pub trait Draw: Send {
    /// Uniform value in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Whole minutes in `low..=high`.
    fn minutes(&mut self, low: u32, high: u32) -> u32;

    /// Index in `0..len`. `len` is never zero.
    fn index(&mut self, len: usize) -> usize;
}

pub fn random_reason(draw: &mut dyn Draw) -> &'static str {
    DOWNTIME_REASONS[draw.index(DOWNTIME_REASONS.len())]
}

pub struct RngDraw {
    rng: StdRng,
}

impl RngDraw {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Draw for RngDraw {
    fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn minutes(&mut self, low: u32, high: u32) -> u32 {
        self.rng.gen_range(low..=high)
    }

    fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Deterministic draws: a constant uniform value and always the same end of
/// every minute range.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw {
    uniform: f64,
    longest: bool,
}

impl FixedDraw {
    /// Shortest spans, and every probability check passes.
    pub fn shortest() -> Self {
        Self {
            uniform: 0.0,
            longest: false,
        }
    }

    pub fn longest() -> Self {
        Self {
            uniform: 0.0,
            longest: true,
        }
    }

    pub fn with_uniform(mut self, value: f64) -> Self {
        self.uniform = value;
        self
    }
}

impl Draw for FixedDraw {
    fn uniform(&mut self) -> f64 {
        self.uniform
    }

    fn minutes(&mut self, low: u32, high: u32) -> u32 {
        if self.longest {
            high
        } else {
            low
        }
    }

    fn index(&mut self, _len: usize) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_draws_are_repeatable_and_in_range() {
        let mut first = RngDraw::seeded(7);
        let mut second = RngDraw::seeded(7);

        for _ in 0..100 {
            let a = first.minutes(30, 45);
            assert_eq!(a, second.minutes(30, 45));
            assert!((30..=45).contains(&a));

            let u = first.uniform();
            assert_eq!(u, second.uniform());
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn reasons_come_from_the_catalogue() {
        let mut draw = RngDraw::seeded(11);
        for _ in 0..50 {
            assert!(DOWNTIME_REASONS.contains(&random_reason(&mut draw)));
        }
        assert_eq!(random_reason(&mut FixedDraw::shortest()), "maintenance");
    }
}
