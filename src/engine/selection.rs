//! Parent selection
//!
//! Individuals are ordered by their aggregate fitness key (lower is better)
//! and then by statement count, which keeps test cases from bloating when
//! fitness plateaus.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

use crate::config::SelectionStrategy;
use crate::fitness::compare_keys;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionKey {
    pub fitness: f64,
    pub length: usize,
}

impl SelectionKey {
    pub fn compare(&self, other: &SelectionKey) -> Ordering {
        compare_keys((self.fitness, self.length), (other.fitness, other.length))
    }
}

/// Indices of `keys`, best first
pub fn ranking(keys: &[SelectionKey]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|a, b| keys[*a].compare(&keys[*b]));
    order
}

#[derive(Debug, Clone, Copy)]
pub struct Selector {
    pub strategy: SelectionStrategy,
    pub tournament_size: usize,
    pub rank_bias: f64,
}

impl Selector {
    pub fn select(&self, keys: &[SelectionKey], rng: &mut ChaCha8Rng) -> usize {
        match self.strategy {
            SelectionStrategy::Tournament => tournament(keys, self.tournament_size, rng),
            SelectionStrategy::Rank => rank(keys, self.rank_bias, rng),
        }
    }
}

pub fn tournament(keys: &[SelectionKey], size: usize, rng: &mut ChaCha8Rng) -> usize {
    if keys.is_empty() {
        return 0;
    }
    let mut winner = rng.gen_range(0..keys.len());
    for _ in 1..size.max(1) {
        let challenger = rng.gen_range(0..keys.len());
        if keys[challenger].compare(&keys[winner]) == Ordering::Less {
            winner = challenger;
        }
    }
    winner
}

/// Linear rank selection; `bias` in `[1, 2]` sets the pressure toward the best
pub fn rank(keys: &[SelectionKey], bias: f64, rng: &mut ChaCha8Rng) -> usize {
    let order = ranking(keys);
    if order.is_empty() {
        return 0;
    }
    let r: f64 = rng.gen();
    let position = if bias <= 1.0 {
        r * order.len() as f64
    } else {
        let discriminant = (bias * bias - 4.0 * (bias - 1.0) * r).max(0.0);
        order.len() as f64 * (bias - discriminant.sqrt()) / 2.0 / (bias - 1.0)
    };
    let position = (position as usize).min(order.len() - 1);
    order[position]
}
