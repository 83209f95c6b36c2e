//! Bounded experience buffer with random eviction.

use rand::Rng;
use serde::{Deserialize, Serialize};

use flagrl_core::{Episode, Transition};

use crate::error::LearnError;

/// What happens to transitions once they have been sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingPolicy {
    /// Sampled transitions stay available for later batches.
    #[default]
    Retain,
    /// Sampled transitions are removed from the buffer.
    Drain,
}

/// Fixed-capacity store of transitions.
///
/// When an incoming episode would overflow the buffer, uniformly random
/// existing entries are evicted first, so `len() <= capacity()` always.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    capacity: usize,
    policy: SamplingPolicy,
    entries: Vec<Transition>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, policy: SamplingPolicy) -> Self {
        ReplayBuffer {
            capacity,
            policy,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    /// Add every transition of `episode`. An empty episode is a no-op.
    ///
    /// An episode longer than the whole buffer keeps only its last
    /// `capacity` transitions.
    pub fn push<R: Rng + ?Sized>(&mut self, episode: Episode, rng: &mut R) {
        let mut incoming = episode.into_transitions();
        if incoming.is_empty() || self.capacity == 0 {
            return;
        }
        if incoming.len() > self.capacity {
            incoming.drain(..incoming.len() - self.capacity);
        }
        let overflow = (self.entries.len() + incoming.len()).saturating_sub(self.capacity);
        for _ in 0..overflow {
            let victim = rng.gen_range(0..self.entries.len());
            self.entries.swap_remove(victim);
        }
        self.entries.extend(incoming);
    }

    /// Draw `min(batch_size, len())` distinct transitions.
    ///
    /// `batch_size` must be smaller than the capacity.
    pub fn sample<R: Rng + ?Sized>(&mut self, batch_size: usize, rng: &mut R) -> Result<Vec<Transition>, LearnError> {
        if batch_size >= self.capacity {
            return Err(LearnError::InvalidBatchSize {
                batch_size,
                capacity: self.capacity,
            });
        }
        let amount = batch_size.min(self.entries.len());
        let mut picked = rand::seq::index::sample(rng, self.entries.len(), amount).into_vec();

        match self.policy {
            SamplingPolicy::Retain => Ok(picked.iter().map(|&i| self.entries[i].clone()).collect()),
            SamplingPolicy::Drain => {
                // Highest index first so swap_remove never moves a picked entry.
                picked.sort_unstable_by(|a, b| b.cmp(a));
                Ok(picked.into_iter().map(|i| self.entries.swap_remove(i)).collect())
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.entries.iter()
    }
}
