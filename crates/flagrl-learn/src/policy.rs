//! Epsilon-greedy action selection with linear decay.

use rand::Rng;

use flagrl_core::ActionId;
use flagrl_env::ActionCatalog;

use crate::approximator::QFunction;

/// Index of the largest score; the first one wins ties and NaN is skipped.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        if s.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// Exploration schedule: explore with probability epsilon, which drops by
/// `decay` after every selection and never goes below `floor`.
#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonGreedy {
    epsilon: f64,
    floor: f64,
    decay: f64,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f64, floor: f64, decay: f64) -> Self {
        EpsilonGreedy {
            epsilon,
            floor,
            decay,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Override epsilon, e.g. to act greedily during evaluation.
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon;
    }

    /// Pick an action for the approximator input `input`.
    pub fn select<Q, R>(&mut self, q: &Q, input: &[f32], catalog: &ActionCatalog, rng: &mut R) -> ActionId
    where
        Q: QFunction,
        R: Rng + ?Sized,
    {
        let explore = rng.gen::<f64>() < self.epsilon;
        let action = if explore {
            catalog.sample_uniform(rng)
        } else {
            match argmax(&q.predict(input)) {
                Some(i) => ActionId(i as u16),
                None => catalog.sample_uniform(rng),
            }
        };
        self.decay_once();
        action
    }

    fn decay_once(&mut self) {
        if self.epsilon > self.floor {
            self.epsilon = (self.epsilon - self.decay).max(self.floor);
        }
    }
}
