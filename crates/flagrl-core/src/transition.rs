//! Transitions and episodes.
//!
//! An [`Episode`] is the flattened rollout `[s0, a0, r0, s1, ..., sk]`
//! stored in a shape that always holds exactly one more state than it has
//! steps, so decomposing it into transitions cannot go wrong.

use serde::{Deserialize, Serialize};

use crate::id::ActionId;
use crate::state::StateVector;

/// One observed `(state, action, reward, next_state)` quadruple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: StateVector,
    pub action: ActionId,
    pub reward: f64,
    pub next_state: StateVector,
}

/// A rollout along one program lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// `states[i]` is observed before `steps[i]`; the last state is final.
    states: Vec<StateVector>,
    steps: Vec<(ActionId, f64)>,
}

impl Episode {
    /// Start an episode at `initial`.
    pub fn new(initial: StateVector) -> Self {
        Episode {
            states: vec![initial],
            steps: Vec::new(),
        }
    }

    /// Append a successful step that led to `next_state`.
    pub fn record(&mut self, action: ActionId, reward: f64, next_state: StateVector) {
        self.steps.push((action, reward));
        self.states.push(next_state);
    }

    /// Number of transitions (k).
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when no step succeeded.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The state the episode ended in.
    pub fn final_state(&self) -> &StateVector {
        // states is never empty: new() seeds it and record() only appends.
        &self.states[self.states.len() - 1]
    }

    /// Sum of step rewards.
    pub fn total_reward(&self) -> f64 {
        self.steps.iter().map(|(_, r)| r).sum()
    }

    /// Actions taken, in order.
    pub fn actions(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.steps.iter().map(|(a, _)| *a)
    }

    /// Decompose into exactly `len()` transitions.
    pub fn into_transitions(self) -> Vec<Transition> {
        let mut states = self.states.into_iter();
        let mut current = match states.next() {
            Some(s) => s,
            None => return Vec::new(),
        };
        let mut out = Vec::with_capacity(self.steps.len());
        for ((action, reward), next_state) in self.steps.into_iter().zip(states) {
            out.push(Transition {
                state: current,
                action,
                reward,
                next_state: next_state.clone(),
            });
            current = next_state;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: i64) -> StateVector {
        StateVector(vec![v])
    }

    #[test]
    fn empty_episode_has_no_transitions() {
        let ep = Episode::new(s(0));
        assert!(ep.is_empty());
        assert_eq!(ep.final_state(), &s(0));
        assert!(ep.into_transitions().is_empty());
    }

    #[test]
    fn k_steps_make_k_transitions_chained_by_state() {
        let mut ep = Episode::new(s(0));
        ep.record(ActionId(3), 0.5, s(1));
        ep.record(ActionId(1), -0.25, s(2));
        assert_eq!(ep.len(), 2);
        assert_eq!(ep.total_reward(), 0.25);
        assert_eq!(ep.actions().collect::<Vec<_>>(), vec![ActionId(3), ActionId(1)]);

        let ts = ep.into_transitions();
        assert_eq!(ts.len(), 2);
        assert_eq!(ts[0].state, s(0));
        assert_eq!(ts[0].action, ActionId(3));
        assert_eq!(ts[0].next_state, s(1));
        assert_eq!(ts[1].state, s(1));
        assert_eq!(ts[1].reward, -0.25);
        assert_eq!(ts[1].next_state, s(2));
    }
}
