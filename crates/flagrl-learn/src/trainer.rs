//! The training loop: rollouts, learning steps, target sync and evaluation.
//!
//! One [`Trainer`] owns the programs, both approximators, the exploration
//! schedule and the experience buffer. Each episode picks a training
//! program uniformly, walks at most `max_steps` actions from its base,
//! stores the transitions and resets the program. Step failures end the
//! episode; anything else aborts the run.

use std::sync::{Mutex, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use flagrl_core::{speedup, ActionId, Episode, StateVector};
use flagrl_env::{ActionCatalog, EnvError, Program};
use flagrl_toolchain::Toolchain;

use crate::approximator::{FitSample, QFunction};
use crate::buffer::ReplayBuffer;
use crate::config::TrainConfig;
use crate::error::LearnError;
use crate::policy::{argmax, EpsilonGreedy};

/// Greedy result on one held-out program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramSpeedup {
    pub program: String,
    /// `base_cost / final_cost`; 1.0 when no step succeeded.
    pub speedup: f64,
    pub steps: usize,
    /// Flags the greedy policy applied, in order.
    pub flags: Vec<String>,
    /// The very first greedy step failed, so the base was scored.
    pub first_step_failed: bool,
}

/// One evaluation pass over the held-out programs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Episodes completed when the evaluation ran.
    pub episode: usize,
    pub mean_speedup: f64,
    pub programs: Vec<ProgramSpeedup>,
}

/// Summary returned by [`Trainer::train`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainReport {
    pub episodes: usize,
    pub gradient_steps: usize,
    pub final_epsilon: f64,
    pub losses: Vec<f32>,
    pub evaluations: Vec<Evaluation>,
}

/// What one walk along a program lineage produced.
struct Rollout {
    episode: Episode,
    /// Cost of the last variant reached, read before the reset.
    final_cost: Option<f64>,
}

pub struct Trainer<'a, Q: QFunction> {
    config: TrainConfig,
    toolchain: &'a dyn Toolchain,
    catalog: &'a ActionCatalog,
    train_programs: Vec<Program>,
    holdout: Vec<Program>,
    online: Q,
    target: Q,
    policy: EpsilonGreedy,
    buffer: ReplayBuffer,
    rng: ChaCha8Rng,
    episodes: usize,
    gradient_steps: usize,
    losses: Vec<f32>,
    evaluations: Vec<Evaluation>,
}

impl<'a, Q: QFunction> Trainer<'a, Q> {
    /// Split `programs` into training and held-out sets with the seeded rng
    /// and set up a trainer around `online`.
    pub fn new(
        config: TrainConfig,
        toolchain: &'a dyn Toolchain,
        catalog: &'a ActionCatalog,
        mut programs: Vec<Program>,
        online: Q,
    ) -> Result<Self, LearnError> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let held = (programs.len() as f64 * config.holdout_fraction).floor() as usize;
        let mut holdout = Vec::with_capacity(held);
        for _ in 0..held {
            let i = rng.gen_range(0..programs.len());
            holdout.push(programs.swap_remove(i));
        }
        Trainer::with_split_and_rng(config, toolchain, catalog, programs, holdout, online, rng)
    }

    /// Set up a trainer with an explicit training / held-out split.
    pub fn with_split(
        config: TrainConfig,
        toolchain: &'a dyn Toolchain,
        catalog: &'a ActionCatalog,
        train_programs: Vec<Program>,
        holdout: Vec<Program>,
        online: Q,
    ) -> Result<Self, LearnError> {
        config.validate()?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Trainer::with_split_and_rng(config, toolchain, catalog, train_programs, holdout, online, rng)
    }

    fn with_split_and_rng(
        config: TrainConfig,
        toolchain: &'a dyn Toolchain,
        catalog: &'a ActionCatalog,
        train_programs: Vec<Program>,
        holdout: Vec<Program>,
        mut online: Q,
        rng: ChaCha8Rng,
    ) -> Result<Self, LearnError> {
        if train_programs.is_empty() {
            return Err(LearnError::NoTrainingPrograms);
        }
        if online.input_dim() == 0 {
            return Err(LearnError::config(
                "approximator",
                "programs must report at least one state feature",
            ));
        }
        if online.output_dim() != catalog.size() {
            return Err(LearnError::config(
                "approximator",
                format!(
                    "{} outputs for a catalog of {} actions",
                    online.output_dim(),
                    catalog.size()
                ),
            ));
        }
        for program in train_programs.iter().chain(&holdout) {
            if let Some(state) = program.state() {
                check_dim(state, online.input_dim(), program.name())?;
            }
        }

        online.set_training(true);
        tracing::info!(
            train = train_programs.len(),
            holdout = holdout.len(),
            actions = catalog.size(),
            state_dim = online.input_dim(),
            "trainer ready"
        );
        Ok(Trainer {
            policy: EpsilonGreedy::new(config.epsilon, config.epsilon_floor, config.epsilon_decay),
            buffer: ReplayBuffer::new(config.buffer_capacity, config.sampling),
            target: online.clone(),
            online,
            config,
            toolchain,
            catalog,
            train_programs,
            holdout,
            rng,
            episodes: 0,
            gradient_steps: 0,
            losses: Vec::new(),
            evaluations: Vec::new(),
        })
    }

    pub fn online(&self) -> &Q {
        &self.online
    }

    pub fn target(&self) -> &Q {
        &self.target
    }

    pub fn policy(&self) -> &EpsilonGreedy {
        &self.policy
    }

    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    pub fn episodes(&self) -> usize {
        self.episodes
    }

    pub fn gradient_steps(&self) -> usize {
        self.gradient_steps
    }

    pub fn training_programs(&self) -> &[Program] {
        &self.train_programs
    }

    pub fn holdout_programs(&self) -> &[Program] {
        &self.holdout
    }

    /// Roll out episodes until `max_episodes`, learning and evaluating on
    /// the configured intervals.
    pub fn train(&mut self) -> Result<TrainReport, LearnError> {
        while self.episodes < self.config.max_episodes {
            let remaining = self.config.max_episodes - self.episodes;
            let workers = self
                .config
                .rollout_workers
                .min(self.train_programs.len())
                .min(remaining);
            if workers > 1 {
                self.run_round(workers)?;
            } else {
                self.run_episode()?;
            }
        }
        tracing::info!(
            episodes = self.episodes,
            gradient_steps = self.gradient_steps,
            epsilon = self.policy.epsilon(),
            "training finished"
        );
        Ok(self.report())
    }

    /// Everything measured so far.
    pub fn report(&self) -> TrainReport {
        TrainReport {
            episodes: self.episodes,
            gradient_steps: self.gradient_steps,
            final_epsilon: self.policy.epsilon(),
            losses: self.losses.clone(),
            evaluations: self.evaluations.clone(),
        }
    }

    /// Roll out one episode on a uniformly chosen training program.
    ///
    /// Returns the number of transitions it contributed.
    pub fn run_episode(&mut self) -> Result<usize, LearnError> {
        let index = self.rng.gen_range(0..self.train_programs.len());
        let online = &self.online;
        let policy = &mut self.policy;
        let rng = &mut self.rng;
        let catalog = self.catalog;
        let rollout = rollout(
            &mut self.train_programs[index],
            self.toolchain,
            catalog,
            self.config.max_steps,
            online.input_dim(),
            |input| policy.select(online, input, catalog, &mut *rng),
        )?;
        let steps = rollout.episode.len();
        tracing::debug!(
            episode = self.episodes + 1,
            program = self.train_programs[index].name(),
            steps,
            total_reward = rollout.episode.total_reward(),
            "episode"
        );
        self.buffer.push(rollout.episode, &mut self.rng);
        self.finish_episode()?;
        Ok(steps)
    }

    /// Roll out `workers` episodes concurrently on distinct programs.
    fn run_round(&mut self, workers: usize) -> Result<(), LearnError> {
        let picked = rand::seq::index::sample(&mut self.rng, self.train_programs.len(), workers).into_vec();
        let seeds: Vec<u64> = (0..workers).map(|_| self.rng.gen()).collect();

        let mut slots: Vec<Option<&mut Program>> = self.train_programs.iter_mut().map(Some).collect();
        let mut jobs = Vec::with_capacity(workers);
        for (&index, &seed) in picked.iter().zip(&seeds) {
            if let Some(program) = slots[index].take() {
                jobs.push((program, seed));
            }
        }
        drop(slots);

        let toolchain = self.toolchain;
        let catalog = self.catalog;
        let max_steps = self.config.max_steps;
        let state_dim = self.online.input_dim();

        let results: Vec<Result<usize, LearnError>> = {
            let policy = Mutex::new(&mut self.policy);
            let buffer = Mutex::new(&mut self.buffer);
            let online = &self.online;
            std::thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .into_iter()
                    .map(|(program, seed)| {
                        let policy = &policy;
                        let buffer = &buffer;
                        scope.spawn(move || -> Result<usize, LearnError> {
                            let mut rng = ChaCha8Rng::seed_from_u64(seed);
                            let rollout = rollout(program, toolchain, catalog, max_steps, state_dim, |input| {
                                let mut policy = policy.lock().unwrap_or_else(PoisonError::into_inner);
                                policy.select(online, input, catalog, &mut rng)
                            })?;
                            let steps = rollout.episode.len();
                            buffer
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(rollout.episode, &mut rng);
                            Ok(steps)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            })
        };

        for result in results {
            result?;
            self.finish_episode()?;
        }
        Ok(())
    }

    fn finish_episode(&mut self) -> Result<(), LearnError> {
        self.episodes += 1;
        if self.episodes % self.config.update_interval == 0 {
            self.learn()?;
        }
        if !self.holdout.is_empty() && self.episodes % self.config.eval_interval == 0 {
            let evaluation = self.evaluate()?;
            self.evaluations.push(evaluation);
        }
        Ok(())
    }

    /// One gradient step on a sampled batch.
    ///
    /// Returns the loss, or `None` when the buffer has too little data.
    pub fn learn(&mut self) -> Result<Option<f32>, LearnError> {
        if self.buffer.is_empty() || self.buffer.len() < self.config.learn_starts {
            return Ok(None);
        }
        let batch = self.buffer.sample(self.config.batch_size, &mut self.rng)?;
        if batch.is_empty() {
            return Ok(None);
        }

        let gamma = self.config.gamma as f32;
        let samples: Vec<FitSample> = batch
            .iter()
            .map(|t| {
                let next = self.target.predict(&t.next_state.features());
                let best = argmax(&next).map_or(0.0, |i| next[i]);
                FitSample {
                    input: t.state.features(),
                    action: t.action.index(),
                    target: t.reward as f32 + gamma * best,
                }
            })
            .collect();

        let loss = self.online.fit(&samples, self.config.grad_clip);
        self.gradient_steps += 1;
        self.losses.push(loss);
        tracing::info!(
            episode = self.episodes,
            gradient_steps = self.gradient_steps,
            batch = samples.len(),
            loss,
            "update"
        );
        if self.gradient_steps % self.config.sync_interval == 0 {
            self.sync_target();
        }
        Ok(Some(loss))
    }

    /// Copy the online approximator into the target.
    pub fn sync_target(&mut self) {
        self.target = self.online.clone();
        tracing::debug!(gradient_steps = self.gradient_steps, "synced target");
    }

    /// Run the greedy policy on every held-out program.
    ///
    /// Exploration and training mode are restored afterwards even when the
    /// evaluation fails. With no held-out programs the mean is 1.0.
    pub fn evaluate(&mut self) -> Result<Evaluation, LearnError> {
        let saved_epsilon = self.policy.epsilon();
        let saved_training = self.online.is_training();
        self.policy.set_epsilon(0.0);
        self.online.set_training(false);

        let result = self.evaluate_holdout();

        self.policy.set_epsilon(saved_epsilon);
        self.online.set_training(saved_training);
        result
    }

    fn evaluate_holdout(&mut self) -> Result<Evaluation, LearnError> {
        let online = &self.online;
        let policy = &mut self.policy;
        let rng = &mut self.rng;
        let catalog = self.catalog;

        let mut programs = Vec::with_capacity(self.holdout.len());
        for program in &mut self.holdout {
            let base_cost = program.base_cost();
            let rollout = rollout(
                program,
                self.toolchain,
                catalog,
                self.config.max_steps,
                online.input_dim(),
                |input| policy.select(online, input, catalog, &mut *rng),
            )?;
            let first_step_failed = rollout.episode.is_empty();
            let speedup = match (base_cost, rollout.final_cost) {
                (Some(base), Some(last)) if !first_step_failed => speedup(base, last).unwrap_or(1.0),
                _ => 1.0,
            };
            let actions: Vec<ActionId> = rollout.episode.actions().collect();
            let flags = catalog
                .describe_all(&actions)
                .map_err(EnvError::from)?
                .into_iter()
                .map(String::from)
                .collect();
            programs.push(ProgramSpeedup {
                program: program.name().to_string(),
                speedup,
                steps: rollout.episode.len(),
                flags,
                first_step_failed,
            });
        }

        let mean_speedup = if programs.is_empty() {
            1.0
        } else {
            programs.iter().map(|p| p.speedup).sum::<f64>() / programs.len() as f64
        };
        let failed = programs.iter().filter(|p| p.first_step_failed).count();
        tracing::info!(
            episode = self.episodes,
            programs = programs.len(),
            first_step_failures = failed,
            mean_speedup,
            "evaluation"
        );
        Ok(Evaluation {
            episode: self.episodes,
            mean_speedup,
            programs,
        })
    }
}

fn check_dim(state: &StateVector, expected: usize, program: &str) -> Result<(), LearnError> {
    if state.dim() != expected {
        return Err(LearnError::StateDimensionMismatch {
            expected,
            actual: state.dim(),
            context: program.to_string(),
        });
    }
    Ok(())
}

/// Walk `program` for up to `max_steps` actions, then reset it.
///
/// The program is reset whatever happened during the walk.
fn rollout<S>(
    program: &mut Program,
    toolchain: &dyn Toolchain,
    catalog: &ActionCatalog,
    max_steps: usize,
    state_dim: usize,
    select: S,
) -> Result<Rollout, LearnError>
where
    S: FnMut(&[f32]) -> ActionId,
{
    let walked = walk(program, toolchain, catalog, max_steps, state_dim, select);
    let final_cost = program.cost();
    let reset = program.reset(toolchain);

    let episode = walked?;
    match reset {
        Ok(()) => {}
        Err(e) if e.is_step_failure() => {
            tracing::warn!(program = program.name(), error = %e, "reset failed");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Rollout { episode, final_cost })
}

fn walk<S>(
    program: &mut Program,
    toolchain: &dyn Toolchain,
    catalog: &ActionCatalog,
    max_steps: usize,
    state_dim: usize,
    mut select: S,
) -> Result<Episode, LearnError>
where
    S: FnMut(&[f32]) -> ActionId,
{
    let initial = match program.state() {
        Some(state) => state.clone(),
        None => match program.measure(toolchain) {
            Ok(measurement) => measurement.state,
            Err(e) if e.is_step_failure() => {
                tracing::warn!(program = program.name(), error = %e, "cannot observe program, skipping episode");
                return Ok(Episode::new(StateVector::default()));
            }
            Err(e) => return Err(e.into()),
        },
    };
    check_dim(&initial, state_dim, program.name())?;

    let mut episode = Episode::new(initial.clone());
    let mut state = initial;
    for _ in 0..max_steps {
        let action = select(&state.features());
        match program.step(toolchain, catalog, action) {
            Ok(reward) => {
                let next = match program.state() {
                    Some(next) => next.clone(),
                    None => break,
                };
                check_dim(&next, state_dim, program.name())?;
                episode.record(action, reward, next.clone());
                state = next;
            }
            Err(e) if e.is_step_failure() => {
                tracing::debug!(program = program.name(), error = %e, "episode ended by step failure");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(episode)
}
