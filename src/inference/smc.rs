//! Sequential Monte Carlo driver: step, reweight, resample until every
//! particle has finished.
//!
//! The driver only knows the [`SmcModel`] interface. All weight arithmetic is
//! in log space; after every round the population's log-weights are
//! normalised so their exponentials sum to one.

use crate::errors::{Result, SmcError};
use crate::inference::config::{Execution, ResamplingScheme, SmcConfig};
use crate::inference::particle::SmcModel;
use crate::inference::sampling::{log_sum_exp, multinomial_indices, systematic_indices};
use crate::utils::{effective_sample_size, Profiler, RunMetrics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared stop signal, checked by the driver at every round boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ordered population of N particles.
pub struct Population<P> {
    particles: Vec<P>,
}

impl<P: SmcModel> Population<P> {
    /// Wrap particles and give them uniform weight 1/N.
    pub fn new(particles: Vec<P>) -> Self {
        let mut population = Self { particles };
        population.reset_uniform();
        population
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[P] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [P] {
        &mut self.particles
    }

    pub fn num_active(&self) -> usize {
        self.particles.iter().filter(|p| !p.is_finished()).count()
    }

    pub fn all_finished(&self) -> bool {
        self.particles.iter().all(|p| p.is_finished())
    }

    pub fn log_weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.log_weight()).collect()
    }

    fn reset_uniform(&mut self) {
        let uniform = -(self.particles.len().max(1) as f64).ln();
        for p in &mut self.particles {
            p.set_log_weight(uniform);
        }
    }

    /// Step every active particle once. Finished particles are untouched.
    ///
    /// Each particle gets its own RNG seeded from `rng` in population order, so
    /// sequential and parallel execution produce the same population. Returns
    /// the number of particles that were active at the start of the round.
    pub fn step_active(&mut self, execution: Execution, rng: &mut StdRng) -> Result<usize> {
        let active = self.num_active();
        let seeds: Vec<u64> = (0..self.particles.len()).map(|_| rng.gen()).collect();
        match execution {
            Execution::Sequential => self
                .particles
                .iter_mut()
                .zip(seeds)
                .try_for_each(step_particle::<P>)?,
            Execution::Parallel => self
                .particles
                .par_iter_mut()
                .zip(seeds.into_par_iter())
                .try_for_each(step_particle::<P>)?,
        }
        Ok(active)
    }

    /// Normalise log-weights in place with log-sum-exp and return the
    /// log-sum-exp (the round's log-evidence increment).
    pub fn normalize(&mut self) -> Result<f64> {
        let lse = log_sum_exp(self.log_weights());
        if !lse.is_finite() {
            return Err(SmcError::DegenerateWeights { log_sum_exp: lse });
        }
        for p in &mut self.particles {
            let lw = p.log_weight();
            p.set_log_weight(lw - lse);
        }
        Ok(lse)
    }

    /// Normalised weights (probabilities) computed from the current log-weights.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let log_weights = self.log_weights();
        let lse = log_sum_exp(log_weights.iter().copied());
        if !lse.is_finite() {
            return vec![0.0; log_weights.len()];
        }
        log_weights.iter().map(|lw| (lw - lse).exp()).collect()
    }

    /// Sum of the stored weights, exp(log-weight). One after `normalize` or `resample`.
    pub fn weight_sum(&self) -> f64 {
        self.particles.iter().map(|p| p.log_weight().exp()).sum()
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.normalized_weights())
    }

    /// Draw N particles with replacement proportional to weight and reset every
    /// weight to 1/N. Copies carry their status and contexts unmodified.
    /// Returns the ancestor index of each new particle.
    pub fn resample(&mut self, scheme: ResamplingScheme, rng: &mut StdRng) -> Result<Vec<usize>> {
        let weights = self.normalized_weights();
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return Err(SmcError::DegenerateWeights {
                log_sum_exp: log_sum_exp(self.log_weights()),
            });
        }
        let n = self.particles.len();
        let ancestors = match scheme {
            ResamplingScheme::Multinomial => multinomial_indices(&weights, n, rng),
            ResamplingScheme::Systematic => systematic_indices(&weights, n, rng),
        };
        self.particles = ancestors
            .iter()
            .map(|&i| self.particles[i].clone())
            .collect();
        self.reset_uniform();
        Ok(ancestors)
    }

    pub fn into_particles(self) -> Vec<P> {
        self.particles
    }
}

fn step_particle<P: SmcModel>((particle, seed): (&mut P, u64)) -> Result<()> {
    if particle.is_finished() {
        return Ok(());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    particle.step(&mut rng)
}

/// One finished (or cancelled) particle in the returned population.
#[derive(Debug, Clone, Serialize)]
pub struct WeightedCompletion {
    /// Full materialised text, prompt included.
    pub text: String,
    /// Text generated after the prompt.
    pub completion: String,
    pub log_weight: f64,
    /// Normalised weight; the population's weights sum to 1.
    pub weight: f64,
    pub finished: bool,
}

/// Per-round diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub round: usize,
    pub active: usize,
    pub ess: f64,
    pub log_evidence_increment: f64,
    pub resampled: bool,
    /// Sum of the population's stored weights at the end of the round.
    pub weight_sum: f64,
}

/// Result of an SMC run: N weighted completions plus diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SmcOutput {
    pub particles: Vec<WeightedCompletion>,
    pub rounds: usize,
    pub cancelled: bool,
    /// Running estimate of the log normalising constant.
    pub log_evidence: f64,
    pub history: Vec<RoundSummary>,
    pub metrics: RunMetrics,
}

impl SmcOutput {
    /// Distinct completions with their summed weight, heaviest first.
    pub fn posterior(&self) -> Vec<(String, f64)> {
        let mut merged: Vec<(String, f64)> = Vec::new();
        for p in &self.particles {
            match merged.iter_mut().find(|(c, _)| *c == p.completion) {
                Some((_, w)) => *w += p.weight,
                None => merged.push((p.completion.clone(), p.weight)),
            }
        }
        merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        merged
    }

    /// Heaviest single completion.
    pub fn best(&self) -> Option<&WeightedCompletion> {
        self.particles
            .iter()
            .max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Standard SMC driver with a configurable resampling scheme and cadence.
pub struct SmcDriver {
    config: SmcConfig,
    cancel: CancelFlag,
}

impl SmcDriver {
    pub fn new(config: SmcConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SmcConfig {
        &self.config
    }

    /// Run SMC over `num_particles` particles built by `factory`.
    pub fn run<P, F>(&self, mut factory: F) -> Result<SmcOutput>
    where
        P: SmcModel,
        F: FnMut() -> Result<P>,
    {
        let start = Instant::now();
        let deadline = self.config.timeout_ms.map(Duration::from_millis);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let n = self.config.num_particles;
        let particles = (0..n).map(|_| factory()).collect::<Result<Vec<P>>>()?;
        let mut population = Population::new(particles);

        info!(
            particles = n,
            resampling = ?self.config.resampling,
            ess_threshold = ?self.config.ess_threshold,
            "starting SMC run"
        );

        let mut profiler = Profiler::new();
        let mut history = Vec::new();
        let mut log_evidence = 0.0f64;
        let mut particle_steps = 0usize;
        let mut resample_events = 0usize;
        let mut cancelled = false;

        while !population.all_finished() {
            if self.cancel.is_cancelled() || deadline.is_some_and(|d| start.elapsed() >= d) {
                warn!(rounds = history.len(), "SMC run cancelled; returning last completed round");
                cancelled = true;
                break;
            }

            profiler.start("step");
            let active = population.step_active(self.config.execution, &mut rng)?;
            profiler.end("step");
            particle_steps += active;

            let increment = population.normalize()?;
            log_evidence += increment;
            let ess = population.effective_sample_size();

            let resampled = match self.config.ess_threshold {
                None => true,
                Some(threshold) => ess < threshold * n as f64,
            };
            if resampled {
                profiler.start("resample");
                population.resample(self.config.resampling, &mut rng)?;
                profiler.end("resample");
                resample_events += 1;
            }

            let summary = RoundSummary {
                round: history.len() + 1,
                active,
                ess,
                log_evidence_increment: increment,
                resampled,
                weight_sum: population.weight_sum(),
            };
            debug!(
                round = summary.round,
                active = summary.active,
                ess = summary.ess,
                increment = summary.log_evidence_increment,
                resampled = summary.resampled,
                "SMC round complete"
            );
            history.push(summary);
        }

        let rounds = history.len();
        let metrics = RunMetrics::finish(
            rounds,
            particle_steps,
            resample_events,
            &profiler,
            start.elapsed(),
        );
        let weights = population.normalized_weights();
        let particles = population
            .into_particles()
            .into_iter()
            .zip(weights)
            .map(|(p, weight)| WeightedCompletion {
                text: p.materialized_text().to_string(),
                completion: p.completion().to_string(),
                log_weight: p.log_weight(),
                weight,
                finished: p.is_finished(),
            })
            .collect();

        info!(
            rounds,
            log_evidence,
            tokens_per_second = metrics.tokens_per_second,
            "SMC run finished"
        );

        Ok(SmcOutput {
            particles,
            rounds,
            cancelled,
            log_evidence,
            history,
            metrics,
        })
    }
}

/// Run SMC with default settings: resample every round (multinomial).
pub fn smc_standard<P, F>(factory: F, num_particles: usize) -> Result<SmcOutput>
where
    P: SmcModel,
    F: FnMut() -> Result<P>,
{
    let config = SmcConfig {
        num_particles,
        ..SmcConfig::default()
    };
    SmcDriver::new(config)?.run(factory)
}
