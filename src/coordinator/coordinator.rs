use std::path::Path;

use log::{debug, error, info, warn};

use super::{BestRound, Capabilities, CoordinatorState, RoundRecord, record};
use crate::{
    aggregation::{MixingCoefficients, aggregate_sessions},
    checkpoint::{self, CheckpointWriter},
    config::ServerConfig,
    error::{FederationErr, Result},
    evaluation::{HoldoutSet, MetricReport},
    execution::{Dispatcher, SessionFailure},
    learner::Learner,
    sampling::Sampler,
    session::ClientSession,
    state::ModelSnapshot,
    transmission::Transmitter,
};

/// Drives the federated rounds and owns the global model.
///
/// A round samples clients, transmits the global state to them, runs their
/// local updates, aggregates the results weighted by data volume, evaluates
/// the new global state on every holdout set and checkpoints it.
pub struct Coordinator<L: Learner> {
    config: ServerConfig,
    capabilities: Capabilities<L::SharedData>,
    sampler: Sampler,
    transmitter: Transmitter,
    dispatcher: Dispatcher,
    checkpoints: Option<CheckpointWriter>,
    state: CoordinatorState,
    round: usize,
    blueprint: ModelSnapshot,
    global: ModelSnapshot,
    sessions: Vec<ClientSession<L>>,
    client_set: String,
    holdouts: Vec<(String, Box<dyn HoldoutSet>)>,
    history: Vec<RoundRecord>,
}

impl<L: Learner> Coordinator<L> {
    /// Creates a new `Coordinator`.
    ///
    /// # Arguments
    /// * `config` - The coordinator's configuration, validated here.
    /// * `capabilities` - The optional phases to run.
    ///
    /// # Returns
    /// A new `Coordinator` or `InvalidConfiguration`.
    pub fn new(config: ServerConfig, capabilities: Capabilities<L::SharedData>) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher::new(config.dispatch_mode(), config.round_deadline());
        debug!(
            "dispatch mode {:?}, deadline {:?}",
            dispatcher.mode(),
            config.round_deadline()
        );

        Ok(Self {
            sampler: Sampler::new(config.seed),
            transmitter: Transmitter::new(config.transmit_retries),
            dispatcher,
            checkpoints: config.checkpoint.as_ref().map(|c| c.writer()),
            config,
            capabilities,
            state: CoordinatorState::Uninitialized,
            round: 0,
            blueprint: ModelSnapshot::default(),
            global: ModelSnapshot::default(),
            sessions: Vec::new(),
            client_set: String::new(),
            holdouts: Vec::new(),
            history: Vec::new(),
        })
    }

    /// Sets up the global model, optionally resuming from a checkpoint.
    ///
    /// # Arguments
    /// * `blueprint` - The model structure every client receives a copy of.
    /// * `resume` - A checkpoint to load the global state from, and the round it was written at.
    ///
    /// # Returns
    /// `InvalidConfiguration` if rounds have already started, the model was
    /// already resumed or doesn't fit the capabilities, a checkpoint error if it
    /// can't be loaded.
    pub fn setup_model(
        &mut self,
        blueprint: ModelSnapshot,
        resume: Option<(&Path, usize)>,
    ) -> Result<()> {
        if !matches!(
            self.state,
            CoordinatorState::Uninitialized | CoordinatorState::ModelReady
        ) {
            return Err(FederationErr::config(format!(
                "can't set up the model once rounds have started, coordinator is {}",
                self.state
            )));
        }

        if self.round != 0 {
            return Err(FederationErr::config(format!(
                "model already set up at round {}",
                self.round
            )));
        }

        if blueprint.has_auxiliary() != self.capabilities.has_auxiliary() {
            return Err(FederationErr::config(format!(
                "model has auxiliary state: {}, dual model capability: {}",
                blueprint.has_auxiliary(),
                self.capabilities.has_auxiliary()
            )));
        }

        let (global, round) = match resume {
            Some((path, start_round)) => {
                let loaded = checkpoint::load(path)?;
                blueprint
                    .check_compatible(&loaded)
                    .map_err(|(key, reason)| {
                        FederationErr::config(format!(
                            "checkpoint {} doesn't match the model at '{key}': {reason}",
                            path.display()
                        ))
                    })?;

                info!("resuming from {} after round {start_round}", path.display());
                (loaded, start_round)
            }
            None => (blueprint.clone(), 0),
        };

        self.blueprint = blueprint;
        self.global = global;
        self.round = round;
        self.state = CoordinatorState::ModelReady;
        Ok(())
    }

    /// Registers the participating clients.
    ///
    /// Each session is bound to its position, receives the shared dataset if
    /// configured and then its own copy of the model blueprint.
    ///
    /// # Arguments
    /// * `sessions` - The client sessions, the first one names the client set.
    ///
    /// # Returns
    /// `InvalidConfiguration` if the model isn't set up, there are no clients
    /// or a client has no samples.
    pub fn register_clients(&mut self, sessions: Vec<ClientSession<L>>) -> Result<()> {
        if self.state != CoordinatorState::ModelReady {
            return Err(FederationErr::config(format!(
                "clients must be registered right after model setup, coordinator is {}",
                self.state
            )));
        }

        let Some(first) = sessions.first() else {
            return Err(FederationErr::config("at least one client is required"));
        };

        if let Some(empty) = sessions.iter().find(|s| s.sample_count() == 0) {
            return Err(FederationErr::config(format!(
                "client '{}' has no samples",
                empty.name()
            )));
        }

        self.client_set = first.name().to_string();
        self.sessions = sessions;

        for (index, session) in self.sessions.iter_mut().enumerate() {
            session.bind(index);
            if let Some(shared) = self.capabilities.shared_dataset() {
                session.attach_shared_dataset(shared.clone());
            }
            session.setup(self.blueprint.clone());
        }

        info!(
            "registered {} clients as '{}'",
            self.sessions.len(),
            self.client_set
        );
        self.state = CoordinatorState::Running { round: self.round };
        Ok(())
    }

    /// Adds holdout sets the global model is evaluated on after every round.
    ///
    /// A set registered under an existing name replaces the previous one.
    pub fn register_holdouts(
        &mut self,
        holdouts: impl IntoIterator<Item = (String, Box<dyn HoldoutSet>)>,
    ) {
        for (name, holdout) in holdouts {
            match self.holdouts.iter_mut().find(|(n, _)| *n == name) {
                Some((_, slot)) => *slot = holdout,
                None => self.holdouts.push((name, holdout)),
            }
        }
    }

    /// Runs the whole round budget, then broadcasts the final global state.
    ///
    /// Errors of a round that left a record behind (a skipped round, or an
    /// aggregated one whose evaluation or checkpoint failed) were already
    /// logged and don't stop the training, any other error aborts it.
    pub fn fit(&mut self) -> Result<()> {
        if !matches!(self.state, CoordinatorState::Running { .. }) {
            return Err(FederationErr::config(format!(
                "can't fit, coordinator is {}",
                self.state
            )));
        }

        self.broadcast();

        let names: Vec<_> = self.holdouts.iter().map(|(n, _)| n.as_str()).collect();
        info!("Round \t {}", names.join(" \t "));

        for _ in 0..self.config.num_rounds {
            let recorded = self.history.len();
            match self.run_round() {
                Err(e) if self.history.len() == recorded => return Err(e),
                _ => {}
            }
        }

        self.finish();
        Ok(())
    }

    /// Executes a single round.
    ///
    /// If every sampled client fails, or a contribution can't be blended into
    /// the global state, the round is recorded as failed, the counter still
    /// advances and no checkpoint is written. Once the aggregate is in place
    /// the round is always recorded, as unreported if a holdout evaluation or
    /// the checkpoint fails.
    pub fn run_round(&mut self) -> Result<()> {
        let CoordinatorState::Running { round } = self.state else {
            return Err(FederationErr::config(format!(
                "can't run a round, coordinator is {}",
                self.state
            )));
        };
        let round = round + 1;
        let prefix = format!("[Round: {round:03}]");

        let sampled = self
            .sampler
            .sample(self.sessions.len(), self.config.fraction)?;
        let sample_counts: Vec<_> = sampled
            .iter()
            .map(|&i| self.sessions[i].sample_count())
            .collect();
        debug!("{prefix} sampled clients {sampled:?}");

        let report = self
            .transmitter
            .transmit(&mut self.sessions, &sampled, &self.global);
        let delivered = report.delivered().to_vec();

        debug!("{prefix} updating {} selected clients", delivered.len());
        let outcome = self.dispatcher.run_round(&mut self.sessions, &delivered)?;

        let mut excluded: Vec<_> = report
            .failed_indices()
            .into_iter()
            .map(|i| (i, SessionFailure::Undelivered))
            .chain(outcome.failures().iter().cloned())
            .collect();
        excluded.sort_by_key(|(i, _)| *i);

        if outcome.contributors().is_empty() {
            let err = FederationErr::RoundAggregationImpossible {
                round,
                excluded: excluded.iter().map(|(i, _)| *i).collect(),
            };
            return self.skip_round(round, sampled, sample_counts, excluded, err);
        }

        debug!(
            "{prefix} {} clients updated, total sample size {}",
            outcome.contributors().len(),
            outcome.total_samples()
        );

        let coefficients = MixingCoefficients::from_sample_counts(outcome.sample_counts())?;
        let global = match aggregate_sessions(
            &self.global,
            &self.sessions,
            outcome.contributors(),
            &coefficients,
        ) {
            Ok(global) => global,
            Err(err @ FederationErr::StateShapeMismatch { .. }) => {
                return self.skip_round(round, sampled, sample_counts, excluded, err);
            }
            Err(e) => return Err(e),
        };

        self.global = global;
        self.advance(round);
        debug!("{prefix} updated weights of {} clients averaged", coefficients.len());

        if self.config.evaluate_clients {
            match self
                .dispatcher
                .evaluate_round(&mut self.sessions, outcome.contributors())
            {
                Ok(flags) => {
                    let failed: Vec<_> =
                        flags.iter().filter(|(_, ok)| !ok).map(|(i, _)| *i).collect();
                    if failed.is_empty() {
                        debug!("{prefix} {} clients evaluated", flags.len());
                    } else {
                        warn!("{prefix} local evaluation failed on clients {failed:?}");
                    }
                }
                Err(e) => warn!("{prefix} client evaluation skipped: {e}"),
            }
        }

        let mut metrics = Vec::with_capacity(self.holdouts.len());
        match self.report(round, &mut metrics) {
            Ok(()) => {
                self.history.push(RoundRecord::completed(
                    round,
                    sampled,
                    sample_counts,
                    excluded,
                    metrics,
                ));
                Ok(())
            }
            Err(err) => {
                error!("{prefix} aggregated but not reported: {err}");
                self.history.push(RoundRecord::unreported(
                    round,
                    sampled,
                    sample_counts,
                    excluded,
                    metrics,
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }

    /// Evaluates the new global state on every holdout set, logs the round's
    /// line and checkpoints it.
    fn report(&mut self, round: usize, metrics: &mut Vec<(String, MetricReport)>) -> Result<()> {
        self.evaluate_holdouts(metrics)?;
        let line: Vec<_> = metrics.iter().map(|(_, m)| m.format_values()).collect();
        info!("{round:03} \t {}", line.join(" \t "));

        if let Some(writer) = &self.checkpoints {
            writer.save(&self.client_set, round, &self.global)?;
        }
        Ok(())
    }

    /// Evaluates the global state on every holdout set, in registration order.
    fn evaluate_holdouts(&mut self, metrics: &mut Vec<(String, MetricReport)>) -> Result<()> {
        for (name, holdout) in self.holdouts.iter_mut() {
            let report = holdout.evaluate(self.global.primary())?;
            if !report.summary().is_empty() {
                info!("{name}: {}", report.summary());
            }
            metrics.push((name.clone(), report));
        }

        Ok(())
    }

    /// Records a failed round, advances the counter and hands the error back.
    fn skip_round(
        &mut self,
        round: usize,
        sampled: Vec<usize>,
        sample_counts: Vec<usize>,
        excluded: Vec<(usize, SessionFailure)>,
        err: FederationErr,
    ) -> Result<()> {
        error!("[Round: {round:03}] round skipped: {err}");

        self.history.push(RoundRecord::failed(
            round,
            sampled,
            sample_counts,
            excluded,
            err.to_string(),
        ));
        self.advance(round);
        Err(err)
    }

    fn advance(&mut self, round: usize) {
        self.round = round;
        self.state = CoordinatorState::Running { round };
    }

    /// Sends the global state to every registered client.
    fn broadcast(&mut self) {
        let report = self.transmitter.broadcast(&mut self.sessions, &self.global);
        if !report.is_complete() {
            warn!(
                "[Round: {:03}] global state not delivered to clients {:?}",
                self.round,
                report.failed_indices()
            );
        }
    }

    /// Broadcasts the final global state and reports the best rounds.
    fn finish(&mut self) {
        self.broadcast();

        for best in self.best_rounds() {
            info!(
                "best round on {}: {:03} ({:05.4})",
                best.holdout, best.round, best.key_metric
            );
        }

        self.state = CoordinatorState::Finished;
    }

    /// For every holdout set, the completed round with the largest key metric.
    pub fn best_rounds(&self) -> Vec<BestRound> {
        let names = self.holdouts.iter().map(|(n, _)| n.as_str());
        record::best_rounds(names, &self.history)
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// The last executed (or resumed) round.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn global_state(&self) -> &ModelSnapshot {
        &self.global
    }

    pub fn sessions(&self) -> &[ClientSession<L>] {
        &self.sessions
    }

    pub fn client_set(&self) -> &str {
        &self.client_set
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
