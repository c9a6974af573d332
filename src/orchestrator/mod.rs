use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::console::{wait_until_accepting_connections, ConsoleSession, Connector};
use crate::deploy;
use crate::error::LabError;
use crate::generator::ConfigGenerator;
use crate::lab::{LabService, Provisioner};
use crate::models::{
    ConsoleEndpoint, DeviceOutcome, DeviceStatus, LabPlan, NodeRole, ProbeOutcome, ProbeSpec, ProjectHandle,
    RunOutcome, RunResult, RunStage, Verdict,
};
use crate::status;

/// Mutable bookkeeping of one run, turned into a `RunResult` at the end
struct RunState {
    stage: RunStage,
    devices: HashMap<String, DeviceOutcome>,
    probes: Vec<ProbeOutcome>,
    provisioning_errors: Vec<String>,
}

impl RunState {
    fn set(&mut self, device: &str, status: DeviceStatus, transcript: Option<String>) {
        if let Some(outcome) = self.devices.get_mut(device) {
            match &status {
                DeviceStatus::Applied => tracing::info!("{}: applied", device),
                DeviceStatus::Failed { reason } => tracing::warn!("{}: failed: {}", device, reason),
                DeviceStatus::SkippedDegraded { reason } => tracing::warn!("{}: degraded: {}", device, reason),
                DeviceStatus::NotAttempted => {}
            }
            outcome.status = status;
            outcome.transcript = transcript;
        }
    }

    fn pending(&self, device: &str) -> bool {
        matches!(self.devices.get(device).map(|d| &d.status), Some(DeviceStatus::NotAttempted))
    }

    fn applied(&self, device: &str) -> bool {
        matches!(self.devices.get(device).map(|d| &d.status), Some(DeviceStatus::Applied))
    }
}

/// Orchestrator drives a run through provisioning, readiness, configuration
/// and validation. Per-device problems are recorded and the run continues;
/// only an unreachable lab service, an invalid plan or cancellation abort it.
pub struct Orchestrator {
    provisioner: Provisioner,
    connector: Arc<dyn Connector>,
    config: Config,
    plan: LabPlan,
}

impl Orchestrator {
    pub fn new(service: Arc<dyn LabService>, connector: Arc<dyn Connector>, config: Config, plan: LabPlan) -> Self {
        let provisioner = Provisioner::new(service, &config.server_host());
        Self {
            provisioner,
            connector,
            config,
            plan,
        }
    }

    /// Execute one run. Always yields a report; an abort is recorded in
    /// `RunResult::outcome` together with the stage it happened in.
    pub async fn run(&self, cancel: &CancellationToken) -> RunResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let run_cancel = cancel.child_token();

        let deadline = self.config.run_deadline;
        let watchdog = {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(deadline) => {
                        tracing::warn!("Run deadline of {:?} reached, cancelling", deadline);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        };

        let mut state = RunState {
            stage: RunStage::Provisioning,
            devices: self
                .plan
                .topology
                .nodes
                .iter()
                .map(|n| {
                    let outcome = DeviceOutcome {
                        name: n.name.clone(),
                        role: n.role,
                        status: DeviceStatus::NotAttempted,
                        transcript: None,
                    };
                    (n.name.clone(), outcome)
                })
                .collect(),
            probes: Vec::new(),
            provisioning_errors: Vec::new(),
        };

        tracing::info!("Run {} starting for project '{}'", run_id, self.config.project_name);
        tracing::debug!("Console pacing: {}", pacing_summary(&self.config));
        let outcome = match self.execute(&mut state, &run_cancel).await {
            Ok(()) => RunOutcome::Done,
            Err(e) => {
                let stage = state.stage;
                tracing::error!("Run {} aborted during {}: {}", run_id, stage.as_str(), e);
                self.transition(&mut state, RunStage::Aborted);
                RunOutcome::Aborted {
                    stage,
                    error: e.to_string(),
                }
            }
        };
        watchdog.abort();

        let mut devices = state.devices;
        let result = RunResult {
            run_id,
            project: self.config.project_name.clone(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            devices: self
                .plan
                .topology
                .nodes
                .iter()
                .filter_map(|n| devices.remove(&n.name))
                .collect(),
            probes: state.probes,
            provisioning_errors: state.provisioning_errors,
        };
        tracing::info!(
            "Run {} finished: {} applied, {} failed, {} degraded, {} not attempted",
            result.run_id,
            result.count_status("applied"),
            result.count_status("failed"),
            result.count_status("skipped-degraded"),
            result.count_status("not-attempted"),
        );
        result
    }

    async fn execute(&self, state: &mut RunState, cancel: &CancellationToken) -> Result<(), LabError> {
        let project = self.provision(state, cancel).await?;

        self.transition(state, RunStage::AwaitingReadiness);
        let ready = self.await_readiness(&project, state, cancel).await?;

        self.transition(state, RunStage::Configuring);
        self.configure(&project, &ready, state, cancel).await?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(LabError::Cancelled),
            _ = sleep(self.config.convergence_delay) => {}
        }

        self.transition(state, RunStage::Validating);
        self.validate(&project, state, cancel).await?;

        self.transition(state, RunStage::Done);
        Ok(())
    }

    fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    fn transition(&self, state: &mut RunState, next: RunStage) {
        tracing::info!("Stage {} -> {}", state.stage.as_str(), next.as_str());
        state.stage = next;
    }

    async fn provision(&self, state: &mut RunState, cancel: &CancellationToken) -> Result<ProjectHandle, LabError> {
        self.plan.validate()?;
        checkpoint(cancel)?;

        let project = self.provisioner.create_project(&self.config.project_name).await?;
        checkpoint(cancel)?;
        let handle = &project;

        let workers = self.workers();
        let created: Vec<(String, Result<(), LabError>)> = stream::iter(&self.plan.topology.nodes)
            .map(|node| async move {
                let res = self.provisioner.create_node(handle, node).await.map(|_| ());
                (node.name.clone(), res)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut missing = HashSet::new();
        for (name, res) in created {
            if let Err(e) = res {
                if e.is_fatal() {
                    return Err(e);
                }
                state.provisioning_errors.push(e.to_string());
                state.set(&name, DeviceStatus::Failed { reason: e.to_string() }, None);
                missing.insert(name);
            }
        }
        checkpoint(cancel)?;

        let mut links = Vec::with_capacity(self.plan.links.len());
        for link in &self.plan.links {
            match [&link.a.node, &link.b.node].into_iter().find(|n| missing.contains(*n)) {
                Some(node) => {
                    tracing::warn!("Skipping link {}: node {} was not created", link, node);
                    state
                        .provisioning_errors
                        .push(format!("link {} skipped: node {} missing", link, node));
                }
                None => links.push(link),
            }
        }
        let linked: Vec<Result<(), LabError>> = stream::iter(links)
            .map(|link| async move { self.provisioner.create_link(handle, link).await.map(|_| ()) })
            .buffer_unordered(workers)
            .collect()
            .await;
        for res in linked {
            if let Err(e) = res {
                if e.is_fatal() {
                    return Err(e);
                }
                state.provisioning_errors.push(e.to_string());
            }
        }
        checkpoint(cancel)?;

        for (name, e) in self.provisioner.start_all(&project, workers).await? {
            if e.is_fatal() {
                return Err(e);
            }
            state.provisioning_errors.push(e.to_string());
            if state.pending(&name) {
                state.set(&name, DeviceStatus::Failed { reason: e.to_string() }, None);
            }
        }
        checkpoint(cancel)?;
        Ok(project)
    }

    /// Wait for each remaining device's console to accept connections.
    /// Devices that never do are marked degraded and left out of later stages.
    async fn await_readiness(
        &self,
        project: &ProjectHandle,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, ConsoleEndpoint>, LabError> {
        let known = self.provisioner.resolve_console_endpoints(project).await?;
        let candidates: Vec<&str> = self
            .plan
            .topology
            .nodes
            .iter()
            .map(|n| n.name.as_str())
            .filter(|name| state.pending(name))
            .collect();

        let results: Vec<(&str, Result<ConsoleEndpoint, String>)> = stream::iter(candidates)
            .map(|name| {
                let initial = known.get(name).cloned();
                async move { (name, self.wait_ready(project, name, initial, cancel).await) }
            })
            .buffer_unordered(self.workers())
            .collect()
            .await;
        checkpoint(cancel)?;

        let mut ready = HashMap::new();
        for (name, res) in results {
            match res {
                Ok(endpoint) => {
                    tracing::info!("{}: console {} ready", name, endpoint);
                    ready.insert(name.to_string(), endpoint);
                }
                Err(reason) => state.set(name, DeviceStatus::SkippedDegraded { reason }, None),
            }
        }
        Ok(ready)
    }

    async fn wait_ready(
        &self,
        project: &ProjectHandle,
        name: &str,
        mut endpoint: Option<ConsoleEndpoint>,
        cancel: &CancellationToken,
    ) -> Result<ConsoleEndpoint, String> {
        let limit = self.config.readiness_timeout;
        let deadline = Instant::now() + limit;
        loop {
            if let Some(ep) = endpoint {
                let remaining = deadline.saturating_duration_since(Instant::now());
                return if wait_until_accepting_connections(
                    self.connector.as_ref(),
                    &ep,
                    remaining,
                    self.config.readiness_poll,
                    cancel,
                )
                .await
                {
                    Ok(ep)
                } else {
                    Err(format!("console {} not accepting connections within {:?}", ep, limit))
                };
            }

            // No console reported yet; the node may still be starting
            if Instant::now() >= deadline {
                return Err(format!("no console endpoint reported within {:?}", limit));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err("cancelled".to_string()),
                _ = sleep(self.config.readiness_poll) => {}
            }
            endpoint = match self.provisioner.resolve_console_endpoints(project).await {
                Ok(mut all) => all.remove(name),
                Err(e) => {
                    tracing::debug!("Re-resolving console of {} failed: {}", name, e);
                    None
                }
            };
        }
    }

    async fn configure(
        &self,
        project: &ProjectHandle,
        ready: &HashMap<String, ConsoleEndpoint>,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), LabError> {
        // Endpoints can move when a node restarts; prefer a fresh view
        let fresh = self.provisioner.resolve_console_endpoints(project).await?;
        let generator = ConfigGenerator::new(&self.plan);

        let targets: Vec<_> = self
            .plan
            .topology
            .nodes
            .iter()
            .filter(|n| ready.contains_key(&n.name))
            .filter_map(|n| fresh.get(&n.name).or_else(|| ready.get(&n.name)).map(|ep| (n, ep.clone())))
            .collect();

        let results: Vec<(String, Option<DeviceStatus>, Option<String>)> = stream::iter(targets)
            .map(|(node, endpoint)| {
                let generated = generator.generate(node);
                async move {
                    let config = match generated {
                        Ok(config) => config,
                        Err(e) => return (node.name.clone(), Some(DeviceStatus::Failed { reason: e.to_string() }), None),
                    };
                    let mut session = ConsoleSession::new(endpoint, cancel);
                    if let Err(e) = session.open(self.connector.as_ref(), self.config.connect_timeout).await {
                        // a run cancelled before this console was reached leaves it untouched
                        let status = match e {
                            LabError::Cancelled => None,
                            e => Some(DeviceStatus::SkippedDegraded { reason: e.to_string() }),
                        };
                        return (node.name.clone(), status, None);
                    }
                    let settle = self.config.settle_delay(node.role);
                    let res = deploy::apply(&mut session, &config, settle, self.config.quiet_timeout).await;
                    session.close().await;
                    match res {
                        Ok(transcript) => (node.name.clone(), Some(DeviceStatus::Applied), Some(transcript)),
                        Err(e) => (node.name.clone(), Some(DeviceStatus::Failed { reason: e.to_string() }), None),
                    }
                }
            })
            .buffer_unordered(self.workers())
            .collect()
            .await;

        for (name, status, transcript) in results {
            if let Some(status) = status {
                state.set(&name, status, transcript);
            }
        }
        checkpoint(cancel)
    }

    /// Probes from the plan, or every host pinging its gateway when none are listed
    fn probe_set(&self) -> Vec<ProbeSpec> {
        if !self.plan.probes.is_empty() {
            return self.plan.probes.clone();
        }
        let generator = ConfigGenerator::new(&self.plan);
        self.plan
            .topology
            .hosts()
            .filter_map(|h| {
                let addr = generator.host_address(&h.name).ok()?;
                Some(ProbeSpec::new(&h.name, &addr.gateway.to_string()))
            })
            .collect()
    }

    fn probe_target(&self, destination: &str) -> Option<String> {
        if destination.parse::<std::net::Ipv4Addr>().is_ok() {
            return Some(destination.to_string());
        }
        ConfigGenerator::new(&self.plan)
            .host_address(destination)
            .ok()
            .map(|a| a.address.to_string())
    }

    async fn validate(
        &self,
        project: &ProjectHandle,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), LabError> {
        let probes = self.probe_set();
        let endpoints = self.provisioner.resolve_console_endpoints(project).await?;

        // One console per source host; probes from the same host run in order
        let mut by_source: BTreeMap<&str, Vec<(usize, &ProbeSpec)>> = BTreeMap::new();
        for (idx, probe) in probes.iter().enumerate() {
            by_source.entry(probe.source.as_str()).or_default().push((idx, probe));
        }

        let state_ref = &*state;
        let batches: Vec<Vec<(usize, ProbeOutcome)>> = stream::iter(by_source)
            .map(|(source, batch)| {
                let endpoint = endpoints.get(source).cloned().filter(|_| state_ref.applied(source));
                async move { self.probe_from(source, endpoint, batch, cancel).await }
            })
            .buffer_unordered(self.workers())
            .collect()
            .await;

        let mut outcomes: Vec<(usize, ProbeOutcome)> = batches.into_iter().flatten().collect();
        outcomes.sort_by_key(|(idx, _)| *idx);
        state.probes = outcomes.into_iter().map(|(_, o)| o).collect();
        checkpoint(cancel)
    }

    async fn probe_from(
        &self,
        source: &str,
        endpoint: Option<ConsoleEndpoint>,
        batch: Vec<(usize, &ProbeSpec)>,
        cancel: &CancellationToken,
    ) -> Vec<(usize, ProbeOutcome)> {
        let indeterminate = |probe: &ProbeSpec| ProbeOutcome {
            source: probe.source.clone(),
            destination: probe.destination.clone(),
            verdict: Verdict::Indeterminate,
            transcript: None,
        };

        let mut session = match endpoint {
            Some(ep) => ConsoleSession::new(ep, cancel),
            None => {
                tracing::info!("{}: not configured, probes indeterminate", source);
                return batch.into_iter().map(|(idx, p)| (idx, indeterminate(p))).collect();
            }
        };
        if let Err(e) = session.open(self.connector.as_ref(), self.config.connect_timeout).await {
            tracing::warn!("{}: probe console unavailable: {}", source, e);
            return batch.into_iter().map(|(idx, p)| (idx, indeterminate(p))).collect();
        }

        let mut out = Vec::with_capacity(batch.len());
        for (idx, probe) in batch {
            let Some(target) = self.probe_target(&probe.destination) else {
                tracing::warn!("{}: cannot resolve probe destination {}", source, probe.destination);
                out.push((idx, indeterminate(probe)));
                continue;
            };
            let (verdict, transcript) = status::probe(
                &mut session,
                &target,
                self.config.probe_window,
                self.config.quiet_timeout,
            )
            .await;
            tracing::info!("Probe {} -> {}: {}", source, probe.destination, verdict.as_str());
            out.push((
                idx,
                ProbeOutcome {
                    source: probe.source.clone(),
                    destination: probe.destination.clone(),
                    verdict,
                    transcript,
                },
            ));
        }
        session.close().await;
        out
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), LabError> {
    if cancel.is_cancelled() {
        Err(LabError::Cancelled)
    } else {
        Ok(())
    }
}

fn pacing_summary(config: &Config) -> String {
    let ms = |d: Duration| d.as_millis();
    format!(
        "settle router={}ms switch={}ms host={}ms, quiet={}ms, probe window={}ms",
        ms(config.settle_delay(NodeRole::Router)),
        ms(config.settle_delay(NodeRole::Switch)),
        ms(config.settle_delay(NodeRole::Host)),
        ms(config.quiet_timeout),
        ms(config.probe_window),
    )
}
