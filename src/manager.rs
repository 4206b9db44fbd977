// src/manager.rs
// SIMULATION MANAGER
// Owns the simulation registry and every background task that mutates it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::analyst::{AggregatedInsight, InsightAggregator};
use crate::brain::TextGenerator;
use crate::config::SimulationConfig;
use crate::error::{DiscoveryError, Result};
use crate::interviewer::{Conversation, Interviewer};
use crate::persona_generator::{Persona, PersonaGenerator, PersonaOutline};
use crate::reporter::Reporter;
use crate::simulation::{Progress, Simulation, SimulationStatus, SimulationSummary};

type SharedSimulation = Arc<RwLock<Simulation>>;

// Poisoning only means a writer panicked mid-update; the record is still readable.
fn read(simulation: &SharedSimulation) -> RwLockReadGuard<'_, Simulation> {
    simulation.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(simulation: &SharedSimulation) -> RwLockWriteGuard<'_, Simulation> {
    simulation.write().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of simulations plus the supervised tasks that drive them.
///
/// Background work runs on the runtime handle given at construction, so the
/// manager can be shared with a server running on a different executor.
pub struct SimulationManager {
    simulations: DashMap<String, SharedSimulation>,
    tasks: DashMap<String, JoinHandle<()>>,
    personas: PersonaGenerator,
    interviewer: Interviewer,
    aggregator: InsightAggregator,
    settings: SimulationConfig,
    runtime: Handle,
}

impl SimulationManager {
    pub fn new(brain: Arc<dyn TextGenerator>, settings: SimulationConfig, runtime: Handle) -> Self {
        Self {
            simulations: DashMap::new(),
            tasks: DashMap::new(),
            personas: PersonaGenerator::new(brain.clone(), settings.max_parallel_expansions),
            interviewer: Interviewer::new(brain.clone()),
            aggregator: InsightAggregator::new(brain),
            settings,
            runtime,
        }
    }

    pub fn settings(&self) -> &SimulationConfig {
        &self.settings
    }

    /// Register a simulation and start generating its personas in the background.
    pub fn create(&self, context: &str, num_personas: usize, max_turns: usize) -> Result<String> {
        self.validate(context, num_personas, max_turns)?;

        let mut simulation = Simulation::new(context, num_personas, max_turns);
        simulation.transition(SimulationStatus::GeneratingPersonas)?;
        let id = simulation.id.clone();
        let shared = Arc::new(RwLock::new(simulation));
        self.simulations.insert(id.clone(), shared.clone());
        info!(simulation_id = %id, num_personas, max_turns, "simulation created, generating personas");

        let generator = self.personas.clone();
        let context = context.to_string();
        let task_shared = shared.clone();
        let task_id = id.clone();
        self.supervise(&id, shared, async move {
            let personas = generator.generate_all(&context, num_personas).await;

            let mut simulation = write(&task_shared);
            simulation.personas = personas;
            simulation.transition(SimulationStatus::Ready)?;
            info!(simulation_id = %task_id, personas = simulation.personas.len(), "simulation ready");
            Ok::<(), DiscoveryError>(())
        });

        Ok(id)
    }

    fn validate(&self, context: &str, num_personas: usize, max_turns: usize) -> Result<()> {
        if context.trim().is_empty() {
            return Err(DiscoveryError::Validation("context must not be empty".to_string()));
        }
        if num_personas == 0 || num_personas > self.settings.max_personas {
            return Err(DiscoveryError::Validation(format!(
                "num_personas must be between 1 and {}",
                self.settings.max_personas
            )));
        }
        if max_turns == 0 || max_turns > self.settings.max_turns_limit {
            return Err(DiscoveryError::Validation(format!(
                "max_turns must be between 1 and {}",
                self.settings.max_turns_limit
            )));
        }
        Ok(())
    }

    /// Begin interviewing. Only a `ready` simulation can start.
    pub fn try_start(&self, id: &str) -> Result<()> {
        let shared = self.lookup(id)?;
        write(&shared).transition(SimulationStatus::Running)?;
        info!(simulation_id = %id, "simulation running");

        let run = SimulationRun {
            simulation: shared.clone(),
            interviewer: self.interviewer.clone(),
            aggregator: self.aggregator.clone(),
            turn_delay: self.settings.turn_delay(),
        };
        self.supervise(id, shared, run.execute());
        Ok(())
    }

    pub fn start(&self, id: &str) -> bool {
        self.try_start(id).is_ok()
    }

    /// Ask a running simulation to finish. Conversations notice at their next turn.
    pub fn try_stop(&self, id: &str) -> Result<()> {
        let shared = self.lookup(id)?;
        write(&shared).transition(SimulationStatus::Completed)?;
        info!(simulation_id = %id, "simulation stopped");
        Ok(())
    }

    pub fn stop(&self, id: &str) -> bool {
        self.try_stop(id).is_ok()
    }

    /// Drop a simulation from the registry, aborting its background work.
    pub fn delete(&self, id: &str) -> bool {
        if let Some((_, task)) = self.tasks.remove(id) {
            task.abort();
        }
        let removed = self.simulations.remove(id).is_some();
        if removed {
            info!(simulation_id = %id, "simulation deleted");
        }
        removed
    }

    /// Wait for every background task tracked for `id`.
    pub async fn wait(&self, id: &str) {
        while let Some((_, task)) = self.tasks.remove(id) {
            let _ = task.await;
        }
    }

    /// Persona outlines for a context without creating a simulation.
    pub async fn reflect(&self, context: &str, count: usize) -> Vec<PersonaOutline> {
        self.personas.reflect(context, count).await
    }

    // --- READ QUERIES ---

    pub fn get_simulation(&self, id: &str) -> Option<Simulation> {
        self.snapshot(id, |sim| sim.clone())
    }

    pub fn get_summary(&self, id: &str) -> Option<SimulationSummary> {
        self.snapshot(id, Simulation::summary)
    }

    /// All simulations, oldest first.
    pub fn list(&self) -> Vec<SimulationSummary> {
        let mut entries: Vec<_> = self
            .simulations
            .iter()
            .map(|entry| {
                let sim = read(entry.value());
                (sim.created_at, sim.summary())
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        entries.into_iter().map(|(_, summary)| summary).collect()
    }

    pub fn get_personas(&self, id: &str) -> Option<Vec<Persona>> {
        self.snapshot(id, |sim| sim.personas.clone())
    }

    pub fn get_conversations(&self, id: &str) -> Option<Vec<Conversation>> {
        self.snapshot(id, |sim| sim.conversations.clone())
    }

    pub fn get_insights(&self, id: &str) -> Option<Vec<AggregatedInsight>> {
        self.snapshot(id, |sim| sim.aggregated_insights.clone())
    }

    pub fn get_progress(&self, id: &str) -> Option<Progress> {
        self.snapshot(id, Simulation::progress)
    }

    fn snapshot<T>(&self, id: &str, view: impl FnOnce(&Simulation) -> T) -> Option<T> {
        let shared = self.simulations.get(id)?.value().clone();
        let sim = read(&shared);
        Some(view(&sim))
    }

    fn lookup(&self, id: &str) -> Result<SharedSimulation> {
        self.simulations
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))
    }

    // Runs `work` on the manager's runtime. An error or panic escaping it
    // moves the simulation to `error`.
    fn supervise<F>(&self, id: &str, simulation: SharedSimulation, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task_id = id.to_string();
        let handle = self.runtime.spawn(async move {
            let failure = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("background task panicked: {}", panic_message(panic.as_ref())),
            };

            let mut sim = write(&simulation);
            if sim.fail(failure.clone()) {
                error!(simulation_id = %task_id, error = %failure, "simulation failed");
            } else {
                warn!(simulation_id = %task_id, status = %sim.status, error = %failure, "background task failed after simulation finished");
            }
        });
        self.tasks.insert(id.to_string(), handle);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// Everything the run phase needs, detached from the manager.
struct SimulationRun {
    simulation: SharedSimulation,
    interviewer: Interviewer,
    aggregator: InsightAggregator,
    turn_delay: Duration,
}

impl SimulationRun {
    fn is_running(&self) -> bool {
        read(&self.simulation).status == SimulationStatus::Running
    }

    async fn execute(self) -> Result<()> {
        let (id, context, personas, max_turns) = {
            let sim = read(&self.simulation);
            (sim.id.clone(), sim.context.clone(), sim.personas.clone(), sim.max_turns)
        };

        // 1. Open every conversation before any of them is driven
        let mut opened = Vec::with_capacity(personas.len());
        for persona in personas {
            if !self.is_running() {
                info!(simulation_id = %id, "stop requested while opening conversations");
                break;
            }
            let conversation = self.interviewer.open(&context, &persona).await;
            write(&self.simulation).upsert_conversation(conversation.clone());
            opened.push((persona, conversation));
        }
        info!(simulation_id = %id, conversations = opened.len(), "conversations opened");

        // 2. One task per persona; dropping the set aborts stragglers
        let mut dialogues = JoinSet::new();
        for (persona, conversation) in opened {
            dialogues.spawn(drive_conversation(
                self.simulation.clone(),
                self.interviewer.clone(),
                context.clone(),
                persona,
                conversation,
                max_turns,
                self.turn_delay,
            ));
        }

        let mut first_failure = None;
        while let Some(joined) = dialogues.join_next().await {
            if let Err(e) = joined {
                error!(simulation_id = %id, error = %e, "conversation task died");
                first_failure.get_or_insert(DiscoveryError::Internal(format!("conversation task failed: {e}")));
            }
        }
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        // 3. Aggregate once all dialogues are done
        let raw = read(&self.simulation).raw_insights();
        let insights = self.aggregator.aggregate(&raw, &context).await;

        let mut sim = write(&self.simulation);
        sim.aggregated_insights = insights;
        if sim.status == SimulationStatus::Running {
            sim.transition(SimulationStatus::Completed)?;
        }
        info!(simulation_id = %id, themes = sim.aggregated_insights.len(), "simulation completed");
        Reporter::log_summary(&sim);
        Ok(())
    }
}

async fn drive_conversation(
    simulation: SharedSimulation,
    interviewer: Interviewer,
    context: String,
    persona: Persona,
    mut conversation: Conversation,
    max_turns: usize,
    turn_delay: Duration,
) {
    for _ in 0..max_turns {
        let running = read(&simulation).status == SimulationStatus::Running;
        if !running || !conversation.is_active {
            break;
        }

        interviewer.advance(&mut conversation, &context, &persona).await;
        if conversation.due_for_insights() {
            conversation.insights = interviewer.extract_insights(&conversation, &context).await;
        }
        write(&simulation).upsert_conversation(conversation.clone());

        if !turn_delay.is_zero() {
            tokio::time::sleep(turn_delay).await;
        }
    }

    let summary = interviewer.summarize(&conversation, &context).await;
    conversation.set_summary(summary);
    conversation.finish();
    write(&simulation).upsert_conversation(conversation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingBrain, ScriptedBrain};

    fn settings() -> SimulationConfig {
        SimulationConfig {
            turn_delay_ms: 0,
            ..SimulationConfig::default()
        }
    }

    fn manager(brain: impl TextGenerator + 'static) -> SimulationManager {
        SimulationManager::new(Arc::new(brain), settings(), Handle::current())
    }

    #[tokio::test]
    async fn create_rejects_invalid_parameters() {
        let manager = manager(ScriptedBrain::default());
        for (context, personas, turns) in [("ctx", 0, 3), ("ctx", 21, 3), ("ctx", 2, 0), ("ctx", 2, 51), ("   ", 2, 3)] {
            assert!(
                matches!(manager.create(context, personas, turns), Err(DiscoveryError::Validation(_))),
                "({context:?}, {personas}, {turns}) should be rejected"
            );
        }
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn create_generates_personas_then_waits_for_start() {
        let manager = manager(ScriptedBrain::default());
        let id = manager.create("dog walking app", 3, 2).unwrap();
        manager.wait(&id).await;

        let sim = manager.get_simulation(&id).unwrap();
        assert_eq!(sim.status, SimulationStatus::Ready);
        assert_eq!(sim.personas.len(), 3);
        assert!(sim.conversations.is_empty());
        assert!(!manager.stop(&id));
        assert_eq!(manager.get_summary(&id).unwrap().status, SimulationStatus::Ready);
    }

    #[tokio::test]
    async fn full_run_completes_with_summaries() {
        let manager = manager(ScriptedBrain::default());
        let id = manager.create("dog walking app", 2, 6).unwrap();
        manager.wait(&id).await;
        assert!(manager.start(&id));
        assert!(!manager.start(&id));
        manager.wait(&id).await;

        let sim = manager.get_simulation(&id).unwrap();
        assert_eq!(sim.status, SimulationStatus::Completed);
        assert!(sim.start_time.is_some() && sim.end_time.is_some());
        assert_eq!(sim.conversations.len(), 2);
        for conversation in &sim.conversations {
            assert_eq!(conversation.messages.len(), 7);
            assert!(!conversation.is_active);
            assert!(conversation.summary.is_some());
            assert!(!conversation.insights.is_empty());
        }
        assert_eq!(sim.aggregated_insights.len(), 1);

        let Some(Progress::Detailed(progress)) = manager.get_progress(&id) else {
            panic!("completed simulation must report detailed progress");
        };
        assert_eq!(progress.overall_progress, 100.0);
        assert_eq!(progress.total_messages, 14);
    }

    #[tokio::test]
    async fn later_extraction_replaces_earlier_insights() {
        let manager = manager(ScriptedBrain::default());
        let id = manager.create("dog walking app", 1, 7).unwrap();
        manager.wait(&id).await;
        assert!(manager.start(&id));
        manager.wait(&id).await;

        // 8 messages: extraction ran after the 6th and the 8th
        let conversations = manager.get_conversations(&id).unwrap();
        assert_eq!(conversations[0].messages.len(), 8);
        assert_eq!(
            conversations[0].insights,
            vec![
                "Extraction 2: midday walks are hard to arrange",
                "Trust matters more than price",
            ]
        );
    }

    #[tokio::test]
    async fn service_outage_still_completes() {
        let manager = manager(FailingBrain);
        let id = manager.create("tax software", 2, 3).unwrap();
        manager.wait(&id).await;
        assert_eq!(manager.get_summary(&id).unwrap().status, SimulationStatus::Ready);
        assert!(manager.start(&id));
        manager.wait(&id).await;

        let sim = manager.get_simulation(&id).unwrap();
        assert_eq!(sim.status, SimulationStatus::Completed);
        assert!(sim.error.is_none());
        assert!(sim.personas.iter().all(|p| p.name.starts_with("Sample ")));
    }

    #[tokio::test]
    async fn unknown_ids_report_not_found() {
        let manager = manager(ScriptedBrain::default());
        assert!(manager.get_simulation("nope").is_none());
        assert!(manager.get_personas("nope").is_none());
        assert!(manager.get_conversations("nope").is_none());
        assert!(manager.get_insights("nope").is_none());
        assert!(manager.get_progress("nope").is_none());
        assert!(!manager.start("nope"));
        assert!(!manager.stop("nope"));
        assert!(!manager.delete("nope"));
        assert!(matches!(manager.try_start("nope"), Err(DiscoveryError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_from_registry() {
        let manager = manager(ScriptedBrain::default());
        let id = manager.create("dog walking app", 1, 1).unwrap();
        assert!(manager.delete(&id));
        assert!(manager.get_simulation(&id).is_none());
        manager.wait(&id).await;
    }

    #[tokio::test]
    async fn supervisor_marks_failed_work_as_error() {
        let manager = manager(ScriptedBrain::default());
        let mut sim = Simulation::new("ctx", 1, 1);
        sim.transition(SimulationStatus::GeneratingPersonas).unwrap();
        let id = sim.id.clone();
        let shared = Arc::new(RwLock::new(sim));
        manager.simulations.insert(id.clone(), shared.clone());

        let trigger = "boom";
        manager.supervise(&id, shared, async move {
            if !trigger.is_empty() {
                panic!("{trigger}");
            }
            Ok::<(), DiscoveryError>(())
        });
        manager.wait(&id).await;

        let summary = manager.get_summary(&id).unwrap();
        assert_eq!(summary.status, SimulationStatus::Error);
        assert!(summary.error.unwrap().contains("boom"));
        assert!(summary.end_time.is_some());
    }
}
