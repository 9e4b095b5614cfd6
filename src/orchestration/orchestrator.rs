//! The coordinator process.
//!
//! The `Orchestrator` listens on the well-known control channels to keep its
//! [`RegistryStore`] current and drives workflow executions through the
//! [`WorkflowEngine`]. Step attempts run concurrently on a driver actor; each
//! one selects a running agent of the step's type and issues a request over
//! the orchestrator's own [`MessageBus`].
//!
//! Registry and engine state live behind `parking_lot` locks that are never
//! held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use super::health::{HealthConfig, HealthMonitor};
use super::registry::RegistryStore;
use super::scheduler::{StepDispatch, StepOutcome, WorkflowEngine};
use crate::actors::{self, ActorHandle};
use crate::agent::{AgentId, AgentMetadata};
use crate::bus::MessageBus;
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    channels, AgentMessage, ControlPayload, Deregistration, Heartbeat, MessageType, Registration,
};
use crate::transport::{Connection, Transport};
use crate::workflow::{ExecutionId, Workflow, WorkflowExecution};

/// Poll interval used by [`Orchestrator::await_execution`].
const AWAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Running {
    connection: Arc<dyn Connection>,
    dispatch_tx: mpsc::UnboundedSender<StepDispatch>,
    tasks: Vec<ActorHandle>,
}

pub struct Orchestrator {
    id: AgentId,
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
    registry: Arc<RwLock<RegistryStore>>,
    engine: Arc<RwLock<WorkflowEngine>>,
    running: Option<Running>,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: OrchestratorConfig) -> Self {
        Self {
            id: AgentId::from(config.orchestrator_id.as_str()),
            transport,
            config,
            registry: Arc::new(RwLock::new(RegistryStore::new())),
            engine: Arc::new(RwLock::new(WorkflowEngine::new())),
            running: None,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Connect and start the control listener, the step driver and, when
    /// `stale_after_ms` is set, the health monitor.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            debug!(orchestrator_id = %self.id, "start: already running");
            return Ok(());
        }

        self.config.validate()?;
        let connection = self.transport.connect().await?;
        let mut tasks = Vec::new();
        match self.bring_up(connection.clone(), &mut tasks).await {
            Ok(dispatch_tx) => {
                self.running = Some(Running {
                    connection,
                    dispatch_tx,
                    tasks,
                });
                info!(orchestrator_id = %self.id, "orchestrator started");
                Ok(())
            }
            Err(e) => {
                actors::shutdown_all(tasks).await;
                connection.close().await;
                error!(orchestrator_id = %self.id, error = %e, "orchestrator failed to start");
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        connection: Arc<dyn Connection>,
        tasks: &mut Vec<ActorHandle>,
    ) -> Result<mpsc::UnboundedSender<StepDispatch>> {
        let bus = MessageBus::new(self.id.clone(), connection);
        tasks.push(bus.listen_for_responses().await?);

        let registry = self.registry.clone();
        let control = [
            channels::REGISTER.to_string(),
            channels::DEREGISTER.to_string(),
            channels::HEARTBEAT.to_string(),
        ];
        tasks.push(
            bus.subscribe(&control, move |message| {
                let registry = registry.clone();
                async move { handle_control(&registry, &message) }
            })
            .await?,
        );

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        tasks.push(spawn_step_driver(
            bus,
            self.registry.clone(),
            self.engine.clone(),
            dispatch_rx,
        ));

        if let Some(stale_after) = self.config.stale_after() {
            let health = HealthConfig::new(stale_after)
                .with_check_interval(self.config.health_check_interval());
            tasks.push(HealthMonitor::new(health, self.registry.clone()).spawn());
        }

        Ok(dispatch_tx)
    }

    /// Stop every actor, then close the connection. In-flight steps are
    /// abandoned; their executions stay `running`.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        actors::shutdown_all(running.tasks).await;
        running.connection.close().await;
        info!(orchestrator_id = %self.id, "orchestrator stopped");
    }

    /// Validate and store a workflow template.
    pub fn register_workflow(&self, workflow: Workflow) -> Result<()> {
        self.engine.write().register(workflow)
    }

    /// Start a new execution of `workflow_id` and dispatch its root steps.
    pub fn execute_workflow(&self, workflow_id: &str) -> Result<ExecutionId> {
        let running = self.running.as_ref().ok_or(Error::NotRunning)?;
        let (execution_id, dispatches) = self.engine.write().start(workflow_id)?;
        for dispatch in dispatches {
            if running.dispatch_tx.send(dispatch).is_err() {
                warn!(%execution_id, "step driver is gone, dispatch dropped");
            }
        }
        Ok(execution_id)
    }

    /// Copy of the registry, keyed by agent id.
    pub fn get_registered_agents(&self) -> HashMap<AgentId, AgentMetadata> {
        self.registry.read().snapshot()
    }

    pub fn get_agents_by_type(&self, agent_type: &str) -> Vec<AgentMetadata> {
        self.registry.read().agents_by_type(agent_type)
    }

    pub fn get_execution_status(&self, execution_id: &ExecutionId) -> Option<WorkflowExecution> {
        self.engine.read().execution(execution_id)
    }

    pub fn list_workflows(&self) -> Vec<Workflow> {
        self.engine.read().workflows()
    }

    /// Wait until the execution is terminal or `timeout` elapses, and return
    /// its latest state either way.
    pub async fn await_execution(
        &self,
        execution_id: &ExecutionId,
        timeout: Duration,
    ) -> Result<WorkflowExecution> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let execution = self
                .get_execution_status(execution_id)
                .ok_or(Error::ExecutionNotFound(*execution_id))?;
            if execution.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(execution);
            }
            tokio::time::sleep(AWAIT_POLL_INTERVAL).await;
        }
    }
}

fn handle_control(registry: &RwLock<RegistryStore>, message: &AgentMessage) {
    match message.message_type() {
        MessageType::Register => match Registration::from_payload(message.payload()) {
            Ok(registration) => {
                registry.write().upsert(registration.metadata);
            }
            Err(e) => warn!(sender = %message.sender_id(), error = %e, "bad registration"),
        },
        MessageType::Deregister => match Deregistration::from_payload(message.payload()) {
            Ok(deregistration) => {
                if registry.write().remove(&deregistration.agent_id).is_none() {
                    debug!(agent_id = %deregistration.agent_id, "deregistration for unknown agent");
                }
            }
            Err(e) => warn!(sender = %message.sender_id(), error = %e, "bad deregistration"),
        },
        MessageType::Heartbeat => match Heartbeat::from_payload(message.payload()) {
            Ok(heartbeat) => registry.write().record_heartbeat(heartbeat),
            Err(e) => warn!(sender = %message.sender_id(), error = %e, "bad heartbeat"),
        },
        MessageType::Other(message_type) => {
            debug!(sender = %message.sender_id(), %message_type, "ignoring control message");
        }
    }
}

struct StepReport {
    execution_id: ExecutionId,
    step_id: String,
    outcome: StepOutcome,
}

/// Step attempts in flight on the driver, keyed by task id so a task that
/// dies before reporting can still be recorded against its step.
struct InFlight {
    tasks: JoinSet<StepReport>,
    steps: HashMap<task::Id, (ExecutionId, String)>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            steps: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn launch(
        &mut self,
        bus: &MessageBus,
        registry: &Arc<RwLock<RegistryStore>>,
        dispatch: StepDispatch,
    ) {
        let step = (dispatch.execution_id, dispatch.step_id.clone());
        let handle = self
            .tasks
            .spawn(run_step(bus.clone(), registry.clone(), dispatch));
        self.steps.insert(handle.id(), step);
    }

    /// Next finished attempt. A task that panicked or was aborted is
    /// reported as a failed attempt of its step.
    async fn next(&mut self) -> Option<StepReport> {
        loop {
            match self.tasks.join_next_with_id().await? {
                Ok((id, report)) => {
                    self.steps.remove(&id);
                    return Some(report);
                }
                Err(e) => {
                    if let Some(report) = self.joined_with_error(e) {
                        return Some(report);
                    }
                }
            }
        }
    }

    fn joined_with_error(&mut self, e: task::JoinError) -> Option<StepReport> {
        let cause = Error::TaskJoin(e.to_string());
        let Some((execution_id, step_id)) = self.steps.remove(&e.id()) else {
            error!(error = %cause, "untracked step task failed");
            return None;
        };
        error!(%execution_id, %step_id, error = %cause, "step task failed");
        Some(StepReport {
            execution_id,
            step_id,
            outcome: StepOutcome::Failed(cause.to_string()),
        })
    }

    fn abort_all(&mut self) {
        self.tasks.abort_all();
        self.steps.clear();
    }
}

fn spawn_step_driver(
    bus: MessageBus,
    registry: Arc<RwLock<RegistryStore>>,
    engine: Arc<RwLock<WorkflowEngine>>,
    mut dispatch_rx: mpsc::UnboundedReceiver<StepDispatch>,
) -> ActorHandle {
    ActorHandle::spawn("step-driver", move |cancel| async move {
        let mut in_flight = InFlight::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(in_flight = in_flight.len(), "step driver cancelled");
                    break;
                }
                Some(dispatch) = dispatch_rx.recv() => {
                    in_flight.launch(&bus, &registry, dispatch);
                }
                Some(report) = in_flight.next() => {
                    let recorded = engine
                        .write()
                        .record(&report.execution_id, &report.step_id, report.outcome);
                    match recorded {
                        Ok(next) => {
                            for dispatch in next {
                                in_flight.launch(&bus, &registry, dispatch);
                            }
                        }
                        Err(e) => warn!(
                            execution_id = %report.execution_id,
                            step_id = %report.step_id,
                            error = %e,
                            "could not record step outcome"
                        ),
                    }
                }
            }
        }
        in_flight.abort_all();
    })
}

async fn run_step(
    bus: MessageBus,
    registry: Arc<RwLock<RegistryStore>>,
    dispatch: StepDispatch,
) -> StepReport {
    let target = registry.write().select_instance(&dispatch.agent_type);
    let outcome = match target {
        None => StepOutcome::Failed(format!(
            "no running agent of type {}",
            dispatch.agent_type
        )),
        Some(agent_id) => {
            info!(
                execution_id = %dispatch.execution_id,
                step_id = %dispatch.step_id,
                %agent_id,
                attempt = dispatch.attempt,
                "dispatching step"
            );
            let response = bus
                .send_request(
                    &agent_id,
                    dispatch.message_type.clone(),
                    dispatch.payload.clone(),
                    dispatch.timeout,
                )
                .await;
            match response {
                Some(response) if response.is_success() => {
                    StepOutcome::Succeeded(response.into_result().unwrap_or(Value::Null))
                }
                Some(response) => StepOutcome::Failed(
                    response
                        .error()
                        .unwrap_or("step failed without an error message")
                        .to_string(),
                ),
                None => StepOutcome::Failed(format!(
                    "no response from {} within {:?}",
                    agent_id, dispatch.timeout
                )),
            }
        }
    };
    StepReport {
        execution_id: dispatch.execution_id,
        step_id: dispatch.step_id,
        outcome,
    }
}
