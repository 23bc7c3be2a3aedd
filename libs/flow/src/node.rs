//! Graph nodes and the per-node task that drives a component.
//!
//! Each component node owns exactly one task. The task invokes `run` once and,
//! concurrently, drains the node's coalescing mailbox into `update`. Health is
//! tracked separately for evaluation, run and update so that one failure mode
//! never masks another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conflux_id::{ComponentId, NodePath, TaskId};
use conflux_value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::mailbox::Mailbox;
use crate::{Component, Health, HealthType, RunContext};

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    /// Not yet started.
    Created,
    /// `run` is executing and no update is in flight.
    Running,
    /// An update is being applied.
    Updating,
    /// `run` returned.
    Exited,
    /// The node was removed from the graph.
    Removed,
}

/// Queue of nodes whose exports or failing status changed.
#[derive(Clone)]
pub(crate) struct UpdateQueue {
    tx: mpsc::UnboundedSender<ComponentId>,
}

impl UpdateQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ComponentId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn notify(&self, id: &ComponentId) {
        // The controller may already be gone during shutdown.
        let _ = self.tx.send(id.clone());
    }
}

struct NodeState {
    arguments: Value,
    exports: Value,
    phase: NodePhase,
    eval_health: Health,
    run_health: Health,
    update_health: Option<Health>,
    degraded: Option<Health>,
    last_evaluated: Option<DateTime<Utc>>,
    failing: bool,
    runtime: Option<Runtime>,
}

struct Runtime {
    task_id: TaskId,
    /// Dropped when the task ends; components hold an exports handle back to
    /// their node.
    component: Option<Arc<dyn Component>>,
    mailbox: Arc<Mailbox<Value>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// A node of the component graph.
///
/// Nodes survive reloads as long as their identity and role stay the same,
/// which keeps their task and internal state.
pub(crate) struct Node {
    id: ComponentId,
    path: NodePath,
    kind: String,
    state: Mutex<NodeState>,
}

impl Node {
    pub(crate) fn new(id: ComponentId, path: NodePath, exports: Value) -> Self {
        let kind = id.kind();
        Self {
            id,
            path,
            kind,
            state: Mutex::new(NodeState {
                arguments: Value::Null,
                exports,
                phase: NodePhase::Created,
                eval_health: Health::default(),
                run_health: Health::unknown("component not started"),
                update_health: None,
                degraded: None,
                last_evaluated: None,
                failing: false,
                runtime: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> &ComponentId {
        &self.id
    }

    pub(crate) fn path(&self) -> &NodePath {
        &self.path
    }

    pub(crate) fn kind(&self) -> &str {
        &self.kind
    }

    pub(crate) fn arguments(&self) -> Value {
        self.state.lock().arguments.clone()
    }

    pub(crate) fn exports(&self) -> Value {
        self.state.lock().exports.clone()
    }

    pub(crate) fn phase(&self) -> NodePhase {
        self.state.lock().phase
    }

    pub(crate) fn last_evaluated(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_evaluated
    }

    pub(crate) fn is_started(&self) -> bool {
        self.state.lock().runtime.is_some()
    }

    /// Stores exports. Returns true if they differ from the current ones.
    pub(crate) fn set_exports(&self, exports: Value) -> bool {
        let mut state = self.state.lock();
        if state.exports == exports {
            return false;
        }
        state.exports = exports;
        true
    }

    /// Records a completed evaluation.
    pub(crate) fn set_evaluated(&self, health: Health) {
        let mut state = self.state.lock();
        state.eval_health = health;
        state.last_evaluated = Some(Utc::now());
    }

    pub(crate) fn set_degraded(&self, degraded: Option<Health>) {
        let mut state = self.state.lock();
        let unchanged = match (&state.degraded, &degraded) {
            (Some(a), Some(b)) => a.message == b.message,
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            state.degraded = degraded;
        }
    }

    /// Marks a synchronous node (argument, export, declare) as live.
    pub(crate) fn mark_ready(&self) {
        let mut state = self.state.lock();
        if state.phase == NodePhase::Created {
            state.phase = NodePhase::Running;
            state.run_health = Health::healthy("node ready");
        }
    }

    /// Applies new arguments.
    ///
    /// A started node receives them through its mailbox; nothing is posted
    /// when they equal the current arguments. Returns true if they changed.
    pub(crate) fn apply_arguments(&self, args: Value) -> bool {
        let mut state = self.state.lock();
        if state.arguments == args {
            return false;
        }
        state.arguments = args.clone();
        if let Some(runtime) = &state.runtime {
            runtime.mailbox.post(args);
        }
        true
    }

    /// Re-delivers the current arguments to the component.
    pub(crate) fn repost_arguments(&self) {
        let state = self.state.lock();
        if let Some(runtime) = &state.runtime {
            runtime.mailbox.post(state.arguments.clone());
        }
    }

    /// Combined health of the node.
    ///
    /// Component-reported health replaces the default run health unless the
    /// component has exited.
    pub(crate) fn health(&self) -> Health {
        let (component, mut parts) = {
            let state = self.state.lock();
            let component = state.runtime.as_ref().and_then(|r| r.component.clone());
            let mut parts = vec![state.eval_health.clone(), state.run_health.clone()];
            parts.extend(state.update_health.clone());
            parts.extend(state.degraded.clone());
            (component, parts)
        };

        if parts[1].health != HealthType::Exited {
            if let Some(reported) = component.and_then(|c| c.current_health()) {
                parts[1] = reported;
            }
        }

        Health::least_healthy(&parts).cloned().unwrap_or_default()
    }

    /// Recomputes whether the node is failing. Returns true if that flipped.
    pub(crate) fn refresh_failing(&self) -> bool {
        let failing = self.health().health.is_failing();
        let mut state = self.state.lock();
        let flipped = state.failing != failing;
        state.failing = failing;
        flipped
    }

    pub(crate) fn is_failing(&self) -> bool {
        self.state.lock().failing
    }

    /// Starts the node's task.
    pub(crate) fn start(self: &Arc<Self>, component: Arc<dyn Component>, queue: UpdateQueue) {
        let task_id = TaskId::new();
        let mailbox = Arc::new(Mailbox::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let mut state = self.state.lock();
            state.phase = NodePhase::Running;
            state.run_health = Health::healthy("started component");
            state.runtime = Some(Runtime {
                task_id,
                component: Some(Arc::clone(&component)),
                mailbox: Arc::clone(&mailbox),
                shutdown_tx,
                handle: None,
            });
        }

        let span = tracing::info_span!("node", node_id = %self.path, task_id = %task_id);
        let handle = tokio::spawn(
            drive(Arc::clone(self), component, mailbox, shutdown_rx, queue).instrument(span),
        );
        if let Some(runtime) = self.state.lock().runtime.as_mut() {
            runtime.handle = Some(handle);
        }

        info!(node_id = %self.path, task_id = %task_id, "Started node task");
    }

    /// Signals the node's task to stop and takes its join handle.
    pub(crate) fn stop(&self) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock();
        let runtime = state.runtime.as_mut()?;
        let _ = runtime.shutdown_tx.send(true);
        debug!(node_id = %self.path, task_id = %runtime.task_id, "Signalled node task");
        runtime.handle.take()
    }

    /// Marks the node removed and signals its task.
    ///
    /// The caller owns the returned handle and decides how long to wait.
    pub(crate) fn remove(&self) -> Option<JoinHandle<()>> {
        self.state.lock().phase = NodePhase::Removed;
        self.stop()
    }

    fn set_phase(&self, phase: NodePhase) {
        let mut state = self.state.lock();
        if !matches!(state.phase, NodePhase::Removed | NodePhase::Exited) {
            state.phase = phase;
        }
    }

    fn set_run_exited(&self, health: Health) {
        let mut state = self.state.lock();
        state.run_health = health;
        if let Some(runtime) = state.runtime.as_mut() {
            runtime.component = None;
        }
        if state.phase != NodePhase::Removed {
            state.phase = NodePhase::Exited;
        }
    }

    fn set_update_health(&self, health: Health) {
        self.state.lock().update_health = Some(health);
    }
}

/// Body of a node task.
async fn drive(
    node: Arc<Node>,
    component: Arc<dyn Component>,
    mailbox: Arc<Mailbox<Value>>,
    shutdown: watch::Receiver<bool>,
    queue: UpdateQueue,
) {
    let run = component.run(RunContext {
        shutdown: shutdown.clone(),
    });
    tokio::pin!(run);

    let updater = update_loop(&node, component.as_ref(), &mailbox, shutdown, &queue);
    tokio::pin!(updater);

    let result = tokio::select! {
        result = &mut run => result,
        // The updater only finishes on cancellation; run still owns the node
        // until it returns.
        _ = &mut updater => run.await,
    };

    match result {
        Ok(()) => {
            info!(node_id = %node.path, "Component exited");
            node.set_run_exited(Health::new(
                HealthType::Exited,
                "component shut down normally",
            ));
        }
        Err(e) => {
            error!(node_id = %node.path, error = %e, "Component exited with error");
            node.set_run_exited(Health::new(
                HealthType::Exited,
                format!("component shut down with error: {e}"),
            ));
        }
    }

    if node.refresh_failing() {
        queue.notify(&node.id);
    }
}

async fn update_loop(
    node: &Node,
    component: &dyn Component,
    mailbox: &Mailbox<Value>,
    mut shutdown: watch::Receiver<bool>,
    queue: &UpdateQueue,
) {
    loop {
        let args = tokio::select! {
            biased;

            _ = shutdown.wait_for(|stop| *stop) => return,
            args = mailbox.recv() => args,
        };

        node.set_phase(NodePhase::Updating);
        let result = tokio::select! {
            biased;

            _ = shutdown.wait_for(|stop| *stop) => return,
            result = component.update(args) => result,
        };
        node.set_phase(NodePhase::Running);

        match result {
            Ok(()) => {
                debug!(node_id = %node.path, "Applied update");
                node.set_update_health(Health::healthy("updated component"));
            }
            Err(e) => {
                warn!(node_id = %node.path, error = %e, "Failed to apply update");
                node.set_update_health(Health::unhealthy(format!(
                    "failed to update component: {e}"
                )));
            }
        }

        if node.refresh_failing() {
            queue.notify(&node.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
