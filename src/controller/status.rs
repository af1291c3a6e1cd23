//! Phase persistence for Elasticsearch resources
//!
//! Every phase change re-reads the latest object, runs the lifecycle state
//! machine and writes the status guarded by the resourceVersion it read.

use chrono::Utc;
use tracing::{debug, info};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{
    LifecycleEvent, LifecycleState, LifecycleStateMachine, TransitionContext, TransitionResult,
};
use crate::crd::{Elasticsearch, ElasticsearchStatus};

/// Status manager for a single Elasticsearch resource
pub struct StatusManager<'a> {
    ctx: &'a Context,
    namespace: &'a str,
    name: &'a str,
    machine: LifecycleStateMachine,
}

impl<'a> StatusManager<'a> {
    pub fn new(ctx: &'a Context, namespace: &'a str, name: &'a str) -> Self {
        Self {
            ctx,
            namespace,
            name,
            machine: LifecycleStateMachine::new(),
        }
    }

    /// Re-fetch the resource by identity
    pub async fn fetch(&self) -> Result<Elasticsearch> {
        self.ctx
            .control_plane
            .get_instance(self.namespace, self.name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Elasticsearch {}/{}", self.namespace, self.name))
            })
    }

    /// Apply a lifecycle event to the latest copy of the resource
    ///
    /// A transition that is not valid from the current phase leaves the
    /// resource untouched, so a phase never moves backwards.
    pub async fn apply(&self, event: LifecycleEvent) -> Result<Elasticsearch> {
        let current = self.fetch().await?;
        let state = LifecycleState::from(current.phase());
        let tctx = TransitionContext {
            has_snapshot_source: current.snapshot_source().is_some(),
        };

        match self.machine.transition(state, event, &tctx) {
            TransitionResult::Success {
                from,
                to,
                event,
                description,
            } => {
                let previous = current.status.clone().unwrap_or_default();
                let status = ElasticsearchStatus {
                    creation_time: previous
                        .creation_time
                        .or_else(|| Some(Utc::now().to_rfc3339())),
                    phase: to.phase(),
                    reason: Some(description.to_string()),
                };
                let updated = self
                    .ctx
                    .control_plane
                    .patch_instance_status(
                        self.namespace,
                        self.name,
                        current.metadata.resource_version.clone(),
                        &status,
                    )
                    .await?;
                info!(
                    name = %self.name,
                    namespace = %self.namespace,
                    %from,
                    %to,
                    %event,
                    "phase transition"
                );
                Ok(updated)
            }
            TransitionResult::InvalidTransition { current: state, event } => {
                debug!(
                    name = %self.name,
                    namespace = %self.namespace,
                    %state,
                    %event,
                    "transition not applicable, keeping phase"
                );
                Ok(current)
            }
            TransitionResult::GuardFailed { reason, .. } => Err(Error::ValidationError(reason)),
        }
    }
}
