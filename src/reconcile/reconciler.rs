//! The reconciliation loop.
//!
//! # Responsibilities
//! - Consume desired-state events from one channel
//! - Converge the routing table by external identifier
//! - Keep each touched service's backend set equal to what its routes declare

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::load_balancer::BackendManager;
use crate::observability::metrics;
use crate::reconcile::events::DesiredStateEvent;
use crate::routing::{Route, RoutingError, RoutingTable, UpsertOutcome};

/// What applying one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created(Arc<Route>),
    Updated(Arc<Route>),
    Unchanged(Arc<Route>),
    Deleted(Arc<Route>),
    /// Delete for an id that is not present; already converged.
    Absent,
}

impl ReconcileOutcome {
    fn kind(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created(_) => "created",
            ReconcileOutcome::Updated(_) => "updated",
            ReconcileOutcome::Unchanged(_) => "unchanged",
            ReconcileOutcome::Deleted(_) => "deleted",
            ReconcileOutcome::Absent => "absent",
        }
    }
}

impl From<UpsertOutcome> for ReconcileOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Created(r) => ReconcileOutcome::Created(r),
            UpsertOutcome::Updated(r) => ReconcileOutcome::Updated(r),
            UpsertOutcome::Unchanged(r) => ReconcileOutcome::Unchanged(r),
        }
    }
}

/// Make `service`'s node set the union of the backends of its enabled routes.
pub fn converge_backends(table: &RoutingTable, backends: &BackendManager, service: &str) {
    let declared: BTreeSet<String> = table
        .routes_for_service(service)
        .iter()
        .filter(|r| r.enabled)
        .flat_map(|r| r.backends.iter().cloned())
        .collect();
    backends.sync_service(service, &declared);
}

/// Applies desired-state events to the routing table and backend pools.
#[derive(Debug, Clone)]
pub struct Reconciler {
    table: Arc<RoutingTable>,
    backends: Arc<BackendManager>,
}

impl Reconciler {
    pub fn new(table: Arc<RoutingTable>, backends: Arc<BackendManager>) -> Self {
        Self { table, backends }
    }

    /// Apply one event. Replaying an event yields the same table.
    pub fn apply(&self, event: DesiredStateEvent) -> Result<ReconcileOutcome, RoutingError> {
        let outcome = match event {
            DesiredStateEvent::Upsert(spec) => {
                let previous_service = spec
                    .external_id
                    .as_deref()
                    .and_then(|ext| self.table.get_by_external_id(ext))
                    .map(|r| r.service.clone());

                let outcome = ReconcileOutcome::from(self.table.upsert_by_external_id(spec)?);
                if let ReconcileOutcome::Created(route) | ReconcileOutcome::Updated(route) = &outcome {
                    converge_backends(&self.table, &self.backends, &route.service);
                    if let Some(prev) = previous_service.filter(|p| *p != route.service) {
                        converge_backends(&self.table, &self.backends, &prev);
                    }
                }
                outcome
            }
            DesiredStateEvent::Delete { external_id } => {
                match self.table.remove_by_external_id(&external_id) {
                    Some(route) => {
                        converge_backends(&self.table, &self.backends, &route.service);
                        ReconcileOutcome::Deleted(route)
                    }
                    None => ReconcileOutcome::Absent,
                }
            }
        };

        metrics::record_reconcile_event(outcome.kind());
        match &outcome {
            ReconcileOutcome::Created(r) | ReconcileOutcome::Updated(r) | ReconcileOutcome::Deleted(r) => {
                tracing::info!(
                    external_id = r.external_id.as_deref().unwrap_or_default(),
                    service = %r.service,
                    path = %r.path,
                    outcome = outcome.kind(),
                    "Route reconciled"
                );
            }
            ReconcileOutcome::Unchanged(_) | ReconcileOutcome::Absent => {
                tracing::debug!(outcome = outcome.kind(), "Route already converged");
            }
        }
        Ok(outcome)
    }

    /// Consume events until the channel closes or shutdown fires.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<DesiredStateEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Reconciler starting");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Desired-state channel closed, reconciler exiting");
                        break;
                    };
                    let external_id = event.external_id().map(str::to_string);
                    if let Err(e) = self.apply(event) {
                        metrics::record_reconcile_event("rejected");
                        tracing::warn!(
                            external_id = external_id.as_deref().unwrap_or_default(),
                            error = %e,
                            "Desired-state event rejected"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
