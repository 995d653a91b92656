//! Declarative route synchronization.
//!
//! # Data Flow
//! ```text
//! Desired-state source (file watcher, controller adapter, ...)
//!     → mpsc::Sender<DesiredStateEvent>
//!     → Reconciler::run
//!         → RoutingTable::upsert_by_external_id / remove_by_external_id
//!         → BackendManager::sync_service (per touched service)
//! ```
//!
//! # Design Decisions
//! - One tagged event stream instead of add/update/delete callbacks
//! - The core knows nothing about the transport that produces events
//! - Deleting an unknown id is success: the table is already converged

pub mod events;
pub mod reconciler;

pub use events::DesiredStateEvent;
pub use reconciler::{converge_backends, ReconcileOutcome, Reconciler};
