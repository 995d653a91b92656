//! Declared-routes file watcher.
//!
//! Turns a TOML file of `[[routes]]` (each with an `external_id`) into a
//! stream of desired-state events. Every reload is diffed against the last
//! accepted declaration set: new or changed ids produce `Upsert`, ids that
//! disappeared produce `Delete`.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::config::loader::ConfigError;
use crate::reconcile::DesiredStateEvent;
use crate::routing::RouteSpec;

/// Contents of a declared-routes file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeclaredRoutes {
    /// Source label stamped on every route.
    pub source: String,
    pub routes: Vec<RouteSpec>,
}

impl Default for DeclaredRoutes {
    fn default() -> Self {
        Self {
            source: "file".to_string(),
            routes: Vec::new(),
        }
    }
}

impl DeclaredRoutes {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Routes keyed by external id, stamped with the source label.
    /// Entries without an id are skipped; a repeated id keeps the last entry.
    pub fn by_external_id(self) -> BTreeMap<String, RouteSpec> {
        let mut declared = BTreeMap::new();
        for mut spec in self.routes {
            let Some(id) = spec.external_id.clone().filter(|id| !id.trim().is_empty()) else {
                tracing::warn!(path = %spec.path, "Declared route without external_id skipped");
                continue;
            };
            spec.source = Some(self.source.clone());
            if declared.insert(id.clone(), spec).is_some() {
                tracing::warn!(external_id = %id, "Duplicate external_id in declared routes, last entry wins");
            }
        }
        declared
    }
}

/// Events that move `previous` to `next`.
pub fn diff(
    previous: &BTreeMap<String, RouteSpec>,
    next: &BTreeMap<String, RouteSpec>,
) -> Vec<DesiredStateEvent> {
    let upserts = next
        .iter()
        .filter(|(id, spec)| previous.get(*id) != Some(*spec))
        .map(|(_, spec)| DesiredStateEvent::Upsert(spec.clone()));
    let deletes = previous
        .keys()
        .filter(|id| !next.contains_key(*id))
        .map(|id| DesiredStateEvent::delete(id.clone()));
    upserts.chain(deletes).collect()
}

/// Watches a declared-routes file and feeds the reconciler.
pub struct RoutesFileWatcher {
    path: PathBuf,
    events: mpsc::Sender<DesiredStateEvent>,
    known: BTreeMap<String, RouteSpec>,
}

impl RoutesFileWatcher {
    pub fn new(path: &Path, events: mpsc::Sender<DesiredStateEvent>) -> Self {
        Self {
            path: path.to_path_buf(),
            events,
            known: BTreeMap::new(),
        }
    }

    /// Reload the file and send the difference. Returns the number of events sent.
    pub async fn sync(&mut self) -> Result<usize, ConfigError> {
        let next = DeclaredRoutes::load(&self.path)?.by_external_id();
        let events = diff(&self.known, &next);
        let count = events.len();
        for event in events {
            if self.events.send(event).await.is_err() {
                tracing::warn!("Desired-state channel closed, dropping declared-route events");
                break;
            }
        }
        self.known = next;
        Ok(count)
    }

    /// Sync once, then on every file change until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), notify::Error> {
        let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let _ = changed_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Declared-routes watcher started");

        self.sync_logged().await;
        loop {
            tokio::select! {
                Some(()) = changed_rx.recv() => {
                    // Coalesce bursts of events from one save
                    while changed_rx.try_recv().is_ok() {}
                    tracing::info!(path = ?self.path, "Declared-routes file change detected, reloading...");
                    self.sync_logged().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Declared-routes watcher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn sync_logged(&mut self) {
        match self.sync().await {
            Ok(count) => tracing::info!(events = count, "Declared routes synced"),
            Err(e) => tracing::error!(
                error = %e,
                "Failed to load declared routes. Keeping current declarations."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
source = "gitops"

[[routes]]
external_id = "orders"
path = "/orders/*"
method = "*"
service = "orders"
backends = ["10.0.0.1:80"]

[[routes]]
external_id = "catalog"
path = "/catalog"
method = "GET"
service = "catalog"
backends = "10.0.0.2:80"
"#;

    #[test]
    fn test_parse_stamps_source() {
        let declared = DeclaredRoutes::parse(FILE).unwrap().by_external_id();
        assert_eq!(declared.len(), 2);
        assert_eq!(declared["orders"].source.as_deref(), Some("gitops"));
    }

    #[test]
    fn test_diff() {
        let first = DeclaredRoutes::parse(FILE).unwrap().by_external_id();
        let events = diff(&BTreeMap::new(), &first);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, DesiredStateEvent::Upsert(_))));

        // Unchanged declarations produce nothing
        assert!(diff(&first, &first).is_empty());

        let mut second = first.clone();
        second.remove("catalog");
        if let Some(orders) = second.get_mut("orders") {
            orders.backends = vec!["10.0.0.3:80".into()];
        }
        let events = diff(&first, &second);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], DesiredStateEvent::Upsert(s) if s.backends == ["10.0.0.3:80"]));
        assert_eq!(events[1], DesiredStateEvent::delete("catalog"));
    }

    #[test]
    fn test_entries_without_id_skipped() {
        let declared = DeclaredRoutes::parse(
            "[[routes]]\npath = \"/x\"\nmethod = \"GET\"\nservice = \"s\"\nbackends = \"h:1\"\n",
        )
        .unwrap()
        .by_external_id();
        assert!(declared.is_empty());
    }

    #[tokio::test]
    async fn test_sync_sends_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.toml");
        fs::write(&path, FILE).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut watcher = RoutesFileWatcher::new(&path, tx);
        assert_eq!(watcher.sync().await.unwrap(), 2);
        assert_eq!(watcher.sync().await.unwrap(), 0);

        fs::write(&path, "source = \"gitops\"\n").unwrap();
        assert_eq!(watcher.sync().await.unwrap(), 2);

        let mut deletes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, DesiredStateEvent::Delete { .. }) {
                deletes += 1;
            }
        }
        assert_eq!(deletes, 2);

        // A broken file keeps the last declarations
        fs::write(&path, "routes = 5").unwrap();
        assert!(watcher.sync().await.is_err());
        assert!(watcher.known.is_empty());
    }
}
