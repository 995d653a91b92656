//! Per-service connection pool.
//!
//! Channels are created lazily on first use and cached by service name. A
//! cached channel whose state is no longer usable is replaced on the next
//! request. Creation is double-checked: a read-locked lookup first, then the
//! service's slot is write-locked and re-checked before dialling, so racing
//! callers never connect twice.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::proxy::channel::{CallMetadata, Channel, ChannelError, Connector, ProxyRequest, ProxyResponse};
use crate::resilience::Deadline;

type Slot = tokio::sync::RwLock<Option<Arc<dyn Channel>>>;

/// Cache of channels keyed by service name.
#[derive(Debug)]
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    /// Held only for map lookups, never across an await.
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, service: &str) -> Arc<Slot> {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(service) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::RwLock::new(None)))
            .clone()
    }

    /// Cached channel for `service`, (re)created when missing or unhealthy.
    pub async fn get_connection(&self, service: &str) -> Result<Arc<dyn Channel>, ChannelError> {
        let slot = self.slot(service);

        {
            let cached = slot.read().await;
            if let Some(channel) = cached.as_ref().filter(|c| c.state().is_usable()) {
                return Ok(channel.clone());
            }
        }

        let mut cached = slot.write().await;
        if let Some(channel) = cached.as_ref() {
            if channel.state().is_usable() {
                return Ok(channel.clone());
            }
            tracing::info!(service = %service, state = ?channel.state(), "Replacing unhealthy channel");
            channel.close();
        }

        let channel = self.connector.connect(service).await?;
        tracing::debug!(service = %service, "Channel created");
        *cached = Some(channel.clone());
        Ok(channel)
    }

    /// Forward `request` to the node `target` of `service`.
    ///
    /// Connection setup and the call share one deadline; expiry drops the
    /// in-flight attempt and reports [`ChannelError::Timeout`].
    pub async fn proxy_request(
        &self,
        service: &str,
        target: &str,
        request: ProxyRequest,
        metadata: CallMetadata,
        deadline: Deadline,
    ) -> Result<ProxyResponse, ChannelError> {
        let timed_out = |_| ChannelError::Timeout(deadline.budget());

        let channel = deadline.run(self.get_connection(service)).await.map_err(timed_out)??;
        deadline
            .run(channel.invoke(target, request, metadata))
            .await
            .map_err(timed_out)?
    }

    /// Close and forget every pooled channel.
    pub async fn close(&self) {
        let drained: Vec<(String, Arc<Slot>)> = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (service, slot) in drained {
            if let Some(channel) = slot.write().await.take() {
                channel.close();
                tracing::debug!(service = %service, "Channel closed");
            }
        }
        tracing::info!("Connection pool closed");
    }

    /// Reachability per pooled service, from each cached channel's state.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut health = HashMap::with_capacity(slots.len());
        for (service, slot) in slots {
            let healthy = slot
                .read()
                .await
                .as_ref()
                .is_some_and(|c| c.state().is_usable());
            health.insert(service, healthy);
        }
        health
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::channel::ChannelState;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, StatusCode};
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct MockChannel {
        state: AtomicU8,
        delay: Duration,
    }

    impl Channel for MockChannel {
        fn state(&self) -> ChannelState {
            ChannelState::from(self.state.load(Ordering::SeqCst))
        }

        fn invoke(
            &self,
            target: &str,
            _request: ProxyRequest,
            metadata: CallMetadata,
        ) -> BoxFuture<'_, Result<ProxyResponse, ChannelError>> {
            let body = format!("{}|{}", target, metadata.user_id.unwrap_or_default());
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(ProxyResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: Bytes::from(body),
                })
            })
        }

        fn close(&self) {
            self.state.store(ChannelState::Shutdown as u8, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default)]
    struct MockConnector {
        connects: AtomicUsize,
        delay: Duration,
        created: std::sync::Mutex<Vec<Arc<MockChannel>>>,
    }

    impl Connector for MockConnector {
        fn connect(&self, _service: &str) -> BoxFuture<'_, Result<Arc<dyn Channel>, ChannelError>> {
            Box::pin(async move {
                self.connects.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                let channel = Arc::new(MockChannel {
                    state: AtomicU8::new(ChannelState::Ready as u8),
                    delay: self.delay,
                });
                self.created.lock().unwrap().push(channel.clone());
                Ok(channel as Arc<dyn Channel>)
            })
        }
    }

    #[tokio::test]
    async fn test_connection_reused() {
        let connector = Arc::new(MockConnector::default());
        let pool = ConnectionPool::new(connector.clone());

        pool.get_connection("orders").await.unwrap();
        pool.get_connection("orders").await.unwrap();
        pool.get_connection("catalog").await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_connects_once() {
        let connector = Arc::new(MockConnector::default());
        let pool = Arc::new(ConnectionPool::new(connector.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.get_connection("orders").await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_channel_recreated() {
        let connector = Arc::new(MockConnector::default());
        let pool = ConnectionPool::new(connector.clone());

        pool.get_connection("orders").await.unwrap();
        connector.created.lock().unwrap()[0]
            .state
            .store(ChannelState::TransientFailure as u8, Ordering::SeqCst);
        assert_eq!(pool.health_check().await.get("orders"), Some(&false));

        pool.get_connection("orders").await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        // The replaced channel was closed
        assert_eq!(
            connector.created.lock().unwrap()[0].state(),
            ChannelState::Shutdown
        );
        assert_eq!(pool.health_check().await.get("orders"), Some(&true));
    }

    #[tokio::test]
    async fn test_proxy_request_forwards_metadata() {
        let pool = ConnectionPool::new(Arc::new(MockConnector::default()));
        let meta = CallMetadata {
            user_id: Some("u1".into()),
            ..Default::default()
        };

        let resp = pool
            .proxy_request(
                "orders",
                "10.0.0.1:80",
                ProxyRequest::new(Method::GET, "/"),
                meta,
                Deadline::after(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert_eq!(resp.body, Bytes::from("10.0.0.1:80|u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_request_times_out() {
        let connector = Arc::new(MockConnector {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let pool = ConnectionPool::new(connector);

        let err = pool
            .proxy_request(
                "slow",
                "10.0.0.1:80",
                ProxyRequest::new(Method::GET, "/"),
                CallMetadata::default(),
                Deadline::after(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_close_releases_everything() {
        let connector = Arc::new(MockConnector::default());
        let pool = ConnectionPool::new(connector.clone());
        pool.get_connection("a").await.unwrap();
        pool.get_connection("b").await.unwrap();

        pool.close().await;

        assert!(pool.is_empty());
        assert!(pool.health_check().await.is_empty());
        for channel in connector.created.lock().unwrap().iter() {
            assert_eq!(channel.state(), ChannelState::Shutdown);
        }
    }
}
