//! Membership and the fault shell, router half.
//!
//! The [`Cluster`] owns the in-memory placement ring, the per-server
//! clients and the per-server circuit breakers. Two background loops
//! keep it honest: the ring-refresh loop re-derives the active set
//! from the server registry, and the connection-health loop redials
//! clients whose transport has gone bad.
//!
//! Lock discipline: the ring, the client map and the breaker map each
//! sit behind their own reader-writer lock. Lookups take shared locks
//! and observe a self-consistent snapshot; membership changes take the
//! write locks and swap entries atomically. Locks are never held
//! across awaits.

mod client;

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use sea_orm::{DatabaseConnection, DbErr};
use std::sync::Arc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::config::{
    CONNECTION_HEALTH_INTERVAL, HEARTBEAT_TIMEOUT, RING_REFRESH_INTERVAL,
};
use crate::fault::{retry, BreakerConfig, CircuitBreaker, ClientError, RetryPolicy};
use crate::State;
use hexad::db::HexadDatabase;
use hexad::ring::HashRing;
use hexad::HexadResult;

pub(crate) use client::{ChunkClient, ConnState};

/// The router's view of the chunk-server fleet.
pub struct Cluster {
    ring: RwLock<HashRing>,
    clients: RwLock<HashMap<Uuid, Arc<ChunkClient>>>,
    breakers: RwLock<HashMap<Uuid, Arc<CircuitBreaker>>>,
    retry_policy: RetryPolicy,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            ring: RwLock::new(HashRing::new()),
            clients: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Maps a placement key to the server owning it.
    pub fn lookup(&self, key: &str) -> HexadResult<Uuid> {
        self.ring.read().unwrap().lookup(key)
    }

    /// Network address of a server still known to the ring.
    pub fn address_of(&self, server_id: Uuid) -> Option<String> {
        self.ring
            .read()
            .unwrap()
            .address_of(server_id)
            .map(str::to_string)
    }

    /// The client for a server, if the server is in the active set.
    pub fn client(&self, server_id: Uuid) -> Option<Arc<ChunkClient>> {
        self.clients.read().unwrap().get(&server_id).cloned()
    }

    /// The circuit breaker for a server, created on first use.
    pub fn breaker(&self, server_id: Uuid) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(&server_id) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().unwrap();
        breakers
            .entry(server_id)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(BreakerConfig::default())))
            .clone()
    }

    /// Runs one chunk-service call through the fault shell.
    ///
    /// The breaker wraps the retried call: one exhausted retry
    /// sequence counts as a single breaker failure, and an open
    /// breaker fails fast before any attempt is made.
    pub async fn execute<T, F, Fut>(&self, server_id: Uuid, op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let breaker = self.breaker(server_id);
        let policy = self.retry_policy;

        breaker.execute(|| retry(policy, op)).await
    }

    /// Re-derives the active set and reconciles the ring against it.
    #[instrument(skip_all)]
    pub async fn refresh(&self, db: &DatabaseConnection) -> Result<(), DbErr> {
        let live = db.live_servers(HEARTBEAT_TIMEOUT).await?;
        let live_map: HashMap<Uuid, String> = live
            .into_iter()
            .map(|server| (server.id, server.address))
            .collect();

        let mut removed = Vec::new();
        let mut added = Vec::new();

        {
            let mut ring = self.ring.write().unwrap();
            let mut clients = self.clients.write().unwrap();
            let mut breakers = self.breakers.write().unwrap();

            for (server_id, _) in ring.servers() {
                if !live_map.contains_key(&server_id) {
                    tracing::info!("removing server {} from the ring", server_id);
                    ring.remove(server_id);
                    breakers.remove(&server_id);
                    if let Some(client) = clients.remove(&server_id) {
                        removed.push(client);
                    }
                }
            }

            for (server_id, address) in &live_map {
                if !ring.contains(*server_id) {
                    tracing::info!("adding server {} at {} to the ring", server_id, address);
                    ring.add(*server_id, address.clone());

                    let client = Arc::new(ChunkClient::new(*server_id, address.clone()));
                    clients.insert(*server_id, client.clone());
                    breakers.insert(
                        *server_id,
                        Arc::new(CircuitBreaker::new(BreakerConfig::default())),
                    );
                    added.push(client);
                }
            }

            tracing::debug!("ring refreshed: {} live servers", ring.len());
        }

        for client in removed {
            client.shutdown().await;
        }

        for client in added {
            // Dial in the background; lookups never block on connects.
            tokio::task::spawn(async move {
                if let Err(error) = client.redial().await {
                    tracing::warn!("failed to connect to {}: {}", client.address(), error);
                }
            });
        }

        Ok(())
    }

    /// Inspects every client's transport state and redials the broken
    /// ones in the background.
    pub fn check_connections(&self) {
        let clients: Vec<Arc<ChunkClient>> =
            self.clients.read().unwrap().values().cloned().collect();

        for client in clients {
            match client.transport_state() {
                ConnState::Ready => {}
                state => {
                    let breaker = self.breaker(client.server_id());

                    tokio::task::spawn(async move {
                        tracing::debug!(
                            "connection to {} is {:?}, redialing",
                            client.address(),
                            state
                        );

                        let probe: Result<(), ClientError> = async {
                            client.redial().await?;
                            client.health().await?;
                            Ok(())
                        }
                        .await;

                        match probe {
                            Ok(()) => {
                                breaker.reset();
                                tracing::info!("reconnected to {}", client.address());
                            }
                            Err(error) => {
                                tracing::warn!(
                                    "failed to reconnect to {}: {}",
                                    client.address(),
                                    error
                                );
                            }
                        }
                    });
                }
            }
        }
    }

    /// Closes every client connection.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<ChunkClient>> = {
            let mut map = self.clients.write().unwrap();
            map.drain().map(|(_, client)| client).collect()
        };

        for client in clients {
            client.shutdown().await;
        }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the ring in sync with the server registry.
pub async fn run_ring_refresh(state: State, token: CancellationToken) {
    let mut interval = time::interval(RING_REFRESH_INTERVAL);
    tracing::info!(
        "ring refresh loop started (interval: {:?})",
        RING_REFRESH_INTERVAL
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                match state.database().await {
                    Ok(db) => {
                        if let Err(error) = state.cluster.refresh(db).await {
                            tracing::warn!("ring refresh failed: {}", error);
                        }
                    }
                    Err(error) => tracing::warn!("ring refresh failed: {}", error),
                }
            }
        }
    }

    tracing::info!("ring refresh loop stopped");
}

/// Watches chunk-server connections and redials the broken ones.
pub async fn run_connection_health(state: State, token: CancellationToken) {
    let mut interval = time::interval(CONNECTION_HEALTH_INTERVAL);
    tracing::info!(
        "connection health loop started (interval: {:?})",
        CONNECTION_HEALTH_INTERVAL
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => state.cluster.check_connections(),
        }
    }

    tracing::info!("connection health loop stopped");
}
