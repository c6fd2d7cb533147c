//! The placement ring.
//!
//! A consistent-hash ring with virtual nodes maps an opaque key (in
//! practice, a chunk id) to the chunk server that stores it. Both the
//! router and the chunk servers derive virtual-node positions with
//! [`virtual_node_hash`], so the durable `ring_nodes` rows and the
//! router's in-memory ring always agree.
//!
//! The ring itself is a plain value; the router swaps and reads it
//! under a reader-writer lock so every lookup observes one
//! self-consistent snapshot.

use std::collections::HashMap;

use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

use crate::error::{HexadError, HexadResult};

/// Number of virtual nodes each server contributes to the ring.
///
/// With a handful of servers, 150 nodes per server keeps the
/// per-server share of the key space within a few percent of even.
pub const VIRTUAL_NODES_PER_SERVER: u32 = 150;

/// Position of one virtual node for a server.
///
/// Deterministic in `(server_id, virtual_index)`: the hash is XXH64
/// over `"{server_id}#{virtual_index}"`.
pub fn virtual_node_hash(server_id: Uuid, virtual_index: u32) -> u64 {
    let key = format!("{}#{}", server_id, virtual_index);
    xxh64(key.as_bytes(), 0)
}

/// A virtual node on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    hash: u64,
    server_id: Uuid,
    virtual_index: u32,
}

/// A consistent-hash ring with virtual nodes.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// All virtual nodes, sorted by `(hash, server_id, virtual_index)`.
    ///
    /// The tuple order is the tie-break: when two virtual nodes share a
    /// hash value, the lexicographically smaller owner wins.
    slots: Vec<Slot>,

    /// Known servers and their network addresses.
    servers: HashMap<Uuid, String>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server and its virtual nodes to the ring.
    ///
    /// Idempotent: adding a server that is already present refreshes
    /// its address and leaves exactly [`VIRTUAL_NODES_PER_SERVER`]
    /// slots for it.
    pub fn add(&mut self, server_id: Uuid, address: impl Into<String>) {
        if self.servers.insert(server_id, address.into()).is_some() {
            self.slots.retain(|slot| slot.server_id != server_id);
        }

        for virtual_index in 0..VIRTUAL_NODES_PER_SERVER {
            self.slots.push(Slot {
                hash: virtual_node_hash(server_id, virtual_index),
                server_id,
                virtual_index,
            });
        }

        self.slots
            .sort_unstable_by_key(|slot| (slot.hash, slot.server_id, slot.virtual_index));
    }

    /// Removes a server and all of its virtual nodes.
    ///
    /// Returns whether the server was present.
    pub fn remove(&mut self, server_id: Uuid) -> bool {
        if self.servers.remove(&server_id).is_none() {
            return false;
        }

        self.slots.retain(|slot| slot.server_id != server_id);
        true
    }

    /// Maps a key to the server owning it.
    ///
    /// Binary-searches for the first virtual node at or past the key's
    /// hash, wrapping to the first slot when the key hashes past the
    /// last node.
    pub fn lookup(&self, key: &str) -> HexadResult<Uuid> {
        if self.slots.is_empty() {
            return Err(HexadError::NoServersAvailable);
        }

        let key_hash = xxh64(key.as_bytes(), 0);
        let idx = self.slots.partition_point(|slot| slot.hash < key_hash);
        let idx = if idx == self.slots.len() { 0 } else { idx };

        Ok(self.slots[idx].server_id)
    }

    /// Returns the network address of a server, if known.
    pub fn address_of(&self, server_id: Uuid) -> Option<&str> {
        self.servers.get(&server_id).map(String::as_str)
    }

    pub fn contains(&self, server_id: Uuid) -> bool {
        self.servers.contains_key(&server_id)
    }

    /// Snapshot of the known servers for iteration.
    pub fn servers(&self) -> Vec<(Uuid, String)> {
        self.servers
            .iter()
            .map(|(id, addr)| (*id, addr.clone()))
            .collect()
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
