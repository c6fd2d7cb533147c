//! The Hexad chunk server.
//!
//! A chunk server owns one data directory and serves the framed chunk
//! service over TCP: verified streamed writes, verified streamed
//! reads, deletes and disk usage reports. It registers itself in the
//! shared metadata store and heartbeats so routers can derive the
//! active set.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod config;
pub mod registry;
pub mod service;
pub mod store;
