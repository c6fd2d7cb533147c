//! The Hexad Library.
//!
//! Components shared between the router and the chunk server: checksums,
//! stream utilities, the placement ring, the chunk-service wire protocol,
//! and the metadata layer.

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

pub mod db;
pub mod error;
pub mod hash;
pub mod proto;
pub mod ring;
pub mod stream;
pub mod testing;

pub use error::{HexadError, HexadResult};
