//! # Statemask library
//!
//! The session and binding state plane of a stateful NAT64: the engine that
//! ties the IPv4 endpoint pool and the translation prefixes to the
//! BIB/session tables, plus the administrative surface that manipulates
//! them. The `statemask` binary is a thin wrapper over this crate.

pub mod args;
pub mod common;
pub mod control;
pub mod nat;
