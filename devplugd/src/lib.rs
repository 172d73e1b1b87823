//! Core runtime of the device-plugin framework (§2): the device
//! manager and tag index, the transaction store, the reading cache,
//! the rate limiter, the scheduler, the health manager, the RPC
//! service surface, and the plugin lifecycle that wires them together.
//! Configuration loading and the command-line surface live alongside
//! as the ambient stack every plugin built on this crate shares.

pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod health;
pub mod id;
pub mod limiter;
pub mod manager;
pub mod rpc;
pub mod scheduler;
pub mod txstore;

#[doc(hidden)]
pub mod testutil;
