//! Copy container images between local accounts and remote hosts.
//!
//! `podscp` moves an image from one image store to another without an
//! intermediate registry or archive file. An address names the store and the
//! image:
//!
//! ```text
//! [[user@]host-or-connection::]image
//! ```
//!
//! A bare image refers to the invoking user's store. `root@localhost::`
//! names another local account's store, reached through a privilege switch.
//! A host name, IP address or connection alias from `containers.conf` names
//! a remote store, reached over the secure shell.
//!
//! # Modules
//!
//! - [`address`]: Address parsing
//! - [`api`]: Transfer orchestration ([`api::transfer`])
//! - [`config`]: Configuration with layered precedence (CLI > env > file > defaults)
//! - [`connections`]: Named connections from `containers.conf`
//! - [`engine`]: Engine API connection, image stores and child processes
//! - [`error`]: Semantic error types
//! - [`plan`]: Transport selection
//! - [`transport`]: Producer/consumer wiring and secure-shell sessions
//! - [`users`]: Local account lookups

pub mod address;
pub mod api;
pub mod config;
pub mod connections;
pub mod engine;
pub mod error;
pub mod plan;
pub mod transport;
pub mod users;

#[cfg(test)]
mod testing;
