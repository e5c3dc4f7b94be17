//! # user-sync-index
//!
//! A Redis-backed prefix index over user emails, kept in sync with the
//! primary user table, serving autocomplete lookups.
//!
//! ## Layout
//!
//! - [`domain`]: user records, sync jobs, prefix bounds, clocks
//! - [`infrastructure`]: backend traits with Redis, `PostgreSQL` and
//!   in-memory implementations
//! - [`sync`]: index store, scheduler, worker, reader, hook and ticker
//! - [`api`]: HTTP handlers and routing
//!
//! ## Consistency
//!
//! The index is eventually consistent with the user table. Single-user
//! changes arrive through queued `upsert-one` jobs; drift (missed events,
//! deletions) is repaired by periodic full rebuilds.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod domain;
pub mod infrastructure;
pub mod sync;
