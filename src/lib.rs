//! Offline-first fire-safety inspection log.
//!
//! Inspections are written to a local SQLite store together with a durable
//! queue of pending mutations. A background worker replays that queue to the
//! remote endpoint when connectivity allows and serves application resources
//! through a caching proxy.

pub mod app;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod logging;
pub mod model;
pub mod photo;
pub mod store;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;
