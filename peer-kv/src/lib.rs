//! Two-node key-value store with best-effort peer replication.
//!
//! Each node serves `GET`/`SET`/`DELETE` over a newline-delimited TCP protocol
//! and forwards every client mutation to one configured peer. Forwarding is
//! fire-and-forget: no retries, no acknowledgements, no conflict resolution. If
//! the peer is down, the two nodes drift apart and stay that way.
//!
//! - [`store`] defines the store seam and the mutex-guarded in-memory map.
//! - [`protocol`] parses request lines, renders responses, and frames both.
//! - [`peer`] opens one short-lived connection per forwarded mutation.
//! - [`handler`] runs the read/apply/propagate/respond loop for one connection.
//! - [`node`] binds the listener and spawns a handler task per connection.
//! - [`client`] and [`cli`] provide the interactive client and the binary's flags.
//!
//! Forwarded lines carry a `PROPAGATE` prefix. The receiving node applies them
//! but does not forward them again, so two nodes pointing at each other do not
//! bounce updates back and forth.

pub mod cli;
pub mod client;
pub mod handler;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod store;
