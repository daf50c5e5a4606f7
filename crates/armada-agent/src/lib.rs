//! armada-agent — the endpoint side of the fleet.
//!
//! Commands arrive over the server link, are persisted in the local queue
//! before they are acknowledged, run on the executor pool, and their
//! results are delivered back with retry until the server accepts them.

pub mod agent;
pub mod link;
pub mod poller;

pub use agent::{open_queue_with_retry, Agent};
pub use link::{CommandBatch, LinkError, ServerLink};
pub use poller::{CommandPoller, PollReport};
