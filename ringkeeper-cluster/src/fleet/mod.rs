//! Fleet distribution and remote control.
//!
//! ```text
//!   ChangeCoordinator ──post──▶ Mailbox ──take──▶ worker ──spawn──▶ push to member 1
//!                                                         ├─spawn──▶ push to member 2
//!                                                         └─spawn──▶ ...
//! ```
//!
//! Posting never blocks the coordinator and the mailbox keeps only the newest
//! ring. Each push runs in its own task, so a slow or failed member never
//! holds up the others. Failures are logged and not retried; a member catches
//! up on the next ring or when it reconnects.

mod distributor;
mod mailbox;
mod member;
mod server;

pub use distributor::{control_addr, FleetDistributor};
pub use mailbox::{FleetUpdate, Mailbox};
pub use member::{ConnectionState, ControlReply, FleetMember, COMMAND_TIMEOUT, HEALTH_TIMEOUT};
pub use server::{CommandHandler, RemoteControlService};
