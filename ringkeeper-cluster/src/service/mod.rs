//! Control-plane gRPC service.
//!
//! [`RingControlService`] is what operators and registering nodes talk to.
//! Domain errors are mapped onto `tonic::Status` codes by
//! `From<ClusterError> for Status`.

mod control;

pub use control::{query_filters, RingControlService};
