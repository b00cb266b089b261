//! Node-local provisioning: databases, background processes and location.

/// Logical database and table provisioning.
mod database;
/// Location lookup through the node.
mod geolocation;
/// Background process activation.
mod process;

pub use database::{DatabaseProvisioner, DbConnection};
pub use geolocation::Geolocator;
pub use process::{OperatorOptions, ProcessActivator, PublisherOptions, SyncParams};
