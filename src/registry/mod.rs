//! Registry managers : namespace, zone, servlet, instance and
//! privilege. Each owns its own entity rows in the `meta` column family and
//! its own in-memory maps; [`handler::DiscoveryHandler`] is the
//! [`crate::raft::GroupHandler`] that fans an applied
//! [`crate::raft::DiscoveryRequest`] out to whichever manager (or the
//! config/plugin stores) owns it.

pub mod handler;
pub mod instance;
pub mod namespace;
pub mod privilege;
pub mod servlet;
pub mod zone;

pub use handler::DiscoveryHandler;
pub use instance::{Instance, InstanceManager};
pub use namespace::{Namespace, NamespaceManager};
pub use privilege::{Privilege, PrivilegeManager, Rw};
pub use servlet::{Servlet, ServletManager};
pub use zone::{Zone, ZoneManager};
