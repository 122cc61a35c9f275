//! # verity-topology
//!
//! Declarative description of the cluster a verification run needs.
//!
//! ## Design Principles
//!
//! - A topology is validated once, at build time, and is immutable afterwards
//! - Relations are unordered pairs held in a set, so relating twice is a no-op
//! - Every relation endpoint must name a service of the same topology
//! - The content digest does not depend on declaration order
//!
//! ## File Format
//!
//! ```toml
//! relations = [
//!     ["ceph-osd:mon", "ceph-mon:osd"],
//! ]
//!
//! [services.ceph-mon]
//! units = 3
//! config = { monitor-count = 3 }
//!
//! [services.ceph-osd]
//! units = 3
//! storage = { osd-devices = "cinder,10G" }
//! ```

mod error;
mod overlay;
mod relation;
mod service;
mod topology;

pub use error::TopologyError;
pub use overlay::ConfigOverlay;
pub use relation::{Endpoint, RelationSpec};
pub use service::{ServiceSpec, StorageSpec};
pub use topology::{Topology, TopologyBuilder, TopologyDigest};
