//! Network ACL compilation and OVN port-group synchronization engine.
//!
//! This crate turns high-level, user-declared Network ACL policies into the
//! concrete OVN state (port groups, address-set references, match
//! expressions) required for the policy to take effect on running workloads.
//!
//! # Architecture
//!
//! ```text
//! Reconciler  ──►  Compiler  ──►  Reference Resolver  ──►  Catalog
//!      │               │
//!      ▼               ▼
//!  NbClient        Baseline Emitter
//!      │
//!      ▼
//!  Reaper (unused-port-group GC)
//! ```
//!
//! # Key components
//!
//! - [`catalog`]: Read-only typed access to ACLs, networks, projects,
//!   address sets and peers
//! - [`resolver`]: One-level expansion of an ACL's referenced ACLs and
//!   address sets
//! - [`compiler`]: Lowers one ACL into OVN ACL rule records
//! - [`reconcile`]: Ensures port groups exist and carry the right rules,
//!   with LIFO rollback on failure
//! - [`reaper`]: Deletes port groups no OVN-backed entity references
//! - [`baseline`]: Fixed switch-level rule program for network services
//! - [`logfmt`]: Parses OVN ACL log lines into JSON entries

pub mod baseline;
pub mod catalog;
pub mod compiler;
pub mod error;
pub mod logfmt;
pub mod naming;
pub mod reaper;
pub mod reconcile;
pub mod resolver;
pub mod subject;
pub mod types;

pub use catalog::{
    AclUsage, AddressSetRecord, Catalog, CatalogError, MemoryCatalog, NetworkRecord, PeerRecord,
};
pub use compiler::{compile, CompileContext, CompiledAcl};
pub use error::{AclError, AclResult};
pub use reaper::{delete_unused_port_groups, IgnoreUsage};
pub use reconcile::{
    apply_nic_defaults, schedule_nic_to_port_groups, AclCleanup, NetworkUsage, Reconciler,
};
pub use types::{AclAction, AclRecord, AclRule, PeerConnection, RuleDirection, RuleState};
