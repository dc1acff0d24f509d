//! OVN Northbound client contract.
//!
//! This crate defines the narrow surface of the OVN Northbound database that
//! the ACL engine depends on:
//!
//! - [`types`]: Type-safe names for OVN entities (port groups, switches,
//!   switch ports, address sets) so different entity names cannot be mixed
//! - [`rule`]: The [`OvnAclRule`] record submitted to OVN
//! - [`client`]: The [`NbClient`] trait — the engine's only OVN dependency
//! - [`mock`]: An in-memory [`MockNbClient`] for tests
//!
//! The real Northbound transport (ovsdb) lives outside this workspace; any
//! implementation of [`NbClient`] plugs into the engine unchanged.

pub mod client;
pub mod error;
pub mod mock;
pub mod rule;
pub mod types;

pub use client::{NbClient, PortGroupInfo};
pub use error::{NbError, NbOpKind, NbResult};
pub use mock::MockNbClient;
pub use rule::{OvnAclAction, OvnAclRule, TCP_ACK, TCP_FIN, TCP_RST, TCP_SYN};
pub use types::{
    AddressSetName, PortGroupName, PortGroupUuid, SwitchName, SwitchPortName, SwitchPortUuid,
};
