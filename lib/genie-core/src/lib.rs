//! Attachment planning and delegation for the genie meta plugin
//!
//! This library provides:
//! - CNI envelope, netconf, conflist and result types
//! - Intent parsing from pod annotations
//! - Resolution of attachment requests into concrete conflists
//! - Ordered delegation with rollback, and pod status write-back

pub mod args;
pub mod builtins;
pub mod cluster;
pub mod cnidir;
pub mod conflist;
pub mod controller;
pub mod delegate;
pub mod error;
pub mod exec;
pub mod intent;
pub mod netconf;
pub mod resolver;
pub mod result;
pub mod selector;
pub mod status;
pub mod subnet;

#[cfg(test)]
pub(crate) mod testing;

pub use args::{CniArgs, CniCommand, K8sArgs};
pub use cluster::ClusterApi;
pub use cnidir::CniDir;
pub use conflist::ConfList;
pub use controller::GenieController;
pub use delegate::{DelegateExec, Delegator, RuntimeConf};
pub use error::{CniError, CniErrorCode, GenieError, Result};
pub use exec::ExecDelegate;
pub use intent::{AttachmentRequest, AttachmentSource};
pub use netconf::GenieConf;
pub use result::CniResult;
pub use selector::{ConfiguredDefault, DefaultSelector, UsageSelector};
