pub mod adapter;
pub mod audit;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod logging;
mod lookup;
pub mod service;
pub mod users;

pub use config::RbacConfig;
pub use error::RbacError;
pub use hierarchy::{
    HierarchyKind, HierarchyManager, PermissionHierarchy, Permissions, RoleHierarchy, Roles,
};
pub use logging::init_logging;
pub use service::Rbac;
pub use users::UserManager;

pub use nestrbac_core::engine::{AccessError, Granted};
pub use nestrbac_core::node::{EntityRef, Node, NodeEdit, NodeId, UserId};
pub use nestrbac_core::path::PathLimits;
