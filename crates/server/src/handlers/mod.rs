//! HTTP request handlers.

pub mod admin;
pub mod bulk;
pub mod common;
pub mod data;
pub mod workspaces;

pub use admin::*;
pub use bulk::*;
pub use data::*;
pub use workspaces::*;
