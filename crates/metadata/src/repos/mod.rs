//! Repository traits for the entity tables, their indexes and change streams.

pub mod components;
pub mod data;
pub mod index;
pub mod paths;
pub mod stream;
pub mod workspaces;

pub use components::ComponentRepo;
pub use data::DataRepo;
pub use index::{IndexCursor, IndexPage, IndexRepo, IndexRow, PageRequest};
pub use paths::PathRepo;
pub use stream::{StreamPosition, StreamRepo};
pub use workspaces::WorkspaceRepo;
