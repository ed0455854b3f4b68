pub mod fixtures;
pub mod stores;

#[allow(unused_imports)]
pub use fixtures::{TestEnv, json_payload, seed_tree};
#[allow(unused_imports)]
pub use stores::{Fault, FaultyBlobStore, RecordingStore};
