pub use l4_dataplane_api as api;
pub use l4_dataplane_core as core;
pub use l4_dataplane_index as index;

pub mod admin;
mod args;
pub mod manifests;

pub use self::args::Args;
