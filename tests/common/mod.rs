//! Common test utilities for federation-import end-to-end tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod sources;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use sources::*;
