// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod load_operation;
pub mod loader;
pub mod utils;
pub mod versioned_group_cache;

pub use utils::*;
