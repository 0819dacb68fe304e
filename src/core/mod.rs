pub mod cache;
pub mod cancel;
pub mod discovery;
pub mod frecency;
pub mod git_ops;
pub mod integrity;
pub mod migrate;
pub mod records;
pub mod retry;
pub mod scan;
pub mod store;
pub mod sync;
