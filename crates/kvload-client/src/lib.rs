//! Store clients for the kvload engine.
//!
//! [`RespStoreClient`] drives a RESP2-speaking cluster; [`MemoryStore`] is
//! an in-process stand-in for dry runs.

pub mod connection;
pub mod memory;
pub mod pool;
pub mod resp;
pub mod retry;
pub mod ring;

pub use memory::MemoryStore;
pub use resp::{ClientSettings, RespStoreClient};
pub use retry::RetryPolicy;
pub use ring::RangeMap;
