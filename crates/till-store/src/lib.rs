//! till-store: record-store abstraction over OpenDAL and the central HTTP store

pub mod error;
pub mod health;
pub mod http;
pub mod memory;
pub mod operator;
pub mod records;
pub mod remote;
pub mod store;

pub use error::{RemoteError, StoreError, StoreResult};
pub use health::{check_health, HealthCheck};
pub use http::HttpRemote;
pub use memory::MemoryStore;
pub use operator::{build_local_operator, memory_operator};
pub use records::OpendalStore;
pub use remote::{Mutation, RemoteExecutor, StoreExecutor, Verb};
pub use store::RecordStore;
