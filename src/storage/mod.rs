pub mod pool;
pub mod router;

pub use pool::{PoolError, PoolRegistry};
pub use router::{HandleScope, PartitionName, StorageHandle, StorageRouter};
