pub mod engine;
pub mod entity;
pub mod predicate;
pub mod store;

pub use engine::{lock_order, BulkWriteReport, ScopedQueryEngine};
pub use entity::{EntityCatalog, EntityId, Record, Tenancy};
pub use predicate::Predicate;
pub use store::{EntityStore, MemoryEntityStore, PgEntityStore};
