//! Ordered key-value backends.

pub mod memory;
pub mod redb;
pub mod traits;

pub use self::memory::MemoryKv;
pub use self::redb::RedbKv;
pub use self::traits::{Keyspace, KvError, KvStore, WriteBatch};
