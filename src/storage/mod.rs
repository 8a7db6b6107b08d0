pub mod gateway;
pub mod memory;
pub mod table;

pub use gateway::{PersistenceGateway, StorageError};
pub use memory::MemoryGateway;
pub use table::FileGateway;
