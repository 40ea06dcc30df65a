pub mod bus;
pub mod cache;
pub mod saver;

pub use bus::{BusError, BusSubscription, InMemoryBus, InvalidationBus};
pub use cache::NodeCache;
pub use saver::{QueuedPersister, SaveDispatcher};
