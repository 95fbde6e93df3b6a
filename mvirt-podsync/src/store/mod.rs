//! Persistence for pod records.
//!
//! Handlers and the sync engine only use the [`PodStore`] trait. Two
//! implementations exist: [`MemoryPodStore`] for development and tests, and
//! [`SqlitePodStore`] for a persistent controller.

mod error;
mod event;
mod memory;
mod sqlite;
mod traits;

pub use error::{Result, StoreError};
pub use event::PodEvent;
pub use memory::MemoryPodStore;
pub use sqlite::SqlitePodStore;
pub use traits::PodStore;
