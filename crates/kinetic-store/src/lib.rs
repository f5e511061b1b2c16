pub mod error;
pub mod index;
pub mod journal;
pub mod kv;
pub mod results;
pub mod sqlite;
pub mod view_state;

pub use error::{StoreError, StoreResult};
pub use index::TaskViewIndex;
pub use journal::TaskJournal;
pub use kv::{KvStore, MemoryKvStore, SharedKvStore};
pub use results::ResultStore;
pub use sqlite::SqliteKvStore;
pub use view_state::ViewStateStore;
