pub mod repository;
pub mod repository_sqlx;

pub use repository::{WatchStore, validate_numeric_state};
pub use repository_sqlx::SqlxWatchStore;
