pub mod draft_repo;
pub mod event_repo;
pub mod schema;
pub mod store;
pub mod util;

pub use crate::schema::{open_and_migrate, with_test_db};
pub use crate::store::DbStore;
