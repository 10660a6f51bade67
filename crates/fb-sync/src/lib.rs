pub mod engine;
pub mod error;
pub mod http;
pub mod payload;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use crate::engine::{Delivery, RecordOutcome, SyncEngine, SyncOutcome, SyncReport};
pub use crate::error::{RemoteError, SyncError};
pub use crate::http::HttpRemote;
pub use crate::remote::RemoteService;
pub use crate::scheduler::SaveScheduler;
pub use crate::session::{SessionProvider, StaticSession};
pub use crate::storage::Storage;
