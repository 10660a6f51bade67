pub mod draft;
pub mod enums;
pub mod event;
pub mod ids;
pub mod io;
pub mod notice;

pub use draft::{Draft, DraftMetadata, MetadataPatch, Owner};
pub use enums::{EventStatus, WorkSource};
pub use event::{DataValue, EventRecord, EventStats};
pub use ids::{DraftId, EventId, IdError, UserId};
pub use io::{EventFilter, EventPatch, ExportSnapshot, NewEvent, PromoteInput};
pub use notice::NoticeBody;
