pub mod bus;
pub mod types;

pub use crate::bus::NoticeBus;
pub use crate::types::{Notice, NoticeSource};
