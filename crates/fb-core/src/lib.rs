pub mod drafts;
pub mod error;
pub mod events;
pub mod fieldbook;
pub mod store;
pub mod validation;
pub mod view;

pub mod types;

pub use crate::error::FieldbookError;
pub use crate::fieldbook::{Fieldbook, RequestContext};
pub use crate::store::Store;
