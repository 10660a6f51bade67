use crate::FieldbookError;
use crate::drafts::DraftRepository;
use crate::events::EventRepository;

/// Both local namespaces behind one transactional handle.
pub trait Store {
    type Drafts<'a>: DraftRepository
    where
        Self: 'a;
    type Events<'a>: EventRepository
    where
        Self: 'a;

    fn drafts(&self) -> Self::Drafts<'_>;
    fn events(&self) -> Self::Events<'_>;

    fn with_tx<F, T>(&self, f: F) -> Result<T, FieldbookError>
    where
        F: FnOnce(&Self) -> Result<T, FieldbookError>;
}
