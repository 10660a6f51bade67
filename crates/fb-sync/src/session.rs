use fb_core::types::Owner;
use std::sync::atomic::{AtomicBool, Ordering};

/// Who is using the device and whether the network is usable.
pub trait SessionProvider: Send + Sync {
    fn current_owner(&self) -> Owner;
    fn is_online(&self) -> bool;
}

/// A fixed identity with a switchable connectivity flag.
pub struct StaticSession {
    owner: Owner,
    online: AtomicBool,
}

impl StaticSession {
    pub fn new(owner: Owner, online: bool) -> Self {
        Self {
            owner,
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl SessionProvider for StaticSession {
    fn current_owner(&self) -> Owner {
        self.owner.clone()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
