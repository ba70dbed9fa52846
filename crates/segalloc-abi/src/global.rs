//! Process-wide allocator instance.
//!
//! Created on first use from the `SEGALLOC_*` environment and never torn
//! down. A rejected environment falls back to the defaults and leaves a
//! `config_rejected` lifecycle record behind.

use parking_lot::Mutex;
use segalloc_core::{Allocator, AllocatorConfig};

static GLOBAL: Mutex<Option<Allocator>> = Mutex::new(None);

fn init_global() -> Allocator {
    match AllocatorConfig::from_env().and_then(Allocator::new) {
        Ok(allocator) => allocator,
        Err(err) => {
            let mut allocator = Allocator::default();
            allocator.note_config_error(&err);
            allocator
        }
    }
}

/// Runs `f` against the process-wide allocator, creating it if needed.
///
/// `f` must not call back into `alloc`/`dealloc`; the lock is not reentrant.
pub fn with_global<R>(f: impl FnOnce(&mut Allocator) -> R) -> R {
    let mut guard = GLOBAL.lock();
    f(guard.get_or_insert_with(init_global))
}
