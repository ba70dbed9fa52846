//! ABI layer for `alloc` / `dealloc`.
//!
//! `alloc` returns null for requests above the maximum allocation and when
//! the backing store is exhausted. `dealloc` aborts the process on a double
//! free or on a pointer this allocator never handed out.

use std::ffi::{c_char, c_ulonglong};

use crate::global::with_global;

// ---------------------------------------------------------------------------
// alloc
// ---------------------------------------------------------------------------

/// Reserves at least `size` bytes, 16-byte aligned.
///
/// Returns null on failure. The memory is not initialized.
///
/// # Safety
///
/// Caller must release the returned pointer with `dealloc` at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn alloc(size: c_ulonglong) -> *mut c_char {
    let Ok(size) = usize::try_from(size) else {
        return std::ptr::null_mut();
    };
    with_global(|allocator| allocator.allocate(size)).cast()
}

// ---------------------------------------------------------------------------
// dealloc
// ---------------------------------------------------------------------------

/// Releases a pointer returned by `alloc`. Null is a no-op.
///
/// # Safety
///
/// `ptr` must not be used after this call. Misuse (double free, foreign or
/// interior pointer) terminates the process.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dealloc(ptr: *mut c_char) {
    // SAFETY: caller gives up `ptr`; the allocator validates it before use.
    with_global(|allocator| unsafe { allocator.release(ptr.cast()) });
}

// ---------------------------------------------------------------------------
// alloc_usable_size
// ---------------------------------------------------------------------------

/// Usable bytes behind a live `alloc` pointer; 0 for null or anything else.
///
/// Never aborts.
///
/// # Safety
///
/// Always safe to call; `ptr` is only read after it resolves to a live chunk.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn alloc_usable_size(ptr: *const c_char) -> usize {
    if ptr.is_null() {
        return 0;
    }
    with_global(|allocator| allocator.usable_size(ptr.cast()).unwrap_or(0))
}
