//! Integration tests for the exported allocation entry points.

use std::ffi::c_char;
use std::sync::Mutex;

use segalloc_abi::{alloc, alloc_usable_size, dealloc, with_global};

// Every test shares the process-wide instance.
static TEST_LOCK: Mutex<()> = Mutex::new(());

const MIB: u64 = 1024 * 1024;

#[test]
fn alloc_dealloc_round_trip() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: pointer is written within its size and released once.
    unsafe {
        let p = alloc(100);
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);
        assert!(alloc_usable_size(p) >= 100);
        p.write_bytes(b'x', 100);
        assert_eq!(*p.add(99), b'x' as c_char);
        dealloc(p);
    }
}

#[test]
fn freed_chunk_is_reused() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: each pointer is released once.
    unsafe {
        let p = alloc(48);
        dealloc(p);
        let q = alloc(40);
        assert_eq!(p, q, "same class comes back from the free list");
        dealloc(q);
    }
}

#[test]
fn oversize_requests_return_null() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let before = with_global(|a| a.stats().out_of_range);
    // SAFETY: null results are never dereferenced.
    unsafe {
        assert!(alloc(500 * MIB).is_null());
        assert!(alloc(u64::MAX).is_null());
    }
    assert_eq!(with_global(|a| a.stats().out_of_range), before + 2);
}

#[test]
fn dealloc_null_is_a_no_op() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let releases = with_global(|a| a.stats().releases);
    // SAFETY: null is always accepted.
    unsafe {
        dealloc(std::ptr::null_mut());
        assert_eq!(alloc_usable_size(std::ptr::null()), 0);
    }
    assert_eq!(with_global(|a| a.stats().releases), releases);
}

#[test]
fn usable_size_of_foreign_pointer_is_zero() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let local = [0 as c_char; 32];
    // SAFETY: usable-size never aborts and never reads foreign memory.
    unsafe {
        assert_eq!(alloc_usable_size(local.as_ptr()), 0);
    }
}

#[test]
fn eight_mib_buffer_keeps_string_contents() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let len = 8 * MIB as usize;
    // SAFETY: `len + 1` bytes requested; written and read within bounds.
    unsafe {
        let p = alloc(len as u64 + 1);
        assert!(!p.is_null());
        let bytes = p.cast::<u8>();
        for i in 0..len {
            *bytes.add(i) = b'a' + (i % 26) as u8;
        }
        *bytes.add(len) = 0;
        let text = std::ffi::CStr::from_ptr(p);
        assert_eq!(text.to_bytes().len(), len);
        dealloc(p);
    }
}

#[test]
fn global_heap_stays_consistent() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: every pointer is released once.
    unsafe {
        let ptrs: Vec<*mut c_char> = (1..=500).map(|i| alloc(i)).collect();
        for p in ptrs.iter().step_by(2) {
            dealloc(*p);
        }
        for p in ptrs.iter().skip(1).step_by(2) {
            dealloc(*p);
        }
    }
    let report = with_global(|a| a.verify_heap()).expect("heap walk");
    assert_eq!(report.live_chunks, with_global(|a| a.stats().live_chunks));
}
