//! Driver scenarios run against the exported `alloc`/`dealloc`.
//!
//! Every scenario goes through the process-wide instance, the same path a C
//! program linking `segalloc-abi` takes.

use std::ffi::{CStr, c_char};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use clap::ValueEnum;
use segalloc_abi::{alloc, dealloc, with_global};
use serde::Serialize;

use crate::error::HarnessError;
use crate::structured_log::sha256_hex;

/// Buffer the read-file scenario requests at minimum.
pub const READ_BUFFER_SIZE: u64 = 8 * 1024 * 1024;

/// Request size the oversize probe uses by default.
pub const OVERSIZE_REQUEST: u64 = 300 * 1024 * 1024;

/// Deterministic xorshift generator for workloads.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// A zero seed would stick at zero and is replaced.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: u64, high_inclusive: u64) -> u64 {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + self.next_u64() % span
    }
}

// ---------------------------------------------------------------------------
// churn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChurnConfig {
    pub cycles: usize,
    /// Sizes are drawn from `1..=max_size`.
    pub max_size: u64,
    pub seed: u64,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            cycles: 1_500_000,
            max_size: 200,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChurnReport {
    pub cycles: usize,
    pub nulls: usize,
    pub non_nulls: usize,
    /// Immediate releases (every even cycle).
    pub released: usize,
    pub live_chunks: usize,
    pub free_chunks: usize,
    pub mapped_bytes: usize,
    pub reuse_hits: u64,
}

/// Allocates `cycles` random small sizes and releases every other result
/// right away. The heap is verified before returning.
pub fn run_churn(config: &ChurnConfig) -> Result<ChurnReport, HarnessError> {
    let mut rng = XorShift64::new(config.seed);
    let (mut nulls, mut non_nulls, mut released) = (0, 0, 0);

    for i in 0..config.cycles {
        let size = rng.gen_range(1, config.max_size.max(1));
        // SAFETY: the result is only passed back to `dealloc`.
        let p = unsafe { alloc(size) };
        if p.is_null() {
            nulls += 1;
        } else {
            non_nulls += 1;
        }
        if i % 2 == 0 {
            // SAFETY: released at most once; null is a no-op.
            unsafe { dealloc(p) };
            released += usize::from(!p.is_null());
        }
    }

    let (heap, stats) = with_global(|a| a.verify_heap().map(|heap| (heap, a.stats())))?;
    Ok(ChurnReport {
        cycles: config.cycles,
        nulls,
        non_nulls,
        released,
        live_chunks: heap.live_chunks,
        free_chunks: heap.free_chunks,
        mapped_bytes: heap.mapped_bytes,
        reuse_hits: stats.reuse_hits,
    })
}

// ---------------------------------------------------------------------------
// read-file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RoundTripReport {
    pub path: String,
    pub bytes: usize,
    pub requested: u64,
    pub sha256: String,
    /// False when run with `leak`.
    pub released: bool,
}

/// Reads `path` into an `alloc`ed buffer, NUL-terminates it and checks the
/// C string length equals the file length.
///
/// With `leak` the buffer is never released.
pub fn read_file_round_trip(path: &Path, leak: bool) -> Result<RoundTripReport, HarnessError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let too_large = || HarnessError::FileTooLarge {
        path: path.to_path_buf(),
        len: file_len,
    };
    let len = usize::try_from(file_len).map_err(|_| too_large())?;
    let requested = file_len
        .checked_add(1)
        .ok_or_else(too_large)?
        .max(READ_BUFFER_SIZE);

    // SAFETY: the buffer is released below unless leaking.
    let buf = unsafe { alloc(requested) };
    if buf.is_null() {
        return Err(HarnessError::AllocationFailed { size: requested });
    }
    // SAFETY: `buf` holds at least `len + 1` bytes.
    let digest = unsafe { fill_and_check(buf, len, &mut file) };
    if !leak {
        // SAFETY: not used after this point.
        unsafe { dealloc(buf) };
    }

    Ok(RoundTripReport {
        path: path.display().to_string(),
        bytes: len,
        requested,
        sha256: digest?,
        released: !leak,
    })
}

unsafe fn fill_and_check(
    buf: *mut c_char,
    len: usize,
    file: &mut File,
) -> Result<String, HarnessError> {
    // SAFETY: caller guarantees `len + 1` writable bytes.
    let bytes = unsafe {
        buf.cast::<u8>().write_bytes(0, len + 1);
        std::slice::from_raw_parts_mut(buf.cast::<u8>(), len + 1)
    };
    file.read_exact(&mut bytes[..len])?;
    bytes[len] = 0;
    // SAFETY: NUL-terminated within the buffer.
    let found = unsafe { CStr::from_ptr(buf) }.to_bytes().len();
    if found != len {
        return Err(HarnessError::ContentMismatch {
            expected: len,
            found,
        });
    }
    Ok(sha256_hex(&bytes[..len]))
}

// ---------------------------------------------------------------------------
// misuse
// ---------------------------------------------------------------------------

/// Ways of releasing memory wrongly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MisuseKind {
    /// Release the same 8 MiB buffer twice.
    DoubleFree,
    /// Release an 8 MiB buffer again after its arena was retired and fresh
    /// buffers of the same size were handed out.
    StaleRelease,
    /// Release the address of a stack variable.
    StackPointer,
    /// Release a pointer into the middle of a chunk.
    InteriorPointer,
}

impl MisuseKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DoubleFree => "double free",
            Self::StaleRelease => "stale release after remap",
            Self::StackPointer => "stack pointer release",
            Self::InteriorPointer => "interior pointer release",
        }
    }
}

/// Performs the misuse. The allocator aborts the process, so this only
/// returns when detection failed.
pub fn provoke_misuse(kind: MisuseKind) -> HarnessError {
    match kind {
        MisuseKind::DoubleFree => {
            // SAFETY: deliberately not safe; the second call must abort.
            unsafe {
                let m = alloc(READ_BUFFER_SIZE);
                dealloc(m);
                eprintln!("INFO: about to release {m:p} a second time");
                dealloc(m);
            }
        }
        MisuseKind::StaleRelease => {
            // SAFETY: every buffer is released once before the stale release,
            // which must abort.
            unsafe {
                let old: Vec<*mut c_char> = (0..3).map(|_| alloc(READ_BUFFER_SIZE)).collect();
                for &m in &old {
                    dealloc(m);
                }
                // Two spares are kept per class; the third buffer's arena
                // is retired and is not among the fresh ones.
                let fresh: Vec<*mut c_char> = (0..3).map(|_| alloc(READ_BUFFER_SIZE)).collect();
                let stale = old[2];
                eprintln!(
                    "INFO: {} fresh buffers live, about to release {stale:p} a second time",
                    fresh.len()
                );
                dealloc(stale);
            }
        }
        MisuseKind::StackPointer => {
            // SAFETY: the heap buffer is released once; the stack release must abort.
            unsafe {
                let m = alloc(READ_BUFFER_SIZE);
                if m.is_null() {
                    eprintln!("WARN: alloc({READ_BUFFER_SIZE}) returned null");
                }
                eprintln!("INFO: about to release the heap buffer");
                dealloc(m);
                let local = std::hint::black_box([0u64; 2]);
                eprintln!("INFO: about to release stack memory");
                dealloc(local.as_ptr().cast_mut().cast());
            }
        }
        MisuseKind::InteriorPointer => {
            // SAFETY: deliberately not safe; the interior release must abort.
            unsafe {
                let p = alloc(256);
                eprintln!("INFO: about to release an interior pointer");
                dealloc(p.add(16));
            }
        }
    }
    eprintln!("WARNING: {} went undetected", kind.as_str());
    HarnessError::MisuseNotDetected(kind.as_str())
}

// ---------------------------------------------------------------------------
// oversize
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OversizeReport {
    pub size: u64,
    pub null: bool,
    /// Allocator's out-of-range counter after the request.
    pub out_of_range: u64,
}

/// Requests `size` bytes once. A non-null result is released immediately.
pub fn probe_oversize(size: u64) -> OversizeReport {
    // SAFETY: the result is only passed back to `dealloc`.
    let p = unsafe { alloc(size) };
    let null = p.is_null();
    if !null {
        // SAFETY: released once.
        unsafe { dealloc(p) };
    }
    OversizeReport {
        size,
        null,
        out_of_range: with_global(|a| a.stats().out_of_range),
    }
}
