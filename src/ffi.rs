//! C interface
//!
//! Handle-based entry points for the managed runtime bridge. Every function
//! catches panics and reports failures as the negative codes in
//! [`crate::error::code`]; functions producing a handle or address return 0
//! on failure instead. Each failure is logged once, here.
//!
//! Sessions live in the process-wide [`SessionManager::global`]. Borrowed
//! buffers live in a process-wide [`BufferTable`].

use std::ffi::{c_char, c_void};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use crate::bridge::{BufferTable, HardwareBuffer, MemoryRegion};
use crate::error::{code, BufferError, Error, Result};
use crate::id::Handle;
use crate::media::Metadata;
use crate::session::SessionManager;

static BUFFERS: LazyLock<Mutex<BufferTable>> = LazyLock::new(|| Mutex::new(BufferTable::new()));

fn buffers() -> MutexGuard<'static, BufferTable> {
    BUFFERS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Types that can be converted to C-compatible return codes
pub trait ReturnCode {
    fn code(&self) -> i32;
}

impl ReturnCode for () {
    fn code(&self) -> i32 {
        code::OK
    }
}

impl ReturnCode for Error {
    fn code(&self) -> i32 {
        tracing::error!("{}", self);
        Error::code(self)
    }
}

impl<T: ReturnCode> ReturnCode for Result<T> {
    fn code(&self) -> i32 {
        match self {
            Ok(value) => value.code(),
            Err(err) => ReturnCode::code(err),
        }
    }
}

/// Run `f`, converting its result (or a panic) to a status code
fn enter<C: ReturnCode, F: FnOnce() -> C>(f: F) -> i32 {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(ret) => ret.code(),
        Err(_) => ReturnCode::code(&Error::Panic),
    }
}

/// Run `f` producing a handle or address; 0 on error or panic
fn enter_value<F: FnOnce() -> Result<i64>>(f: F) -> i64 {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            ReturnCode::code(&err);
            0
        }
        Err(_) => {
            ReturnCode::code(&Error::Panic);
            0
        }
    }
}

/// Parse a pointer and length into a `&str`.
///
/// # Safety
/// `ptr` must be valid for reads of `len` bytes for `'a`.
unsafe fn parse_str<'a>(ptr: *const c_char, len: usize) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::InvalidArgument("null string".into()));
    }
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
    std::str::from_utf8(bytes).map_err(|e| Error::InvalidArgument(e.to_string()))
}

/// Parse a caller payload. Null pointers and non-positive sizes are rejected.
///
/// # Safety
/// `data` must be valid for reads of `size` bytes for `'a`.
unsafe fn parse_payload<'a>(data: *const u8, size: i32) -> Result<&'a [u8]> {
    let region = MemoryRegion::new(data as usize as i64, size as i64)?;
    Ok(unsafe { region.as_slice() })
}

fn buffer_id(buffer: i64) -> Result<Handle> {
    Handle::try_from(buffer).map_err(|_| BufferError::UnknownBuffer(buffer as u64).into())
}

/// Statistics snapshot returned by [`rtmp_get_stats`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtmpStats {
    pub bytes_sent: i64,
    pub latency_ms: i64,
    pub loss_percent: i64,
}

/// Open a publishing session for `rtmp://host[:port]/app/stream`.
///
/// Returns the session handle, or 0 on failure.
///
/// # Safety
/// `url` must point to `url_len` readable bytes of UTF-8.
#[no_mangle]
pub unsafe extern "C" fn rtmp_open(url: *const c_char, url_len: usize) -> i64 {
    enter_value(|| {
        let url = unsafe { parse_str(url, url_len)? };
        SessionManager::global()?.open(url)
    })
}

/// Set stream metadata; media is accepted afterwards.
#[no_mangle]
pub extern "C" fn rtmp_set_metadata(
    handle: i64,
    width: i32,
    height: i32,
    video_bitrate: i32,
    fps: i32,
    audio_sample_rate: i32,
    audio_channels: i32,
) -> i32 {
    enter(|| {
        let metadata = Metadata::from_raw(
            width,
            height,
            video_bitrate,
            fps,
            audio_sample_rate,
            audio_channels,
        )?;
        SessionManager::global()?.set_metadata(handle, metadata)
    })
}

/// Queue an H.264 access unit. The bytes are copied before returning.
///
/// # Safety
/// `data` must point to `size` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rtmp_send_video(
    handle: i64,
    data: *const u8,
    size: i32,
    timestamp_us: i64,
    keyframe: bool,
) -> i32 {
    enter(|| {
        let data = unsafe { parse_payload(data, size)? };
        SessionManager::global()?.send_video(handle, data, timestamp_us, keyframe)
    })
}

/// Queue an H.264 access unit read from `addr + offset`.
///
/// # Safety
/// `size` bytes at `addr + offset` must be readable until this returns.
#[no_mangle]
pub unsafe extern "C" fn rtmp_send_video_zero_copy(
    handle: i64,
    addr: i64,
    offset: i32,
    size: i32,
    timestamp_us: i64,
    keyframe: bool,
) -> i32 {
    enter(|| unsafe {
        SessionManager::global()?.send_video_zero_copy(
            handle,
            addr,
            offset as i64,
            size as i64,
            timestamp_us,
            keyframe,
        )
    })
}

/// Queue an AAC frame. The bytes are copied before returning.
///
/// # Safety
/// `data` must point to `size` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rtmp_send_audio(handle: i64, data: *const u8, size: i32, timestamp_us: i64) -> i32 {
    enter(|| {
        let data = unsafe { parse_payload(data, size)? };
        SessionManager::global()?.send_audio(handle, data, timestamp_us)
    })
}

/// Queue an AAC frame read from `addr + offset`.
///
/// # Safety
/// `size` bytes at `addr + offset` must be readable until this returns.
#[no_mangle]
pub unsafe extern "C" fn rtmp_send_audio_zero_copy(
    handle: i64,
    addr: i64,
    offset: i32,
    size: i32,
    timestamp_us: i64,
) -> i32 {
    enter(|| unsafe {
        SessionManager::global()?.send_audio_zero_copy(handle, addr, offset as i64, size as i64, timestamp_us)
    })
}

/// Copy the latest statistics into `out`.
///
/// # Safety
/// `out` must be valid for a write of one [`RtmpStats`].
#[no_mangle]
pub unsafe extern "C" fn rtmp_get_stats(handle: i64, out: *mut RtmpStats) -> i32 {
    enter(|| -> Result<()> {
        if out.is_null() {
            return Err(BufferError::NullAddress.into());
        }
        let stats = SessionManager::global()?.stats(handle)?;
        let snapshot = RtmpStats {
            bytes_sent: i64::try_from(stats.bytes_sent).unwrap_or(i64::MAX),
            latency_ms: i64::try_from(stats.latency_ms).unwrap_or(i64::MAX),
            loss_percent: stats.loss_percent as i64,
        };
        unsafe { out.write(snapshot) };
        Ok(())
    })
}

/// Close a session. Closing an unknown handle returns `InvalidHandle`.
#[no_mangle]
pub extern "C" fn rtmp_close(handle: i64) -> i32 {
    enter(|| SessionManager::global()?.close(handle))
}

/// Register caller-owned memory. Returns a buffer handle, or 0 on failure.
#[no_mangle]
pub extern "C" fn rtmp_buffer_acquire(addr: i64, len: i64) -> i64 {
    enter_value(|| Ok(buffers().acquire(addr, len)?.into()))
}

/// Platform buffer callbacks: `lock` maps the buffer and stores its length,
/// returning null on failure; `unlock` undoes a successful lock.
pub type LockFn = extern "C" fn(user_data: *mut c_void, len: *mut usize) -> *const u8;
pub type UnlockFn = extern "C" fn(user_data: *mut c_void);

struct ForeignBuffer {
    user_data: *mut c_void,
    lock: LockFn,
    unlock: UnlockFn,
}

// The platform side guarantees its callbacks may run on any thread
unsafe impl Send for ForeignBuffer {}

impl HardwareBuffer for ForeignBuffer {
    fn lock(&mut self) -> Option<MemoryRegion> {
        let mut len = 0usize;
        let ptr = (self.lock)(self.user_data, &mut len);
        if ptr.is_null() {
            return None;
        }
        match MemoryRegion::from_ptr(ptr, len) {
            Ok(region) => Some(region),
            Err(_) => {
                // The platform lock succeeded; undo it before reporting failure
                (self.unlock)(self.user_data);
                None
            }
        }
    }

    fn unlock(&mut self) {
        (self.unlock)(self.user_data)
    }
}

/// Register a platform buffer locked and unlocked through callbacks.
/// Returns a buffer handle, or 0 on failure.
///
/// # Safety
/// `user_data` must stay valid until the buffer is released, and the
/// callbacks must be safe to call from any thread.
#[no_mangle]
pub unsafe extern "C" fn rtmp_buffer_acquire_hardware(
    user_data: *mut c_void,
    lock: LockFn,
    unlock: UnlockFn,
) -> i64 {
    enter_value(|| {
        let buffer = ForeignBuffer {
            user_data,
            lock,
            unlock,
        };
        Ok(buffers().acquire_hardware(Box::new(buffer))?.into())
    })
}

/// Lock a buffer for reading. Returns its address, or 0 on failure.
#[no_mangle]
pub extern "C" fn rtmp_buffer_lock(buffer: i64) -> i64 {
    enter_value(|| {
        let addr = buffers().lock(buffer_id(buffer)?)?;
        Ok(addr as i64)
    })
}

#[no_mangle]
pub extern "C" fn rtmp_buffer_unlock(buffer: i64) -> i32 {
    enter(|| buffers().unlock(buffer_id(buffer)?))
}

/// Forget a buffer. It must be unlocked first.
#[no_mangle]
pub extern "C" fn rtmp_buffer_release(buffer: i64) -> i32 {
    enter(|| buffers().release(buffer_id(buffer)?))
}

/// Queue an H.264 access unit read from an acquired buffer.
///
/// The buffer is read under the caller's lock if it holds one, otherwise it
/// is locked and unlocked around the read.
#[no_mangle]
pub extern "C" fn rtmp_send_video_buffer(
    handle: i64,
    buffer: i64,
    offset: i32,
    size: i32,
    timestamp_us: i64,
    keyframe: bool,
) -> i32 {
    enter(|| {
        let manager = SessionManager::global()?;
        let mut table = buffers();
        let borrowed = table.borrow(buffer_id(buffer)?)?;
        let data = borrowed.read(offset as i64, size as i64)?;
        manager.send_video(handle, data, timestamp_us, keyframe)
    })
}

/// Queue an AAC frame read from an acquired buffer.
#[no_mangle]
pub extern "C" fn rtmp_send_audio_buffer(
    handle: i64,
    buffer: i64,
    offset: i32,
    size: i32,
    timestamp_us: i64,
) -> i32 {
    enter(|| {
        let manager = SessionManager::global()?;
        let mut table = buffers();
        let borrowed = table.borrow(buffer_id(buffer)?)?;
        let data = borrowed.read(offset as i64, size as i64)?;
        manager.send_audio(handle, data, timestamp_us)
    })
}

/// Install a log subscriber with the given filter directives.
///
/// # Safety
/// `filter` must point to `filter_len` readable bytes of UTF-8.
#[no_mangle]
pub unsafe extern "C" fn rtmp_log_level(filter: *const c_char, filter_len: usize) -> i32 {
    enter(|| {
        let filter = unsafe { parse_str(filter, filter_len)? };
        crate::logging::init(filter)
    })
}
