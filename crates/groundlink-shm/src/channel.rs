//! Named, fixed-size, process-shared state records.
//!
//! A [`StateChannel`] maps one `#[repr(C)]` record into this process from a
//! POSIX shared-memory object. Whichever process starts first creates the
//! object; later processes open the same storage. The object outlives every
//! process that maps it until something calls [`unlink`].
//!
//! # Concurrency contract
//!
//! There is no locking. Every field has exactly one producer process and any
//! number of consumers, and that role assignment is a convention between the
//! participating processes, not something enforced here. Whole-record
//! [`load`](StateChannel::load) and [`store`](StateChannel::store) are plain
//! volatile copies: a reader racing a writer can observe a **torn record**
//! that mixes old and new fields. Records are refreshed periodically, so a
//! reader should treat every snapshot as possibly stale and possibly torn.
//! Per-element accessors on RC arrays touch a single aligned `u16`, which is
//! never torn on supported targets.
//!
//! A handle is `Send` but not `Sync`: share state between threads by opening
//! a second handle, exactly as a second process would.

use std::ffi::CString;
use std::io;
use std::marker::PhantomData;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, ShmError};

/// Maximum POSIX shared-memory name length (NAME_MAX).
const NAME_MAX: usize = 255;

/// Permissions for created objects: owner read/write.
const CHANNEL_MODE: libc::mode_t = 0o600;

/// How opening a channel treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Keep whatever the region already holds.
    Persistent,
    /// Truncate to zero on every open. Any process that opens the channel
    /// clears it.
    Truncate,
}

/// A fixed-layout record that may live in a state channel.
///
/// # Safety
///
/// Implementers must be `#[repr(C)]`, contain no pointers or references, and
/// accept the all-zero bit pattern as a valid value, since a freshly created
/// region is zero-filled by the OS before any producer runs.
pub unsafe trait SharedRecord: Copy + Send + Sync + 'static {
    /// The well-known object name (leading `/`, no other slashes).
    const NAME: &'static str;

    /// Open behavior for this record kind.
    const OPEN_MODE: OpenMode = OpenMode::Persistent;

    /// Value written by the channel's first writer in
    /// [`default_init`](StateChannel::default_init).
    fn first_writer_defaults() -> Self;
}

/// Backoff policy for the create-or-open rendezvous.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Sleep between failed attempts.
    pub backoff: Duration,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(100),
            max_attempts: None,
        }
    }
}

/// Outcome of one create-or-open attempt.
enum Attempt<T> {
    Ready(T),
    Retry(io::Error),
    Fatal(ShmError),
}

/// A mapped state channel holding one `T`.
pub struct StateChannel<T: SharedRecord> {
    ptr: NonNull<T>,
    name: String,
    _record: PhantomData<T>,
}

// SAFETY: the mapping is owned by this handle and stays valid until drop;
// T is Send + Sync and contains no process-local pointers.
unsafe impl<T: SharedRecord> Send for StateChannel<T> {}

impl<T: SharedRecord> StateChannel<T> {
    /// Create or open the record's well-known channel, retrying forever on
    /// transient failures.
    pub fn create_or_open() -> Result<Self> {
        Self::create_or_open_named(T::NAME, &RetryPolicy::default())
    }

    /// Create or open a channel under an explicit name.
    ///
    /// `shm_open` failures are retried with `policy.backoff` because a
    /// cooperating process may be mid-startup. Failing to size or map the
    /// region is fatal and returned immediately.
    pub fn create_or_open_named(name: &str, policy: &RetryPolicy) -> Result<Self> {
        let c_name = validate_name(name)?;
        rendezvous(name, policy, || Self::try_create_or_open(name, &c_name))
    }

    /// Open the record's channel only if some process already created it.
    ///
    /// Never creates, truncates or resizes.
    pub fn open_existing() -> Result<Self> {
        Self::open_existing_named(T::NAME)
    }

    /// Open an existing channel under an explicit name.
    pub fn open_existing_named(name: &str) -> Result<Self> {
        let c_name = validate_name(name)?;
        let fd = shm_open(&c_name, libc::O_RDWR).map_err(|source| ShmError::Open {
            name: name.to_string(),
            source,
        })?;

        let actual = region_len(&fd).map_err(|source| ShmError::Map {
            name: name.to_string(),
            source,
        })?;
        if actual < size_of::<T>() as u64 {
            return Err(ShmError::SizeMismatch {
                name: name.to_string(),
                expected: size_of::<T>(),
                actual,
            });
        }

        let ptr = map_region::<T>(&fd, name)?;
        debug!(channel = name, "opened existing state channel");
        Ok(Self::from_mapping(ptr, name))
    }

    fn try_create_or_open(name: &str, c_name: &CString) -> Attempt<Self> {
        let mut flags = libc::O_RDWR | libc::O_CREAT;
        if T::OPEN_MODE == OpenMode::Truncate {
            flags |= libc::O_TRUNC;
        }

        let fd = match shm_open(c_name, flags) {
            Ok(fd) => fd,
            Err(err) => return Attempt::Retry(err),
        };

        // SAFETY: `fd` is an open shared-memory object owned by this function.
        let rc = unsafe { libc::ftruncate(fd.as_raw_fd(), size_of::<T>() as libc::off_t) };
        if rc == -1 {
            return Attempt::Fatal(ShmError::Truncate {
                name: name.to_string(),
                size: size_of::<T>(),
                source: io::Error::last_os_error(),
            });
        }

        match map_region::<T>(&fd, name) {
            Ok(ptr) => {
                debug!(channel = name, size = size_of::<T>(), "state channel ready");
                Attempt::Ready(Self::from_mapping(ptr, name))
            }
            Err(err) => Attempt::Fatal(err),
        }
    }

    fn from_mapping(ptr: NonNull<T>, name: &str) -> Self {
        Self {
            ptr,
            name: name.to_string(),
            _record: PhantomData,
        }
    }

    /// Write the record's first-writer defaults.
    ///
    /// Only the process that owns first-writer semantics for this channel
    /// should call this (e.g. the RC input process centering stick values).
    pub fn default_init(&self) {
        self.store(T::first_writer_defaults());
    }

    /// Snapshot the record. May be torn if a producer is writing concurrently.
    pub fn load(&self) -> T {
        // SAFETY: ptr is a live, page-aligned mapping of at least size_of::<T>()
        // bytes and every bit pattern written by a producer is a valid T.
        unsafe { ptr::read_volatile(self.ptr.as_ptr()) }
    }

    /// Overwrite the whole record.
    pub fn store(&self, value: T) {
        // SAFETY: see `load`.
        unsafe { ptr::write_volatile(self.ptr.as_ptr(), value) }
    }

    /// Read-modify-write the record. Not atomic with respect to other processes.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.load();
        f(&mut value);
        self.store(value);
    }

    /// The channel's object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        size_of::<T>()
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T: SharedRecord> Drop for StateChannel<T> {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in `map_region`, and no
        // borrow of it outlives this handle.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), size_of::<T>()) };
        if rc == -1 {
            debug!(channel = %self.name, error = %io::Error::last_os_error(), "munmap failed");
        }
    }
}

impl<T: SharedRecord> std::fmt::Debug for StateChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChannel")
            .field("name", &self.name)
            .field("size", &size_of::<T>())
            .finish()
    }
}

/// Drive `attempt` until it is ready, fatal, or the policy runs out.
fn rendezvous<C>(
    name: &str,
    policy: &RetryPolicy,
    mut attempt: impl FnMut() -> Attempt<C>,
) -> Result<C> {
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        match attempt() {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(source) => {
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(ShmError::RetriesExhausted {
                        name: name.to_string(),
                        attempts,
                        source,
                    });
                }
                warn!(channel = name, error = %source, attempts, "state channel not ready, retrying");
                thread::sleep(policy.backoff);
            }
        }
    }
}

/// Remove a channel name from the system.
///
/// Existing mappings stay valid; the next create-or-open starts from a fresh
/// zero-filled region.
pub fn unlink(name: &str) -> Result<()> {
    let c_name = validate_name(name)?;
    // SAFETY: c_name is a valid NUL-terminated string.
    let rc = unsafe { libc::shm_unlink(c_name.as_ptr()) };
    if rc == -1 {
        return Err(ShmError::Open {
            name: name.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<CString> {
    let invalid = |reason| ShmError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if !name.starts_with('/') {
        return Err(invalid("name must start with '/'"));
    }
    if name.len() < 2 {
        return Err(invalid("name must not be empty after '/'"));
    }
    if name[1..].contains('/') {
        return Err(invalid("name must not contain additional '/' characters"));
    }
    if name.len() > NAME_MAX {
        return Err(invalid("name length must be <= 255 bytes"));
    }
    CString::new(name).map_err(|_| invalid("name must not contain NUL bytes"))
}

fn shm_open(name: &CString, flags: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: name is NUL-terminated; the returned descriptor is checked
    // before ownership is taken.
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, CHANNEL_MODE) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly opened descriptor not owned by anything else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn region_len(fd: &OwnedFd) -> io::Result<u64> {
    // SAFETY: zeroed stat is a valid out-parameter for fstat.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd is open and st is a valid writable stat buffer.
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_size as u64)
}

fn map_region<T>(fd: &OwnedFd, name: &str) -> Result<NonNull<T>> {
    // SAFETY: fresh shared mapping of an object sized to at least
    // size_of::<T>(); mmap returns page-aligned memory, which satisfies T's
    // alignment. The descriptor may be closed after mapping.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size_of::<T>(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(ShmError::Map {
            name: name.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    NonNull::new(ptr.cast::<T>()).ok_or_else(|| ShmError::Map {
        name: name.to_string(),
        source: io::Error::other("mmap returned null"),
    })
}
