//! Best-effort named-pipe sink feeding the on-screen display.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::OverlayConfig;

const FIFO_MODE: libc::mode_t = 0o666;

/// Write end of the overlay FIFO, opened read-write and non-blocking so
/// neither open nor write waits for a reader.
#[derive(Debug)]
pub struct OverlaySink {
    file: File,
    path: PathBuf,
}

impl OverlaySink {
    /// Open the FIFO, creating it as needed.
    ///
    /// Returns `None` once every attempt has failed; the caller runs without
    /// an overlay in that case.
    pub fn open(config: &OverlayConfig) -> Option<Self> {
        let path = config.path.as_path();
        match open_nonblocking(path) {
            Ok(file) => return Some(Self::opened(file, path)),
            Err(err) => debug!(path = %path.display(), error = %err, "overlay FIFO not available yet"),
        }

        for attempt in 1..=config.max_attempts {
            if let Err(err) = make_fifo(path) {
                if err.kind() != io::ErrorKind::AlreadyExists {
                    warn!(path = %path.display(), attempt, error = %err, "creating overlay FIFO failed");
                }
            }
            match open_nonblocking(path) {
                Ok(file) => return Some(Self::opened(file, path)),
                Err(err) => {
                    warn!(path = %path.display(), attempt, error = %err, "opening overlay FIFO failed");
                }
            }
            if attempt < config.max_attempts {
                thread::sleep(config.backoff);
            }
        }

        error!(path = %path.display(), attempts = config.max_attempts, "giving up on overlay FIFO");
        None
    }

    fn opened(file: File, path: &Path) -> Self {
        info!(path = %path.display(), "overlay FIFO opened");
        Self {
            file,
            path: path.to_path_buf(),
        }
    }

    /// Write one payload. May be partial or fail with `WouldBlock` when the
    /// reader lags.
    pub fn write(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.file.write(payload)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

fn make_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    // SAFETY: c_path is a valid NUL-terminated string.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
