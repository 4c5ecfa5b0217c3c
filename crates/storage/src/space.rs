//! Filesystem space statistics

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Free and total space of a filesystem, computed on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageState {
    pub available_bytes: u64,
    pub total_bytes: u64,
}

impl StorageState {
    /// Available space in (decimal) gigabytes
    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / 1e9
    }

    /// Total space in (decimal) gigabytes
    pub fn total_gb(&self) -> f64 {
        self.total_bytes as f64 / 1e9
    }
}

/// Source of filesystem space statistics
pub trait SpaceProbe: Send + Sync {
    fn state(&self, path: &Path) -> io::Result<StorageState>;
}

/// `statvfs(3)` backed probe
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn state(&self, path: &Path) -> io::Result<StorageState> {
        let c_path = CString::new(path.as_os_str().as_bytes())?;

        // SAFETY: statvfs is plain old data; zeroed is a valid bit pattern
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        let frsize = stat.f_frsize as u64;
        Ok(StorageState {
            available_bytes: frsize * stat.f_bfree as u64,
            total_bytes: frsize * stat.f_blocks as u64,
        })
    }
}
