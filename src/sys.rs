//! Safe wrappers for platform calls.
//!
//! Every `unsafe` block in the crate lives here.

use std::path::Path;

/// Available disk space in bytes on the filesystem containing `path`.
///
/// Returns `None` when the platform is unsupported or `statvfs` fails.
#[cfg(unix)]
pub fn available_disk_bytes(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: statvfs receives a valid NUL-terminated path and a zeroed struct;
    // fields are only read after a successful return.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return None;
        }
        Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

#[cfg(not(unix))]
pub fn available_disk_bytes(_path: &Path) -> Option<u64> {
    None
}

/// Ask the allocator to hand freed pages back to the OS.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn release_memory() {
    // SAFETY: malloc_trim has no preconditions and only touches allocator state.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn release_memory() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_available_disk_bytes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(available_disk_bytes(dir.path()).is_some());
        assert!(available_disk_bytes(&dir.path().join("does/not/exist")).is_none());
    }

    #[test]
    fn test_release_memory_is_harmless() {
        release_memory();
        release_memory();
    }
}
