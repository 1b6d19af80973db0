//! Volume addressing, access modes and handles.
//!
//! Journal operations come in privileged and unprivileged variants, and each
//! wants a different spelling of the volume root: the device form (no trailing
//! separator) for elevated processes, the share form (trailing separator) for
//! everyone else. The mode is established once at session construction and
//! threaded through every call that opens a handle or picks a control code —
//! it is never re-read from ambient process state mid-operation.

use std::fmt;

use crate::errors::{JournalError, OpenError};

/// Which journal access variant this session uses. Selects both the volume
/// path form and the read control code; must stay the same for the query and
/// read operations of one journal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Elevated: device-form paths, privileged read control code.
    Privileged,
    /// Share-form paths and the unprivileged read control code.
    Unprivileged,
}

impl AccessMode {
    /// Pick the mode for this process from its token elevation.
    #[cfg(windows)]
    pub fn detect() -> Result<Self, JournalError> {
        let elevated = crate::privilege::is_elevated().map_err(|err| JournalError::Unexpected {
            op: "detect elevation",
            code: err.code().0,
        })?;
        Ok(if elevated {
            AccessMode::Privileged
        } else {
            AccessMode::Unprivileged
        })
    }
}

pub(crate) const SEPARATOR: char = '\\';

/// Canonical, validated path of a volume root.
///
/// Stored in share form; [`VolumePath::device_form`] strips the trailing
/// separator for privileged opens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumePath(String);

impl VolumePath {
    pub fn new(raw: impl Into<String>) -> Result<Self, JournalError> {
        let raw = raw.into();
        let trimmed = raw.trim_end_matches(SEPARATOR);
        if trimmed.is_empty() || raw.contains('\0') {
            return Err(JournalError::Open {
                path: raw,
                reason: OpenError::BadPath,
            });
        }
        Ok(VolumePath(format!("{trimmed}{SEPARATOR}")))
    }

    /// Volume root for a drive letter, e.g. `\\.\C:\`.
    pub fn from_drive_letter(drive_letter: char) -> Result<Self, JournalError> {
        if !drive_letter.is_ascii_alphabetic() {
            return Err(JournalError::Open {
                path: drive_letter.to_string(),
                reason: OpenError::BadPath,
            });
        }
        VolumePath::new(format!(r"\\.\{drive_letter}:{SEPARATOR}"))
    }

    /// Share form: trailing separator. What unprivileged opens use.
    pub fn share_form(&self) -> &str {
        &self.0
    }

    /// Device form: no trailing separator. What privileged opens use.
    pub fn device_form(&self) -> &str {
        self.0.trim_end_matches(SEPARATOR)
    }

    /// The spelling an open in `mode` must pass to the OS.
    pub fn open_form(&self, mode: AccessMode) -> &str {
        match mode {
            AccessMode::Privileged => self.device_form(),
            AccessMode::Unprivileged => self.share_form(),
        }
    }
}

impl fmt::Display for VolumePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(windows)]
pub use self::os::{
    OwnedHandle, enumerate_volume_paths, handle_serial, long_identity, open_file, open_volume,
    short_serial,
};

#[cfg(windows)]
mod os {
    use std::ffi::c_void;
    use std::mem::size_of;
    use std::path::Path;

    use log::{debug, warn};
    use windows::Win32::Foundation::{
        CloseHandle, ERROR_ACCESS_DENIED, ERROR_BAD_PATHNAME, ERROR_CANT_ACCESS_FILE,
        ERROR_FILE_NOT_FOUND, ERROR_INVALID_FUNCTION, ERROR_INVALID_PARAMETER,
        ERROR_LOCK_VIOLATION, ERROR_NO_MORE_FILES, ERROR_NOT_READY, ERROR_PATH_NOT_FOUND,
        ERROR_SHARING_VIOLATION, ERROR_TIMEOUT, FVE_E_LOCKED_VOLUME, HANDLE,
    };
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_GENERIC_READ, FILE_ID_INFO,
        FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, FileIdInfo, FindFirstVolumeW,
        FindNextVolumeW, FindVolumeClose, GetFileInformationByHandleEx,
        GetVolumeInformationByHandleW, OPEN_EXISTING,
    };
    use windows::core::HSTRING;

    use super::{AccessMode, VolumePath};
    use crate::errors::{JournalError, OpenError};
    use crate::record::{FileId, VolumeSerial};

    /// Exclusively owned Win32 handle, closed when dropped.
    #[derive(Debug)]
    pub struct OwnedHandle(HANDLE);

    impl OwnedHandle {
        pub(crate) fn raw(&self) -> HANDLE {
            self.0
        }
    }

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            if !self.0.is_invalid() {
                unsafe {
                    let _ = CloseHandle(self.0);
                }
            }
        }
    }

    /// Open a handle to a volume root in the form the access mode requires.
    pub fn open_volume(path: &VolumePath, mode: AccessMode) -> Result<OwnedHandle, JournalError> {
        open_raw(path.open_form(mode))
    }

    /// Open an existing file or directory for identity queries.
    pub fn open_file(path: &Path) -> Result<OwnedHandle, JournalError> {
        open_raw(&path.to_string_lossy())
    }

    fn open_raw(target: &str) -> Result<OwnedHandle, JournalError> {
        match unsafe {
            CreateFileW(
                &HSTRING::from(target),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS,
                None,
            )
        } {
            Ok(handle) => Ok(OwnedHandle(handle)),
            Err(err) => {
                let reason = map_open_error(&err);
                warn!("open failed, target={target}, reason={reason}");
                Err(JournalError::Open {
                    path: target.to_string(),
                    reason,
                })
            }
        }
    }

    fn map_open_error(err: &windows::core::Error) -> OpenError {
        let code = err.code();
        if code == ERROR_FILE_NOT_FOUND.into() {
            OpenError::NotFound
        } else if code == ERROR_PATH_NOT_FOUND.into() {
            OpenError::PathNotFound
        } else if code == ERROR_SHARING_VIOLATION.into() {
            OpenError::SharingViolation
        } else if code == ERROR_ACCESS_DENIED.into() {
            OpenError::AccessDenied
        } else if code == ERROR_LOCK_VIOLATION.into() {
            OpenError::LockViolation
        } else if code == ERROR_NOT_READY.into() {
            OpenError::DeviceNotReady
        } else if code == FVE_E_LOCKED_VOLUME {
            OpenError::LockedVolume
        } else if code == ERROR_TIMEOUT.into() {
            OpenError::Timeout
        } else if code == ERROR_CANT_ACCESS_FILE.into() {
            OpenError::CannotAccess
        } else if code == ERROR_BAD_PATHNAME.into() {
            OpenError::BadPath
        } else {
            OpenError::Unknown(code.0)
        }
    }

    /// Long-form identity of an open handle: 64-bit volume serial plus 128-bit
    /// file reference number.
    pub fn long_identity(
        handle: &OwnedHandle,
    ) -> windows::core::Result<(VolumeSerial, FileId)> {
        let mut info = FILE_ID_INFO::default();
        unsafe {
            GetFileInformationByHandleEx(
                handle.raw(),
                FileIdInfo,
                &mut info as *mut _ as *mut c_void,
                size_of::<FILE_ID_INFO>() as u32,
            )?;
        }
        Ok((
            VolumeSerial::from_long(info.VolumeSerialNumber),
            FileId::from_le_bytes(info.FileId.Identifier),
        ))
    }

    /// Short 32-bit volume serial, always available.
    pub fn short_serial(handle: &OwnedHandle) -> windows::core::Result<VolumeSerial> {
        let mut serial = 0u32;
        unsafe {
            GetVolumeInformationByHandleW(
                handle.raw(),
                None,
                Some(&mut serial as *mut u32),
                None,
                None,
                None,
            )?;
        }
        Ok(VolumeSerial::from_short(serial))
    }

    /// Volume serial for an open handle: long form when the system supports
    /// it, short form otherwise.
    pub fn handle_serial(handle: &OwnedHandle) -> Result<VolumeSerial, JournalError> {
        match long_identity(handle) {
            Ok((serial, _)) => Ok(serial),
            Err(err)
                if err.code() == ERROR_INVALID_PARAMETER.into()
                    || err.code() == ERROR_INVALID_FUNCTION.into() =>
            {
                debug!("FileIdInfo unsupported, falling back to the short volume serial");
                short_serial(handle).map_err(|err| JournalError::Unexpected {
                    op: "short volume serial",
                    code: err.code().0,
                })
            }
            Err(err) => Err(JournalError::Unexpected {
                op: "volume identity",
                code: err.code().0,
            }),
        }
    }

    /// Canonical volume GUID path of every locally visible volume.
    pub fn enumerate_volume_paths() -> Result<Vec<VolumePath>, JournalError> {
        let mut name = [0u16; 64]; // Enough space for a volume GUID path
        let find = unsafe { FindFirstVolumeW(&mut name) }.map_err(|err| {
            JournalError::Unexpected {
                op: "enumerate volumes",
                code: err.code().0,
            }
        })?;

        let mut paths = Vec::new();
        loop {
            match VolumePath::new(wide_to_string(&name)) {
                Ok(path) => paths.push(path),
                Err(err) => warn!("skipping volume with invalid path: {err}"),
            }

            if let Err(err) = unsafe { FindNextVolumeW(find, &mut name) } {
                let done = err.code() == ERROR_NO_MORE_FILES.into();
                unsafe {
                    let _ = FindVolumeClose(find);
                }
                if done {
                    break;
                }
                return Err(JournalError::Unexpected {
                    op: "enumerate volumes",
                    code: err.code().0,
                });
            }
        }

        Ok(paths)
    }

    fn wide_to_string(wide: &[u16]) -> String {
        let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
        String::from_utf16_lossy(&wide[..end])
    }
}
