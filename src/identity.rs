//! Stable identity for a file: the serial of its containing volume, its
//! 128-bit file reference number, and its most recent journal record.
//!
//! The two pieces come from different OS facilities with different
//! availability guarantees, so the identity is composed from independently
//! obtained halves rather than derived from the record alone.

use crate::RESERVED_USN;
use crate::errors::JournalError;
use crate::record::{ChangeRecord, FileId, VolumeSerial};

/// Versioned identity of one file on one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub volume_serial: VolumeSerial,
    pub fid: FileId,
    /// The file's most recent journal record.
    pub record: ChangeRecord,
}

/// Compose an identity from its two pieces.
///
/// A record carrying the reserved zero cursor means the journal has never
/// recorded the file (disabled journal, or the file predates it); that is a
/// miss, never a zero-filled identity.
pub fn compose(
    volume_serial: VolumeSerial,
    record: ChangeRecord,
) -> Result<FileIdentity, JournalError> {
    if record.usn == RESERVED_USN {
        return Err(JournalError::NoRecord);
    }
    Ok(FileIdentity {
        volume_serial,
        fid: record.fid,
        record,
    })
}

#[cfg(windows)]
pub use self::os::{resolve_handle, resolve_path};

#[cfg(windows)]
mod os {
    use std::ffi::c_void;
    use std::mem::size_of;
    use std::path::Path;

    use log::debug;
    use windows::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_INVALID_FUNCTION, ERROR_JOURNAL_NOT_ACTIVE,
    };
    use windows::Win32::System::IO::DeviceIoControl;
    use windows::Win32::System::Ioctl::{FSCTL_READ_FILE_USN_DATA, READ_FILE_USN_DATA};

    use super::{FileIdentity, compose};
    use crate::codec;
    use crate::errors::JournalError;
    use crate::journal::{MAX_MAJOR_VERSION, MIN_MAJOR_VERSION};
    use crate::record::ChangeRecord;
    use crate::volume::{self, OwnedHandle};

    // A single record tops out under 600 bytes; leave slack for future minors.
    const FILE_RECORD_BUFFER_SIZE: usize = 1024;

    /// Resolve the identity of the file at `path`.
    ///
    /// The file handle is scoped to this call and closed before it returns.
    pub fn resolve_path(path: &Path) -> Result<FileIdentity, JournalError> {
        let handle = volume::open_file(path)?;
        resolve_handle(&handle)
    }

    /// Resolve the identity of an already-open file handle.
    pub fn resolve_handle(handle: &OwnedHandle) -> Result<FileIdentity, JournalError> {
        let record = read_file_record(handle)?.ok_or(JournalError::NoRecord)?;
        let serial = volume::handle_serial(handle)?;
        compose(serial, record)
    }

    /// The single most recent journal record for an open file handle, or
    /// `None` when the journal has nothing for it.
    fn read_file_record(handle: &OwnedHandle) -> Result<Option<ChangeRecord>, JournalError> {
        let input = READ_FILE_USN_DATA {
            MinMajorVersion: MIN_MAJOR_VERSION,
            MaxMajorVersion: MAX_MAJOR_VERSION,
        };
        let mut buf = vec![0u8; FILE_RECORD_BUFFER_SIZE];
        let mut bytes_read = 0u32;

        if let Err(err) = unsafe {
            DeviceIoControl(
                handle.raw(),
                FSCTL_READ_FILE_USN_DATA,
                Some(&input as *const _ as _),
                size_of::<READ_FILE_USN_DATA>() as u32,
                Some(buf.as_mut_ptr() as *mut c_void),
                buf.len() as u32,
                Some(&mut bytes_read),
                None,
            )
        } {
            let code = err.code();
            // Journal off, unsupported volume or no access: "no data", not fatal.
            if code == ERROR_JOURNAL_NOT_ACTIVE.into()
                || code == ERROR_INVALID_FUNCTION.into()
                || code == ERROR_ACCESS_DENIED.into()
            {
                debug!("no journal record available for handle: {err}");
                return Ok(None);
            }
            return Err(JournalError::Unexpected {
                op: "read file record",
                code: code.0,
            });
        }

        let record = codec::decode_file_record(&buf[..bytes_read as usize])?;
        Ok(Some(record))
    }
}
