//! Cursor-based read protocol over the change journal.
//!
//! The client queries journal metadata once, then drives physical reads at a
//! caller-owned cursor. Each successful read hands a buffer to the codec and
//! advances the cursor to the value the OS reported in the buffer's first
//! word. Records are delivered synchronously and in order; nothing is
//! buffered beyond one physical read, so memory stays bounded regardless of
//! journal size.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::codec;
use crate::errors::JournalError;
use crate::record::ChangeRecord;
use crate::{DEFAULT_BUFFER_SIZE, USN_REASON_MASK_ALL, Usn};

/// Oldest record layout the protocol requests from the OS.
pub const MIN_MAJOR_VERSION: u16 = 2;
/// Newest record layout the protocol requests from the OS.
pub const MAX_MAJOR_VERSION: u16 = 3;

/// Journal metadata returned by a successful query.
///
/// `journal_id` changes whenever the journal is recreated, invalidating every
/// cursor previously issued for the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalDescriptor {
    pub journal_id: u64,
    pub first_usn: Usn,
    pub next_usn: Usn,
    pub lowest_valid_usn: Usn,
    pub max_usn: Usn,
    pub maximum_size: u64,
    pub allocation_delta: u64,
}

/// One read request crossing the OS boundary.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    pub journal_id: u64,
    pub start_usn: Usn,
    pub reason_mask: u32,
    pub only_on_close: bool,
}

/// A failed physical read.
///
/// Certain failure statuses have been observed to still report a meaningful
/// next cursor in the output buffer; when the OS supplies one it is carried
/// here and callers must use it rather than assume the cursor is gone.
#[derive(Debug)]
pub struct ReadFailure {
    pub error: JournalError,
    pub next_usn: Option<Usn>,
}

/// OS boundary for one volume's journal session.
///
/// The real implementation issues `DeviceIoControl`; tests script the
/// boundary with canned buffers.
pub trait JournalIo {
    /// Query journal metadata for the volume.
    fn query_journal(&mut self) -> Result<JournalDescriptor, JournalError>;

    /// One physical read at `req.start_usn` into `buf`. Returns the number of
    /// bytes written; 0 means the end of currently available journal data.
    fn read_journal(&mut self, req: &ReadRequest, buf: &mut [u8])
    -> Result<usize, ReadFailure>;
}

/// Policy for one read cycle.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub start_usn: Usn,
    /// Stop once the cursor reaches or passes this value.
    pub end_usn: Option<Usn>,
    /// Additional physical reads allowed after the end cursor is reached; the
    /// OS may return more or fewer records than exactly up to the end cursor
    /// in one read.
    pub extra_reads: u32,
    /// Soft wall-clock budget, sampled between physical reads.
    pub time_limit: Option<Duration>,
    pub reason_mask: u32,
    pub only_on_close: bool,
    pub buffer_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            start_usn: 0,
            end_usn: None,
            extra_reads: 0,
            time_limit: None,
            reason_mask: USN_REASON_MASK_ALL,
            only_on_close: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Protocol client for one volume's journal session.
#[derive(Debug)]
pub struct JournalClient<Io: JournalIo> {
    io: Io,
    descriptor: JournalDescriptor,
}

impl<Io: JournalIo> JournalClient<Io> {
    /// Query the journal and wrap the boundary into a client.
    pub fn new(mut io: Io) -> Result<Self, JournalError> {
        let descriptor = io.query_journal()?;
        debug!("change journal descriptor: {descriptor:?}");
        Ok(JournalClient { io, descriptor })
    }

    /// Metadata captured when the client was constructed.
    pub fn descriptor(&self) -> &JournalDescriptor {
        &self.descriptor
    }

    /// Re-query the journal, refreshing the cached descriptor.
    pub fn requery(&mut self) -> Result<JournalDescriptor, JournalError> {
        self.descriptor = self.io.query_journal()?;
        Ok(self.descriptor)
    }

    /// Read records starting at `start_usn` with default policy.
    pub fn read_from(&mut self, start_usn: Usn) -> JournalRead<'_, Io> {
        self.read(ReadOptions {
            start_usn,
            ..Default::default()
        })
    }

    /// Read records under an explicit policy.
    pub fn read(&mut self, options: ReadOptions) -> JournalRead<'_, Io> {
        JournalRead {
            io: &mut self.io,
            journal_id: self.descriptor.journal_id,
            usn: options.start_usn,
            end_usn: options.end_usn,
            extra_reads: options.extra_reads,
            time_limit: options.time_limit,
            reason_mask: options.reason_mask,
            only_on_close: options.only_on_close,
            buffer: vec![0u8; options.buffer_size],
            started: Instant::now(),
            pending: Vec::new().into_iter(),
            outcome: None,
        }
    }
}

/// How a finished read cycle ended.
///
/// A timeout is success with `timed_out` set — partial progress is not an
/// error. On failure `next_usn` is still meaningful when the OS reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub next_usn: Usn,
    pub timed_out: bool,
    pub error: Option<JournalError>,
}

impl ReadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Lazy iterator over one read cycle's records.
///
/// Iteration ends when the journal has no more data, the end-cursor policy is
/// satisfied, the time budget lapses, or a read fails; [`JournalRead::outcome`]
/// then says which it was and where the cursor landed.
pub struct JournalRead<'a, Io: JournalIo> {
    io: &'a mut Io,
    journal_id: u64,
    usn: Usn,
    end_usn: Option<Usn>,
    extra_reads: u32,
    time_limit: Option<Duration>,
    reason_mask: u32,
    only_on_close: bool,
    buffer: Vec<u8>,
    started: Instant,
    pending: std::vec::IntoIter<ChangeRecord>,
    outcome: Option<ReadOutcome>,
}

impl<Io: JournalIo> JournalRead<'_, Io> {
    /// Cursor the next physical read would start from.
    pub fn next_usn(&self) -> Usn {
        self.usn
    }

    /// Set once iteration has finished.
    pub fn outcome(&self) -> Option<&ReadOutcome> {
        self.outcome.as_ref()
    }

    /// Drain the remaining records and return the final outcome.
    pub fn finish(mut self) -> ReadOutcome {
        for _ in self.by_ref() {}
        self.outcome.clone().unwrap_or(ReadOutcome {
            next_usn: self.usn,
            timed_out: false,
            error: None,
        })
    }

    fn stop(&mut self, error: Option<JournalError>, timed_out: bool) {
        self.outcome = Some(ReadOutcome {
            next_usn: self.usn,
            timed_out,
            error,
        });
    }

    /// Run protocol iterations until a record is available or the cycle ends.
    fn refill(&mut self) -> Option<ChangeRecord> {
        loop {
            if self.outcome.is_some() {
                return None;
            }

            // Once the cursor reaches or passes the requested end, each
            // further pass spends one unit of the extra-read allowance.
            if let Some(end) = self.end_usn {
                if self.usn >= end {
                    if self.extra_reads == 0 {
                        self.stop(None, false);
                        return None;
                    }
                    self.extra_reads -= 1;
                }
            }

            if let Some(limit) = self.time_limit {
                if self.started.elapsed() >= limit {
                    debug!("journal read timed out at usn {}", self.usn);
                    self.stop(None, true);
                    return None;
                }
            }

            let request = ReadRequest {
                journal_id: self.journal_id,
                start_usn: self.usn,
                reason_mask: self.reason_mask,
                only_on_close: self.only_on_close,
            };

            match self.io.read_journal(&request, &mut self.buffer) {
                Err(failure) => {
                    warn!("journal read failed at usn {}: {}", self.usn, failure.error);
                    if let Some(usn) = failure.next_usn {
                        self.usn = usn;
                    }
                    self.stop(Some(failure.error), false);
                    return None;
                }
                Ok(0) => {
                    // End of currently available journal data.
                    self.stop(None, false);
                    return None;
                }
                Ok(len) => {
                    let batch = match codec::decode_read_buffer(&self.buffer[..len]) {
                        Ok(batch) => batch,
                        Err(err) => {
                            self.stop(Some(JournalError::Decode(err)), false);
                            return None;
                        }
                    };
                    self.usn = batch.next_usn;
                    if batch.records.is_empty() {
                        self.stop(None, false);
                        return None;
                    }
                    self.pending = batch.records.into_iter();
                    return self.pending.next();
                }
            }
        }
    }
}

impl<Io: JournalIo> Iterator for JournalRead<'_, Io> {
    type Item = ChangeRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.pending.next() {
            return Some(record);
        }
        self.refill()
    }
}

#[cfg(windows)]
pub use self::device::DeviceJournal;

#[cfg(windows)]
mod device {
    use std::ffi::c_void;
    use std::mem::size_of;

    use windows::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_HANDLE_EOF, ERROR_INVALID_FUNCTION, ERROR_INVALID_PARAMETER,
        ERROR_JOURNAL_DELETE_IN_PROGRESS, ERROR_JOURNAL_ENTRY_DELETED, ERROR_JOURNAL_NOT_ACTIVE,
    };
    use windows::Win32::System::IO::DeviceIoControl;
    use windows::Win32::System::Ioctl::{
        FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_UNPRIVILEGED_USN_JOURNAL, FSCTL_READ_USN_JOURNAL,
        READ_USN_JOURNAL_DATA_V1, USN_JOURNAL_DATA_V0,
    };

    use super::{
        JournalDescriptor, JournalIo, MAX_MAJOR_VERSION, MIN_MAJOR_VERSION, ReadFailure,
        ReadRequest,
    };
    use crate::errors::JournalError;
    use crate::volume::{AccessMode, OwnedHandle};
    use crate::Usn;

    /// Journal boundary backed by `DeviceIoControl` on an open volume handle.
    ///
    /// The access mode decides which read control code is issued; it must
    /// match the form the volume handle was opened with.
    pub struct DeviceJournal<'a> {
        volume: &'a OwnedHandle,
        mode: AccessMode,
    }

    impl<'a> DeviceJournal<'a> {
        pub fn new(volume: &'a OwnedHandle, mode: AccessMode) -> Self {
            DeviceJournal { volume, mode }
        }
    }

    impl JournalIo for DeviceJournal<'_> {
        fn query_journal(&mut self) -> Result<JournalDescriptor, JournalError> {
            let data = USN_JOURNAL_DATA_V0::default();
            let mut bytes_returned = 0u32;

            if let Err(err) = unsafe {
                DeviceIoControl(
                    self.volume.raw(),
                    FSCTL_QUERY_USN_JOURNAL,
                    None,
                    0,
                    Some(&data as *const _ as *mut c_void),
                    size_of::<USN_JOURNAL_DATA_V0>() as u32,
                    Some(&mut bytes_returned),
                    None,
                )
            } {
                return Err(map_query_error(&err));
            }

            Ok(JournalDescriptor {
                journal_id: data.UsnJournalID,
                first_usn: data.FirstUsn as Usn,
                next_usn: data.NextUsn as Usn,
                lowest_valid_usn: data.LowestValidUsn as Usn,
                max_usn: data.MaxUsn as Usn,
                maximum_size: data.MaximumSize,
                allocation_delta: data.AllocationDelta,
            })
        }

        fn read_journal(
            &mut self,
            req: &ReadRequest,
            buf: &mut [u8],
        ) -> Result<usize, ReadFailure> {
            let input = READ_USN_JOURNAL_DATA_V1 {
                StartUsn: req.start_usn as i64,
                ReasonMask: req.reason_mask,
                ReturnOnlyOnClose: req.only_on_close as u32,
                Timeout: 0,
                BytesToWaitFor: 0,
                UsnJournalID: req.journal_id,
                MinMajorVersion: MIN_MAJOR_VERSION,
                MaxMajorVersion: MAX_MAJOR_VERSION,
            };
            let control = match self.mode {
                AccessMode::Privileged => FSCTL_READ_USN_JOURNAL,
                AccessMode::Unprivileged => FSCTL_READ_UNPRIVILEGED_USN_JOURNAL,
            };

            let mut bytes_read = 0u32;
            if let Err(err) = unsafe {
                DeviceIoControl(
                    self.volume.raw(),
                    control,
                    Some(&input as *const _ as _),
                    size_of::<READ_USN_JOURNAL_DATA_V1>() as u32,
                    Some(buf.as_mut_ptr() as *mut c_void),
                    buf.len() as u32,
                    Some(&mut bytes_read),
                    None,
                )
            } {
                if err.code() == ERROR_HANDLE_EOF.into() {
                    return Ok(0);
                }

                // Some failure statuses still fill in the next cursor word.
                let next_usn = if bytes_read as usize >= size_of::<Usn>() {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&buf[..8]);
                    Some(Usn::from_le_bytes(raw))
                } else {
                    None
                };

                return Err(ReadFailure {
                    error: map_read_error(&err),
                    next_usn,
                });
            }

            Ok(bytes_read as usize)
        }
    }

    fn map_query_error(err: &windows::core::Error) -> JournalError {
        let code = err.code();
        if code == ERROR_JOURNAL_NOT_ACTIVE.into() {
            JournalError::NotActive
        } else if code == ERROR_JOURNAL_DELETE_IN_PROGRESS.into() {
            JournalError::DeleteInProgress
        } else if code == ERROR_INVALID_FUNCTION.into() {
            JournalError::Unsupported
        } else if code == ERROR_INVALID_PARAMETER.into() {
            JournalError::InvalidParameter
        } else if code == ERROR_ACCESS_DENIED.into() {
            JournalError::AccessDenied
        } else {
            JournalError::Unexpected {
                op: "query journal",
                code: code.0,
            }
        }
    }

    fn map_read_error(err: &windows::core::Error) -> JournalError {
        let code = err.code();
        if code == ERROR_JOURNAL_ENTRY_DELETED.into() {
            JournalError::EntryDeleted
        } else if code == ERROR_JOURNAL_NOT_ACTIVE.into() {
            JournalError::NotActive
        } else if code == ERROR_JOURNAL_DELETE_IN_PROGRESS.into() {
            JournalError::DeleteInProgress
        } else if code == ERROR_INVALID_FUNCTION.into() {
            JournalError::Unsupported
        } else if code == ERROR_INVALID_PARAMETER.into() {
            JournalError::InvalidParameter
        } else if code == ERROR_ACCESS_DENIED.into() {
            JournalError::AccessDenied
        } else {
            JournalError::Unexpected {
                op: "read journal",
                code: code.0,
            }
        }
    }
}
