//! # change-journal
//!
//! A Rust library for decoding and navigating the NTFS/ReFS USN change journal.
//!
//! The change journal is an append-only, kernel-maintained log of filesystem
//! mutation events, keyed by a monotonically increasing cursor (the USN). This
//! crate turns the raw buffers handed back by the journal ioctls into typed
//! change records, drives the cursor-based read protocol with timeout and
//! over-read tolerance, and resolves collision-aware identities for volumes
//! (by serial number) and for files within them (128-bit file reference
//! number plus USN).
//!
//! ## Features
//! - Field-by-field decoding of `USN_RECORD_V2` and `USN_RECORD_V3` buffers,
//!   bounds-checked end to end — no struct overlays on ioctl memory
//! - Cursor-based journal reads as a Rust iterator, with an explicit outcome
//!   (resulting cursor, timeout flag, typed failure) once the read finishes
//! - A serial-number registry of local volumes that detects and poisons
//!   ambiguous serials instead of resolving them silently
//! - Stable file identities with long/short volume-serial fallback
//!
//! ## Example: walk the change journal
//! ```ignore
//! use change_journal::journal::{DeviceJournal, JournalClient, ReadOptions};
//! use change_journal::volume::{self, AccessMode, VolumePath};
//!
//! let mode = AccessMode::detect()?;
//! let path = VolumePath::from_drive_letter('C')?;
//! let handle = volume::open_volume(&path, mode)?;
//! let mut client = JournalClient::new(DeviceJournal::new(&handle, mode))?;
//! let start = client.descriptor().first_usn;
//! for record in client.read(ReadOptions { start_usn: start, ..Default::default() }) {
//!     println!("usn={} reason={} name={}", record.usn, record.reason_to_string(), record.file_name);
//! }
//! ```
//!
//! ## Platform
//! - The decoding engine, protocol loop and registry core are plain Rust and
//!   build everywhere; the `DeviceIoControl` boundary compiles on Windows only
//! - Unprivileged processes use the share-form volume path and the
//!   unprivileged read control code; elevated processes use the device form
//!
//! ## License
//! MIT License.

pub mod codec;
pub mod errors;
pub mod identity;
pub mod journal;
pub mod record;
pub mod registry;
pub mod volume;

mod time;

#[cfg(windows)]
mod privilege;

// Shared fixtures for cargo tests: synthetic record buffers and a scripted
// journal boundary.
#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use errors::{DecodeError, JournalError, OpenError};

/// A convenient type alias for Results with JournalError.
pub type UsnResult<T> = std::result::Result<T, JournalError>;

/// Journal cursor: totally ordered within one journal instance of one volume.
pub type Usn = u64;

/// Reserved cursor value meaning "no journal activity recorded". Never a
/// legitimate read position.
pub const RESERVED_USN: Usn = 0;

pub(crate) const DEFAULT_BUFFER_SIZE: usize = 64 * 1024; // 64KB

pub const USN_REASON_MASK_ALL: u32 = 0xFFFF_FFFF;
