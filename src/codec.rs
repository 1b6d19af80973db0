//! Wire-format decoder for change journal read buffers.
//!
//! A read buffer starts with an 8-byte little-endian cursor (the next USN to
//! request) followed by zero or more back-to-back variable-length records.
//! Each record self-describes its length and its (major, minor) version; V2
//! and V3 records interleave freely in one buffer. Every field is read at an
//! explicit offset with explicit endianness through a bounds-checked cursor —
//! the in-memory layout of host structs is never assumed to match the wire.

use crate::errors::DecodeError;
use crate::record::{ChangeRecord, FileId};
use crate::{RESERVED_USN, Usn};

/// Record length word plus the two version words.
const RECORD_HEADER_LEN: usize = 8;

/// Bytes of one UTF-16 name character.
const NAME_CHAR_LEN: u32 = 2;

/// Journal record layout versions this codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordVersion {
    /// 64-bit file reference numbers, zero-extended on decode.
    V2,
    /// Native 128-bit file reference numbers.
    V3,
}

impl RecordVersion {
    fn from_major(major: u16, offset: usize) -> Result<Self, DecodeError> {
        match major {
            2 => Ok(RecordVersion::V2),
            3 => Ok(RecordVersion::V3),
            _ => Err(DecodeError::UnsupportedVersion { major, offset }),
        }
    }

    const fn major(self) -> u16 {
        match self {
            RecordVersion::V2 => 2,
            RecordVersion::V3 => 3,
        }
    }

    /// Fixed portion of the record, up to the start of the name bytes.
    const fn fixed_len(self) -> u32 {
        match self {
            RecordVersion::V2 => 60,
            RecordVersion::V3 => 76,
        }
    }

    /// Smallest well-formed record: fixed fields plus one name character.
    pub const fn min_len(self) -> u32 {
        self.fixed_len() + NAME_CHAR_LEN
    }

    /// Largest well-formed record: fixed fields plus 255 name characters.
    pub const fn max_len(self) -> u32 {
        self.fixed_len() + 255 * NAME_CHAR_LEN
    }
}

/// Everything one successful physical read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    /// Cursor to request on the next read.
    pub next_usn: Usn,
    /// Records in buffer order, which is cursor-increasing by construction.
    pub records: Vec<ChangeRecord>,
}

/// Bounds-checked cursor over a read buffer. Every advance is validated
/// against the remaining length before it is applied.
struct BufCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        BufCursor { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Look at the next `n` bytes without advancing.
    fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.buf.get(self.pos..self.pos.checked_add(n)?)
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.peek(n)?;
        self.pos += n;
        Some(bytes)
    }

    fn read_u64_le(&mut self) -> Option<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Some(u64::from_le_bytes(raw))
    }
}

fn u16_at(record: &[u8], offset: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&record[offset..offset + 2]);
    u16::from_le_bytes(raw)
}

fn u32_at(record: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&record[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn u64_at(record: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&record[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn u128_at(record: &[u8], offset: usize) -> u128 {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&record[offset..offset + 16]);
    u128::from_le_bytes(raw)
}

/// Decode the buffer produced by one successful journal read.
///
/// The first machine word is always the next cursor, regardless of how many
/// records follow. Any structural violation is a [`DecodeError`]; the caller
/// must treat it as fatal rather than skip ahead.
pub fn decode_read_buffer(buf: &[u8]) -> Result<DecodedBatch, DecodeError> {
    let mut cur = BufCursor::new(buf);
    let next_usn = cur
        .read_u64_le()
        .ok_or(DecodeError::MissingCursor { len: buf.len() })?;

    let mut records = Vec::new();
    while cur.remaining() > 0 {
        records.push(decode_record(&mut cur, true)?);
    }

    Ok(DecodedBatch { next_usn, records })
}

/// Decode the single-record output of the read-one-record-by-handle control
/// operation. There is no cursor prefix, and unlike a journal buffer the
/// record may carry the reserved zero cursor — that value is the caller's
/// "no data" signal, not a protocol violation.
pub fn decode_file_record(buf: &[u8]) -> Result<ChangeRecord, DecodeError> {
    let mut cur = BufCursor::new(buf);
    decode_record(&mut cur, false)
}

fn decode_record(cur: &mut BufCursor<'_>, from_journal: bool) -> Result<ChangeRecord, DecodeError> {
    let offset = cur.pos();
    let header = cur
        .peek(RECORD_HEADER_LEN)
        .ok_or(DecodeError::TruncatedHeader {
            offset,
            remaining: cur.remaining(),
        })?;

    let declared = u32_at(header, 0);
    let major = u16_at(header, 4);

    if declared as usize > cur.remaining() {
        return Err(DecodeError::RecordOverrun {
            offset,
            declared,
            remaining: cur.remaining(),
        });
    }

    let version = RecordVersion::from_major(major, offset)?;
    if declared < version.min_len() || declared > version.max_len() {
        return Err(DecodeError::LengthOutOfBounds {
            major: version.major(),
            declared,
            min: version.min_len(),
            max: version.max_len(),
        });
    }

    // The declared length is authoritative: records are padded, so the fixed
    // layout size must never be used to advance.
    let record = cur
        .take(declared as usize)
        .ok_or(DecodeError::RecordOverrun {
            offset,
            declared,
            remaining: cur.remaining(),
        })?;

    let (fid, parent_fid, fields) = match version {
        RecordVersion::V2 => (
            FileId::from_short(u64_at(record, 8)),
            FileId::from_short(u64_at(record, 16)),
            24,
        ),
        RecordVersion::V3 => (
            FileId::new(u128_at(record, 8)),
            FileId::new(u128_at(record, 24)),
            40,
        ),
    };

    let usn = u64_at(record, fields) as Usn;
    let timestamp = u64_at(record, fields + 8) as i64;
    let reason = u32_at(record, fields + 16);
    let source_info = u32_at(record, fields + 20);
    let attributes = u32_at(record, fields + 28);
    let name_len = u16_at(record, fields + 32);
    let name_offset = u16_at(record, fields + 34);

    if from_journal && usn == RESERVED_USN {
        return Err(DecodeError::ReservedUsn { offset });
    }

    let file_name = decode_name(record, version, declared, name_offset, name_len)?;

    Ok(ChangeRecord {
        usn,
        timestamp,
        fid,
        parent_fid,
        reason,
        source_info,
        attributes,
        file_name,
    })
}

fn decode_name(
    record: &[u8],
    version: RecordVersion,
    declared: u32,
    name_offset: u16,
    name_len: u16,
) -> Result<String, DecodeError> {
    if name_len == 0 {
        return Ok(String::new());
    }

    let start = name_offset as u32;
    let end = start + name_len as u32;
    if start < version.fixed_len() || end > declared {
        return Err(DecodeError::NameOutOfRange {
            name_offset,
            name_len,
            record_len: declared,
        });
    }

    let units: Vec<u16> = record[start as usize..end as usize]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{USN_REASON_CLOSE, USN_REASON_FILE_CREATE, USN_REASON_FILE_DELETE};
    use crate::test_support::{RecordSpec, encode_v2, encode_v3, read_buffer};

    #[test]
    fn decode_v2_records() {
        let first = RecordSpec::new(128, "alpha.txt");
        let second = RecordSpec {
            usn: 256,
            reason: USN_REASON_FILE_DELETE | USN_REASON_CLOSE,
            ..RecordSpec::new(256, "beta.log")
        };
        let buf = read_buffer(512, &[encode_v2(&first), encode_v2(&second)]);

        let batch = decode_read_buffer(&buf).unwrap();
        assert_eq!(batch.next_usn, 512);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].usn, 128);
        assert_eq!(batch.records[0].file_name, "alpha.txt");
        assert_eq!(batch.records[0].fid, FileId::from_short(first.fid_low));
        assert_eq!(batch.records[1].usn, 256);
        assert_eq!(
            batch.records[1].reason,
            USN_REASON_FILE_DELETE | USN_REASON_CLOSE
        );
    }

    #[test]
    fn decode_v3_records_keep_full_file_ids() {
        let spec = RecordSpec {
            fid_high: 0xdead_beef,
            parent_fid_high: 0x17,
            ..RecordSpec::new(1024, "wide.dat")
        };
        let buf = read_buffer(2048, &[encode_v3(&spec)]);

        let batch = decode_read_buffer(&buf).unwrap();
        let record = &batch.records[0];
        assert_eq!(
            record.fid.as_u128(),
            (0xdead_beefu128 << 64) | spec.fid_low as u128
        );
        assert_eq!(
            record.parent_fid.as_u128(),
            (0x17u128 << 64) | spec.parent_fid_low as u128
        );
        assert_eq!(record.file_name, "wide.dat");
    }

    #[test]
    fn versions_interleave_in_one_buffer() {
        let buf = read_buffer(
            900,
            &[
                encode_v2(&RecordSpec::new(100, "old.bin")),
                encode_v3(&RecordSpec::new(200, "new.bin")),
                encode_v2(&RecordSpec::new(300, "older.bin")),
            ],
        );

        let batch = decode_read_buffer(&buf).unwrap();
        let usns: Vec<Usn> = batch.records.iter().map(|r| r.usn).collect();
        assert_eq!(usns, vec![100, 200, 300]);
    }

    #[test]
    fn decoding_is_idempotent() {
        let buf = read_buffer(
            640,
            &[
                encode_v2(&RecordSpec::new(32, "one")),
                encode_v3(&RecordSpec::new(64, "two")),
            ],
        );

        let first = decode_read_buffer(&buf).unwrap();
        let second = decode_read_buffer(&buf).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cursor_only_buffer_yields_no_records() {
        let buf = read_buffer(4096, &[]);
        let batch = decode_read_buffer(&buf).unwrap();
        assert_eq!(batch.next_usn, 4096);
        assert!(batch.records.is_empty());
    }

    #[test]
    fn short_buffer_is_missing_cursor() {
        let err = decode_read_buffer(&[0u8; 5]).unwrap_err();
        assert_eq!(err, DecodeError::MissingCursor { len: 5 });
    }

    #[test]
    fn trailing_header_fragment_is_fatal() {
        let mut buf = read_buffer(64, &[]);
        buf.extend_from_slice(&[0u8; 4]);
        let err = decode_read_buffer(&buf).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedHeader {
                offset: 8,
                remaining: 4
            }
        );
    }

    #[test]
    fn declared_length_past_buffer_end_is_fatal() {
        let mut record = encode_v2(&RecordSpec::new(64, "chopped.txt"));
        let full_len = record.len();
        record.truncate(full_len - 8);
        let buf = read_buffer(128, &[record]);

        let err = decode_read_buffer(&buf).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::RecordOverrun {
                offset: 8,
                declared,
                ..
            } if declared as usize == full_len
        ));
    }

    #[test]
    fn unknown_major_version_is_fatal() {
        let mut record = encode_v2(&RecordSpec::new(64, "odd.txt"));
        record[4] = 4;
        record[5] = 0;
        let buf = read_buffer(128, &[record]);

        let err = decode_read_buffer(&buf).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnsupportedVersion {
                major: 4,
                offset: 8
            }
        );
    }

    #[test]
    fn length_below_version_minimum_is_fatal() {
        let mut record = encode_v2(&RecordSpec::new(64, "tiny"));
        record[0..4].copy_from_slice(&60u32.to_le_bytes());
        let buf = read_buffer(128, &[record]);

        let err = decode_read_buffer(&buf).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthOutOfBounds {
                major: 2,
                declared: 60,
                min: 62,
                max: 570
            }
        );
    }

    #[test]
    fn length_above_version_maximum_is_fatal() {
        let mut record = encode_v3(&RecordSpec::new(64, "huge"));
        record[0..4].copy_from_slice(&600u32.to_le_bytes());
        record.resize(600, 0);
        let buf = read_buffer(128, &[record]);

        let err = decode_read_buffer(&buf).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthOutOfBounds {
                major: 3,
                declared: 600,
                min: 78,
                max: 586
            }
        );
    }

    #[test]
    fn name_range_escaping_record_is_fatal() {
        let mut record = encode_v2(&RecordSpec::new(64, "name.txt"));
        // Stretch the declared name length past the record's end.
        record[56..58].copy_from_slice(&500u16.to_le_bytes());
        let declared = record.len() as u32;
        let buf = read_buffer(128, &[record]);

        let err = decode_read_buffer(&buf).unwrap_err();
        assert_eq!(
            err,
            DecodeError::NameOutOfRange {
                name_offset: 60,
                name_len: 500,
                record_len: declared
            }
        );
    }

    #[test]
    fn journal_record_at_reserved_cursor_is_fatal() {
        let buf = read_buffer(128, &[encode_v2(&RecordSpec::new(0, "ghost.txt"))]);
        let err = decode_read_buffer(&buf).unwrap_err();
        assert_eq!(err, DecodeError::ReservedUsn { offset: 8 });
    }

    #[test]
    fn padding_is_skipped_via_declared_length() {
        let padded = RecordSpec {
            pad: 16,
            ..RecordSpec::new(700, "padded.txt")
        };
        let buf = read_buffer(
            800,
            &[encode_v2(&padded), encode_v2(&RecordSpec::new(750, "next.txt"))],
        );

        let batch = decode_read_buffer(&buf).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[1].usn, 750);
        assert_eq!(batch.records[1].file_name, "next.txt");
    }

    #[test]
    fn file_record_decodes_without_cursor_prefix() {
        let spec = RecordSpec {
            reason: USN_REASON_FILE_CREATE,
            ..RecordSpec::new(96, "single.txt")
        };
        let record = decode_file_record(&encode_v3(&spec)).unwrap();
        assert_eq!(record.usn, 96);
        assert_eq!(record.file_name, "single.txt");
    }

    #[test]
    fn file_record_permits_reserved_cursor() {
        // A zero USN from the per-file read means "no activity"; the identity
        // resolver turns it into a miss, the codec must not reject it.
        let record = decode_file_record(&encode_v2(&RecordSpec::new(0, "fresh.txt"))).unwrap();
        assert_eq!(record.usn, RESERVED_USN);
    }

    #[test]
    fn empty_name_length_is_allowed() {
        let mut record = encode_v2(&RecordSpec::new(48, "x"));
        record[56..58].copy_from_slice(&0u16.to_le_bytes());
        let buf = read_buffer(64, &[record]);

        let batch = decode_read_buffer(&buf).unwrap();
        assert_eq!(batch.records[0].file_name, "");
    }
}
