//! Shared fixtures for cargo tests: synthetic record buffers in both wire
//! layouts, and a scripted journal boundary that stands in for the ioctls.

use std::collections::VecDeque;

use crate::Usn;
use crate::errors::JournalError;
use crate::journal::{JournalDescriptor, JournalIo, ReadFailure, ReadRequest};
use crate::record::USN_REASON_FILE_CREATE;

/// Inputs for one synthetic record.
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub usn: Usn,
    pub fid_low: u64,
    pub fid_high: u64,
    pub parent_fid_low: u64,
    pub parent_fid_high: u64,
    pub reason: u32,
    pub timestamp: i64,
    pub source_info: u32,
    pub attributes: u32,
    pub name: String,
    /// Extra padding bytes appended past the name before alignment.
    pub pad: usize,
}

impl RecordSpec {
    pub fn new(usn: Usn, name: &str) -> Self {
        RecordSpec {
            usn,
            fid_low: 0x1001,
            fid_high: 0,
            parent_fid_low: 0x5,
            parent_fid_high: 0,
            reason: USN_REASON_FILE_CREATE,
            timestamp: 132_223_104_000_000_000,
            source_info: 0,
            attributes: 0x20,
            name: name.to_string(),
            pad: 0,
        }
    }
}

fn utf16_bytes(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn align8(len: usize) -> usize {
    len.div_ceil(8) * 8
}

/// Encode a V2 record: 64-bit file reference numbers, name at offset 60.
pub fn encode_v2(spec: &RecordSpec) -> Vec<u8> {
    let name_bytes = utf16_bytes(&spec.name);
    let declared = align8(60 + name_bytes.len() + spec.pad);
    let mut buf = vec![0u8; declared];

    buf[0..4].copy_from_slice(&(declared as u32).to_le_bytes());
    buf[4..6].copy_from_slice(&2u16.to_le_bytes());
    buf[8..16].copy_from_slice(&spec.fid_low.to_le_bytes());
    buf[16..24].copy_from_slice(&spec.parent_fid_low.to_le_bytes());
    buf[24..32].copy_from_slice(&spec.usn.to_le_bytes());
    buf[32..40].copy_from_slice(&(spec.timestamp as u64).to_le_bytes());
    buf[40..44].copy_from_slice(&spec.reason.to_le_bytes());
    buf[44..48].copy_from_slice(&spec.source_info.to_le_bytes());
    buf[52..56].copy_from_slice(&spec.attributes.to_le_bytes());
    buf[56..58].copy_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    buf[58..60].copy_from_slice(&60u16.to_le_bytes());
    buf[60..60 + name_bytes.len()].copy_from_slice(&name_bytes);
    buf
}

/// Encode a V3 record: 128-bit file reference numbers, name at offset 76.
pub fn encode_v3(spec: &RecordSpec) -> Vec<u8> {
    let name_bytes = utf16_bytes(&spec.name);
    let declared = align8(76 + name_bytes.len() + spec.pad);
    let mut buf = vec![0u8; declared];

    buf[0..4].copy_from_slice(&(declared as u32).to_le_bytes());
    buf[4..6].copy_from_slice(&3u16.to_le_bytes());
    buf[8..16].copy_from_slice(&spec.fid_low.to_le_bytes());
    buf[16..24].copy_from_slice(&spec.fid_high.to_le_bytes());
    buf[24..32].copy_from_slice(&spec.parent_fid_low.to_le_bytes());
    buf[32..40].copy_from_slice(&spec.parent_fid_high.to_le_bytes());
    buf[40..48].copy_from_slice(&spec.usn.to_le_bytes());
    buf[48..56].copy_from_slice(&(spec.timestamp as u64).to_le_bytes());
    buf[56..60].copy_from_slice(&spec.reason.to_le_bytes());
    buf[60..64].copy_from_slice(&spec.source_info.to_le_bytes());
    buf[68..72].copy_from_slice(&spec.attributes.to_le_bytes());
    buf[72..74].copy_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    buf[74..76].copy_from_slice(&76u16.to_le_bytes());
    buf[76..76 + name_bytes.len()].copy_from_slice(&name_bytes);
    buf
}

/// Assemble a read buffer: the 8-byte next-cursor word, then the records
/// back to back.
pub fn read_buffer(next_usn: Usn, records: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = next_usn.to_le_bytes().to_vec();
    for record in records {
        buf.extend_from_slice(record);
    }
    buf
}

pub fn descriptor(journal_id: u64, first_usn: Usn, next_usn: Usn) -> JournalDescriptor {
    JournalDescriptor {
        journal_id,
        first_usn,
        next_usn,
        lowest_valid_usn: first_usn,
        max_usn: i64::MAX as Usn,
        maximum_size: 32 * 1024 * 1024,
        allocation_delta: 8 * 1024 * 1024,
    }
}

/// What the scripted boundary does on one physical read.
#[derive(Debug)]
pub enum Step {
    /// Successful read returning this buffer verbatim.
    Data(Vec<u8>),
    /// Failed read, optionally still reporting a next cursor.
    Failure {
        error: JournalError,
        next_usn: Option<Usn>,
    },
    /// End of currently available journal data.
    End,
}

/// Scripted journal boundary: pops one step per physical read and records
/// every request for assertions.
#[derive(Debug)]
pub struct FakeIo {
    pub descriptor: JournalDescriptor,
    steps: VecDeque<Step>,
    pub requests: Vec<ReadRequest>,
}

impl FakeIo {
    pub fn new(descriptor: JournalDescriptor) -> Self {
        FakeIo {
            descriptor,
            steps: VecDeque::new(),
            requests: Vec::new(),
        }
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push_back(step);
    }
}

impl JournalIo for FakeIo {
    fn query_journal(&mut self) -> Result<JournalDescriptor, JournalError> {
        Ok(self.descriptor)
    }

    fn read_journal(&mut self, req: &ReadRequest, buf: &mut [u8]) -> Result<usize, ReadFailure> {
        self.requests.push(*req);
        match self.steps.pop_front() {
            Some(Step::Data(bytes)) => {
                assert!(
                    bytes.len() <= buf.len(),
                    "scripted buffer exceeds the read buffer"
                );
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(Step::Failure { error, next_usn }) => Err(ReadFailure { error, next_usn }),
            Some(Step::End) | None => Ok(0),
        }
    }
}
