//! Frame decoding and forward log scans.

use super::manager::{LogInner, LogManager};
use super::record::{LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
use crate::error::{CoreError, CoreResult};
use crate::types::Lsn;

/// Header size for log frames.
/// magic (4) + version (2) + type (1) + length (4) = 11 bytes
pub(crate) const HEADER_SIZE: usize = 11;

/// CRC size.
pub(crate) const CRC_SIZE: usize = 4;

/// Encodes a record into a complete frame.
pub(crate) fn encode_frame(record: &LogRecord) -> CoreResult<Vec<u8>> {
    let payload = record.encode_payload()?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.push(record.record_type().as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    // CRC32 over everything before it
    let crc = crc32fast::hash(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Decodes the frame at `offset`.
///
/// Returns `Ok(None)` if the frame is cut short by the end of the log, and
/// the record with the offset of the following frame otherwise.
pub(crate) fn read_frame(inner: &LogInner, offset: u64) -> CoreResult<Option<(LogRecord, u64)>> {
    let Some(header) = inner.read_bytes(offset, HEADER_SIZE)? else {
        return Ok(None);
    };

    if header[0..4] != LOG_MAGIC {
        return Err(CoreError::log_corruption(format!(
            "invalid magic at offset {offset}"
        )));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != LOG_VERSION {
        return Err(CoreError::log_corruption(format!(
            "unsupported version {version} at offset {offset}"
        )));
    }

    let type_byte = header[6];
    let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
        CoreError::log_corruption(format!(
            "unknown record type {type_byte} at offset {offset}"
        ))
    })?;

    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
    let Some(body) = inner.read_bytes(offset + HEADER_SIZE as u64, payload_len + CRC_SIZE)? else {
        return Ok(None);
    };

    let (payload, crc) = body.split_at(payload_len);
    let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(payload);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(CoreError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    let record = LogRecord::decode_payload(record_type, payload)?;
    let next = offset + (HEADER_SIZE + payload_len + CRC_SIZE) as u64;
    Ok(Some((record, next)))
}

/// A forward scan over log records.
///
/// The log lock is taken once per record, so appends may interleave with a
/// scan; records appended before the scan reaches the end are returned.
/// Corruption ends the scan with an error.
pub struct LogScan<'a> {
    log: &'a LogManager,
    next: u64,
    finished: bool,
}

impl<'a> LogScan<'a> {
    pub(crate) fn new(log: &'a LogManager, start: Lsn) -> Self {
        Self {
            log,
            next: start.as_u64(),
            finished: false,
        }
    }
}

impl Iterator for LogScan<'_> {
    type Item = CoreResult<(Lsn, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let lsn = Lsn::new(self.next);
        match self.log.with_inner(|inner| read_frame(inner, self.next)) {
            Ok(Some((record, next))) => {
                self.next = next;
                Some(Ok((lsn, record)))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for LogScan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogScan")
            .field("next", &self.next)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
