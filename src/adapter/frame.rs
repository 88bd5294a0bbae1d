//! Log frame encoding for the file adapter
//!
//! ```text
//! +------------------+
//! | Frame Length     | (u32 LE) total length including this field
//! +------------------+
//! | Kind             | (u8: 0 = put, 1 = delete)
//! +------------------+
//! | Body             | (JSON: record for put, id string for delete)
//! +------------------+
//! | Checksum         | (u32 LE) CRC32 over length, kind and body
//! +------------------+
//! ```

use crc32fast::Hasher;

use super::errors::{AdapterError, AdapterResult};
use crate::record::{Document, Record};

const HEADER_LEN: usize = 4 + 1;
const TRAILER_LEN: usize = 4;
const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;

const KIND_PUT: u8 = 0;
const KIND_DELETE: u8 = 1;

/// One log entry
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Put(Record),
    Delete(String),
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

impl Frame {
    pub fn encode(&self) -> AdapterResult<Vec<u8>> {
        let (kind, body) = match self {
            Frame::Put(record) => (KIND_PUT, serde_json::to_vec(&record.to_document())?),
            Frame::Delete(id) => (KIND_DELETE, serde_json::to_vec(id)?),
        };

        let frame_len = (HEADER_LEN + body.len() + TRAILER_LEN) as u32;
        let mut buf = Vec::with_capacity(frame_len as usize);
        buf.extend_from_slice(&frame_len.to_le_bytes());
        buf.push(kind);
        buf.extend_from_slice(&body);
        let crc = checksum(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes the frame at the start of `data`
    ///
    /// Returns the frame and the number of bytes consumed. `offset` is the
    /// position of `data` in the log, reported on corruption.
    pub fn decode(data: &[u8], offset: u64) -> AdapterResult<(Self, usize)> {
        if data.len() < 4 {
            return Err(AdapterError::corruption(offset, "truncated frame header"));
        }
        let frame_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if frame_len < MIN_FRAME_LEN {
            return Err(AdapterError::corruption(
                offset,
                format!("frame length {} below minimum", frame_len),
            ));
        }
        if data.len() < frame_len {
            return Err(AdapterError::corruption(
                offset,
                format!("truncated frame: need {} bytes, have {}", frame_len, data.len()),
            ));
        }

        let covered = &data[..frame_len - TRAILER_LEN];
        let stored = u32::from_le_bytes([
            data[frame_len - 4],
            data[frame_len - 3],
            data[frame_len - 2],
            data[frame_len - 1],
        ]);
        if checksum(covered) != stored {
            return Err(AdapterError::corruption(offset, "checksum mismatch"));
        }

        let body = &covered[HEADER_LEN..];
        let frame = match covered[4] {
            KIND_PUT => {
                let doc: Document = serde_json::from_slice(body)
                    .map_err(|e| AdapterError::corruption(offset, format!("bad record body: {}", e)))?;
                let record = Record::from_document(doc)
                    .map_err(|e| AdapterError::corruption(offset, format!("bad record body: {}", e)))?;
                Frame::Put(record)
            }
            KIND_DELETE => {
                let id: String = serde_json::from_slice(body)
                    .map_err(|e| AdapterError::corruption(offset, format!("bad delete body: {}", e)))?;
                Frame::Delete(id)
            }
            other => {
                return Err(AdapterError::corruption(
                    offset,
                    format!("unknown frame kind {}", other),
                ))
            }
        };

        Ok((frame, frame_len))
    }

    /// Decodes every frame of a log image
    pub fn decode_all(data: &[u8]) -> AdapterResult<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let (frame, used) = Frame::decode(&data[pos..], pos as u64)?;
            frames.push(frame);
            pos += used;
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(id: &str) -> Frame {
        Frame::Put(Record::new(id, json!({ "n": 1 }).as_object().cloned().unwrap()))
    }

    #[test]
    fn test_log_image_decodes_in_order() {
        let mut log = put("a").encode().unwrap();
        log.extend(Frame::Delete("a".into()).encode().unwrap());
        log.extend(put("b").encode().unwrap());

        let frames = Frame::decode_all(&log).unwrap();
        assert_eq!(frames, vec![put("a"), Frame::Delete("a".into()), put("b")]);
    }

    #[test]
    fn test_flipped_bit_is_corruption() {
        let mut bytes = put("a").encode().unwrap();
        bytes[7] ^= 0x01;
        let err = Frame::decode(&bytes, 0).unwrap_err();
        assert!(matches!(err, AdapterError::Corruption { offset: 0, .. }));
    }

    #[test]
    fn test_truncated_tail_reports_its_offset() {
        let first = put("a").encode().unwrap();
        let mut log = first.clone();
        let second = put("b").encode().unwrap();
        log.extend_from_slice(&second[..second.len() - 2]);

        let err = Frame::decode_all(&log).unwrap_err();
        match err {
            AdapterError::Corruption { offset, .. } => assert_eq!(offset, first.len() as u64),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut bytes = Frame::Delete("a".into()).encode().unwrap();
        bytes[4] = 9;
        // fix the checksum so only the kind is wrong
        let len = bytes.len();
        let crc = checksum(&bytes[..len - 4]);
        bytes[len - 4..].copy_from_slice(&crc.to_le_bytes());
        assert!(Frame::decode(&bytes, 0).is_err());
    }
}
