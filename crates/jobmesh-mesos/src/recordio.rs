//! RecordIO framing used by the subscription stream: each record is its
//! decimal byte length, a newline, then the record bytes.

use crate::error::{MesosError, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Records longer than this are treated as a corrupt stream
const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// Length header digits we accept before giving up on finding a newline
const MAX_HEADER_LEN: usize = 20;

#[derive(Debug, Default)]
pub struct RecordIoDecoder {
    buffer: BytesMut,
    pending_len: Option<usize>,
}

impl RecordIoDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk received from the stream
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete record, if enough bytes have arrived
    pub fn next_record(&mut self) -> Result<Option<Bytes>> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
                    if self.buffer.len() > MAX_HEADER_LEN {
                        return Err(MesosError::decode_error(
                            "RecordIO header",
                            "no length terminator found",
                        ));
                    }
                    return Ok(None);
                };

                let header = self.buffer.split_to(newline);
                self.buffer.advance(1);

                let len = std::str::from_utf8(&header)
                    .ok()
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .ok_or_else(|| {
                        MesosError::decode_error(
                            "RecordIO header",
                            format!("invalid length {:?}", String::from_utf8_lossy(&header)),
                        )
                    })?;
                if len > MAX_RECORD_LEN {
                    return Err(MesosError::decode_error(
                        "RecordIO header",
                        format!("record length {} exceeds limit", len),
                    ));
                }
                self.pending_len = Some(len);
                len
            }
        };

        if self.buffer.len() < len {
            return Ok(None);
        }

        self.pending_len = None;
        Ok(Some(self.buffer.split_to(len).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_split_across_chunks() {
        let mut decoder = RecordIoDecoder::new();

        decoder.push(b"5\nhel");
        assert_eq!(decoder.next_record().unwrap(), None);

        decoder.push(b"lo3\nabc2");
        assert_eq!(decoder.next_record().unwrap(), Some(Bytes::from("hello")));
        assert_eq!(decoder.next_record().unwrap(), Some(Bytes::from("abc")));
        assert_eq!(decoder.next_record().unwrap(), None);

        decoder.push(b"0\n{\"type\":\"HEARTBEAT\"}");
        assert_eq!(
            decoder.next_record().unwrap(),
            Some(Bytes::from("{\"type\":\"HEARTBEAT\"}"))
        );
    }

    #[test]
    fn test_invalid_header() {
        let mut decoder = RecordIoDecoder::new();
        decoder.push(b"abc\n");
        assert!(decoder.next_record().is_err());

        let mut decoder = RecordIoDecoder::new();
        decoder.push(&[b'1'; 32]);
        assert!(decoder.next_record().is_err());
    }
}
