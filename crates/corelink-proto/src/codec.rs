// ── CR-delimited record framing ──
//
// The control protocol terminates every JSON-RPC document with a carriage
// return. The decoder yields raw record strings; JSON parsing happens one
// layer up so a malformed record can be dropped without killing the stream.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::Error;
use crate::message::Request;

/// Upper bound on a single record. Anything larger is a framing fault.
pub const MAX_RECORD_LEN: usize = 1024 * 1024;

/// Codec splitting the inbound byte stream on `\r` and terminating every
/// outbound request the same way. A partial record at end-of-buffer stays
/// in the buffer until the next read completes it.
#[derive(Debug, Default)]
pub struct RecordCodec;

impl Decoder for RecordCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\r') else {
                if src.len() > MAX_RECORD_LEN {
                    return Err(Error::RecordTooLong { len: src.len(), max: MAX_RECORD_LEN });
                }
                return Ok(None);
            };

            let record = src.split_to(pos + 1);
            match std::str::from_utf8(&record[..pos]) {
                Ok(text) => {
                    // Tolerate CRLF peers: the LF lands at the front of the
                    // next record and trims away here.
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    return Ok(Some(text.to_owned()));
                }
                Err(e) => {
                    debug!(error = %e, "dropping non-UTF-8 record");
                }
            }
        }
    }
}

impl Encoder<Request> for RecordCodec {
    type Error = Error;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Error> {
        let body = serde_json::to_vec(&item).map_err(|e| Error::Protocol(e.to_string()))?;
        dst.reserve(body.len() + 1);
        dst.extend_from_slice(&body);
        dst.put_u8(b'\r');
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;

    fn decode_all(codec: &mut RecordCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(record) = codec.decode(buf).unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn splits_records_on_carriage_return() {
        let mut codec = RecordCodec;
        let mut buf = BytesMut::from(&b"{\"id\":1}\r{\"id\":2}\r"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec![r#"{"id":1}"#, r#"{"id":2}"#]);
    }

    #[test]
    fn retains_partial_record() {
        let mut codec = RecordCodec;
        let mut buf = BytesMut::from(&b"{\"id\":1}\r{\"id\""[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec![r#"{"id":1}"#]);

        // The tail stays buffered and completes with the next read.
        buf.extend_from_slice(b":2}\r");
        assert_eq!(decode_all(&mut codec, &mut buf), vec![r#"{"id":2}"#]);
    }

    #[test]
    fn tolerates_crlf_and_blank_records() {
        let mut codec = RecordCodec;
        let mut buf = BytesMut::from(&b"{\"id\":1}\r\n{\"id\":2}\r\r"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec![r#"{"id":1}"#, r#"{"id":2}"#]);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_record() {
        let mut codec = RecordCodec;
        let mut buf = BytesMut::new();
        buf.resize(MAX_RECORD_LEN + 1, b'x');
        assert!(matches!(codec.decode(&mut buf), Err(Error::RecordTooLong { .. })));
    }

    #[test]
    fn encodes_with_trailing_cr() {
        let mut codec = RecordCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Request::new(9, "NoOp", Value::Null), &mut buf)
            .unwrap();
        assert_eq!(buf.last(), Some(&b'\r'));
        let text = std::str::from_utf8(&buf[..buf.len() - 1]).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":9,"method":"NoOp"}"#);
    }

    #[test]
    fn round_trip_through_decoder() {
        let mut codec = RecordCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Request::new(1, "StatusGet", Value::Null), &mut buf)
            .unwrap();
        let records = decode_all(&mut codec, &mut buf);
        assert_eq!(records.len(), 1);
        let parsed: Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(parsed["method"], "StatusGet");
    }
}
