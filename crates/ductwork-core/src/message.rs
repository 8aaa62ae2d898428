//! Request wire format: tagged message variants with centralized
//! encode/decode.
//!
//! Layout v1, all integers little-endian. One encoded message is one FIFO
//! write; the responder reads it back with a single `recv_message` call.
//!
//! ```text
//! Quit        [tag=1: u32]
//! NewChannel  [tag=2: u32]
//! DataQuery   [tag=3: u32][subject: i32][time: f64][stream: i32]
//! FileQuery   [tag=4: u32][offset: i64][length: i64][filename..][0x00]
//! ```
//!
//! Replies carry no tag; the requester knows what it asked for:
//! a data reply is one `f64`, a file-length reply one `i64`, a chunk reply
//! exactly the requested number of raw bytes, and a new-channel reply the
//! channel name NUL-padded to [`ProtocolConfig::CHANNEL_NAME_LEN`] bytes.
//!
//! Every file query (the length probe and each chunk request) carries the
//! filename, so the responder holds no state between requests.

use crate::config::ProtocolConfig;
use crate::error::{DuctworkError, Result};

const TAG_QUIT: u32 = 1;
const TAG_NEW_CHANNEL: u32 = 2;
const TAG_DATA_QUERY: u32 = 3;
const TAG_FILE_QUERY: u32 = 4;

/// Size of the fixed part of a `FileQuery`: tag + offset + length.
pub const FILE_QUERY_HEADER: usize = 4 + 8 + 8;

/// Size of an encoded `DataQuery`.
pub const DATA_QUERY_LEN: usize = 4 + 4 + 8 + 4;

/// A request sent from requester to responder.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// End this channel's serving loop.
    Quit,
    /// Ask the responder to allocate a private channel (control only).
    NewChannel,
    /// Ask for one reading: `subject` at `time` on stream `stream`.
    DataQuery { subject: i32, time: f64, stream: i32 },
    /// Ask for `length` bytes of `name` starting at `offset`.
    ///
    /// `offset == 0 && length == 0` is the length probe that opens a
    /// transfer; the reply announces the file's total byte length.
    FileQuery {
        offset: i64,
        length: i64,
        name: String,
    },
}

impl Message {
    /// Encode into the v1 wire layout.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Quit => TAG_QUIT.to_le_bytes().to_vec(),
            Message::NewChannel => TAG_NEW_CHANNEL.to_le_bytes().to_vec(),
            Message::DataQuery {
                subject,
                time,
                stream,
            } => {
                let mut buf = Vec::with_capacity(DATA_QUERY_LEN);
                buf.extend_from_slice(&TAG_DATA_QUERY.to_le_bytes());
                buf.extend_from_slice(&subject.to_le_bytes());
                buf.extend_from_slice(&time.to_le_bytes());
                buf.extend_from_slice(&stream.to_le_bytes());
                buf
            }
            Message::FileQuery {
                offset,
                length,
                name,
            } => {
                let mut buf = Vec::with_capacity(FILE_QUERY_HEADER + name.len() + 1);
                buf.extend_from_slice(&TAG_FILE_QUERY.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&length.to_le_bytes());
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    /// Decode one message from the bytes of a single peer write.
    ///
    /// Any malformed input is a `Protocol` error: the two ends are compiled
    /// from the same definition, so a decode failure means the session is
    /// desynchronized, not that retry could help.
    pub fn decode(buf: &[u8]) -> Result<Message> {
        if buf.len() < 4 {
            return Err(DuctworkError::protocol(format!(
                "message truncated: {} bytes, need at least 4",
                buf.len()
            )));
        }
        let tag = u32::from_le_bytes(read_array(buf, 0));

        match tag {
            TAG_QUIT => {
                expect_len(buf, 4, "Quit")?;
                Ok(Message::Quit)
            }
            TAG_NEW_CHANNEL => {
                expect_len(buf, 4, "NewChannel")?;
                Ok(Message::NewChannel)
            }
            TAG_DATA_QUERY => {
                expect_len(buf, DATA_QUERY_LEN, "DataQuery")?;
                Ok(Message::DataQuery {
                    subject: i32::from_le_bytes(read_array(buf, 4)),
                    time: f64::from_le_bytes(read_array(buf, 8)),
                    stream: i32::from_le_bytes(read_array(buf, 16)),
                })
            }
            TAG_FILE_QUERY => {
                if buf.len() < FILE_QUERY_HEADER + 1 {
                    return Err(DuctworkError::protocol(format!(
                        "FileQuery truncated: {} bytes",
                        buf.len()
                    )));
                }
                let offset = i64::from_le_bytes(read_array(buf, 4));
                let length = i64::from_le_bytes(read_array(buf, 12));
                let tail = &buf[FILE_QUERY_HEADER..];
                let nul = tail
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| DuctworkError::protocol("FileQuery filename missing NUL"))?;
                if nul + 1 != tail.len() {
                    return Err(DuctworkError::protocol(
                        "FileQuery has trailing bytes after filename",
                    ));
                }
                let name = std::str::from_utf8(&tail[..nul])
                    .map_err(|_| DuctworkError::protocol("FileQuery filename is not UTF-8"))?
                    .to_string();
                if offset < 0 || length < 0 {
                    return Err(DuctworkError::protocol(
                        "FileQuery offset/length must be non-negative",
                    ));
                }
                Ok(Message::FileQuery {
                    offset,
                    length,
                    name,
                })
            }
            other => Err(DuctworkError::protocol(format!(
                "unknown message tag {other}"
            ))),
        }
    }
}

/// Encode a channel name into the fixed-size new-channel reply buffer.
///
/// NUL-padded so the requester receives exactly
/// [`ProtocolConfig::CHANNEL_NAME_LEN`] bytes. Names that would not leave
/// room for the terminator are rejected.
pub fn encode_channel_name(name: &str) -> Result<[u8; ProtocolConfig::CHANNEL_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= ProtocolConfig::CHANNEL_NAME_LEN {
        return Err(DuctworkError::Validation {
            field: "channel_name".to_string(),
            message: format!(
                "name length {} outside 1..{}",
                bytes.len(),
                ProtocolConfig::CHANNEL_NAME_LEN
            ),
        });
    }
    if bytes.contains(&0) {
        return Err(DuctworkError::Validation {
            field: "channel_name".to_string(),
            message: "name contains NUL".to_string(),
        });
    }
    let mut buf = [0u8; ProtocolConfig::CHANNEL_NAME_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// Decode the fixed-size new-channel reply buffer back into a name.
pub fn decode_channel_name(buf: &[u8]) -> Result<String> {
    if buf.len() != ProtocolConfig::CHANNEL_NAME_LEN {
        return Err(DuctworkError::protocol(format!(
            "channel name reply is {} bytes, expected {}",
            buf.len(),
            ProtocolConfig::CHANNEL_NAME_LEN
        )));
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    if end == 0 {
        return Err(DuctworkError::protocol("channel name reply is empty"));
    }
    std::str::from_utf8(&buf[..end])
        .map(str::to_string)
        .map_err(|_| DuctworkError::protocol("channel name reply is not UTF-8"))
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

fn expect_len(buf: &[u8], want: usize, kind: &str) -> Result<()> {
    if buf.len() != want {
        return Err(DuctworkError::protocol(format!(
            "{kind} message is {} bytes, expected {want}",
            buf.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_only_round_trip() {
        for msg in [Message::Quit, Message::NewChannel] {
            let buf = msg.encode();
            assert_eq!(buf.len(), 4);
            assert_eq!(Message::decode(&buf).unwrap(), msg);
        }
    }

    #[test]
    fn test_data_query_layout() {
        let msg = Message::DataQuery {
            subject: 7,
            time: 1.5,
            stream: 2,
        };
        let buf = msg.encode();
        assert_eq!(buf.len(), DATA_QUERY_LEN);
        assert_eq!(&buf[0..4], &3u32.to_le_bytes());
        assert_eq!(&buf[4..8], &7i32.to_le_bytes());
        assert_eq!(&buf[8..16], &1.5f64.to_le_bytes());
        assert_eq!(&buf[16..20], &2i32.to_le_bytes());
        assert_eq!(Message::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn test_file_query_carries_filename_and_nul() {
        let msg = Message::FileQuery {
            offset: 1024,
            length: 452,
            name: "1.csv".to_string(),
        };
        let buf = msg.encode();
        assert_eq!(buf.len(), FILE_QUERY_HEADER + 5 + 1);
        assert_eq!(buf[buf.len() - 1], 0);
        assert_eq!(Message::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let buf = 99u32.to_le_bytes();
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, DuctworkError::Protocol { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_data_query() {
        let msg = Message::DataQuery {
            subject: 1,
            time: 0.0,
            stream: 1,
        };
        let buf = msg.encode();
        assert!(Message::decode(&buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_missing_nul() {
        let msg = Message::FileQuery {
            offset: 0,
            length: 0,
            name: "x.bin".to_string(),
        };
        let mut buf = msg.encode();
        buf.pop(); // strip the terminator
        assert!(Message::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_negative_offset() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&(-1i64).to_le_bytes());
        buf.extend_from_slice(&0i64.to_le_bytes());
        buf.extend_from_slice(b"a\0");
        assert!(Message::decode(&buf).is_err());
    }

    #[test]
    fn test_channel_name_reply_round_trip() {
        let buf = encode_channel_name("chan-1234-1").unwrap();
        assert_eq!(buf.len(), ProtocolConfig::CHANNEL_NAME_LEN);
        assert_eq!(decode_channel_name(&buf).unwrap(), "chan-1234-1");
    }

    #[test]
    fn test_channel_name_too_long_rejected() {
        let long = "x".repeat(ProtocolConfig::CHANNEL_NAME_LEN);
        assert!(encode_channel_name(&long).is_err());
    }

    #[test]
    fn test_empty_channel_name_reply_rejected() {
        let buf = [0u8; ProtocolConfig::CHANNEL_NAME_LEN];
        assert!(decode_channel_name(&buf).is_err());
    }
}
