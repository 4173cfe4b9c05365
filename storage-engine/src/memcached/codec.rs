use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const END: &[u8] = b"END\r\n";

// Longest status or VALUE header line we are willing to buffer.
const MAX_LINE_LENGTH: usize = 2048;
// memcached's own ceiling on item size.
const MAX_VALUE_LENGTH: usize = 1024 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol: {0}")]
    Protocol(String),
}

/// Memcached text protocol request. Flags are always written as zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Gets { key: String },
    Set { key: String, value: Bytes, exptime: u32 },
    Add { key: String, value: Bytes, exptime: u32 },
    Cas { key: String, value: Bytes, exptime: u32, cas: u64 },
    Delete { key: String },
    Incr { key: String, delta: u64 },
    Decr { key: String, delta: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Value {
        key: String,
        flags: u32,
        data: Bytes,
        cas: Option<u64>,
    },
    /// bare `END`: the requested key is absent
    Miss,
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Number(u64),
    Error,
    ClientError(String),
    ServerError(String),
}

#[derive(Debug, Default)]
pub struct MemcachedCodec;

impl Encoder<Command> for MemcachedCodec {
    type Error = CodecError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match command {
            Command::Get { key } => put_line(dst, format!("get {}", key)),
            Command::Gets { key } => put_line(dst, format!("gets {}", key)),
            Command::Set {
                key,
                value,
                exptime,
            } => put_storage(dst, format!("set {} 0 {} {}", key, exptime, value.len()), &value),
            Command::Add {
                key,
                value,
                exptime,
            } => put_storage(dst, format!("add {} 0 {} {}", key, exptime, value.len()), &value),
            Command::Cas {
                key,
                value,
                exptime,
                cas,
            } => put_storage(
                dst,
                format!("cas {} 0 {} {} {}", key, exptime, value.len(), cas),
                &value,
            ),
            Command::Delete { key } => put_line(dst, format!("delete {}", key)),
            Command::Incr { key, delta } => put_line(dst, format!("incr {} {}", key, delta)),
            Command::Decr { key, delta } => put_line(dst, format!("decr {} {}", key, delta)),
        }
        Ok(())
    }
}

fn put_line(dst: &mut BytesMut, line: String) {
    dst.reserve(line.len() + CRLF.len());
    dst.put_slice(line.as_bytes());
    dst.put_slice(CRLF);
}

fn put_storage(dst: &mut BytesMut, header: String, value: &[u8]) {
    put_line(dst, header);
    dst.reserve(value.len() + CRLF.len());
    dst.put_slice(value);
    dst.put_slice(CRLF);
}

impl Decoder for MemcachedCodec {
    type Item = Reply;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(line_end) = find_crlf(src) else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(CodecError::Protocol(format!(
                    "reply line exceeds {} bytes",
                    MAX_LINE_LENGTH
                )));
            }
            return Ok(None);
        };

        let line = std::str::from_utf8(&src[..line_end])
            .map_err(|_| CodecError::Protocol("reply line is not UTF-8".to_string()))?
            .to_string();

        if let Some(header) = line.strip_prefix("VALUE ") {
            return decode_value(header, line_end, src);
        }

        let reply = parse_status(&line)?;
        src.advance(line_end + CRLF.len());
        Ok(Some(reply))
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF.len()).position(|w| w == CRLF)
}

/// Decodes `VALUE <key> <flags> <bytes> [<cas>]\r\n<data>\r\nEND\r\n` once it is fully buffered.
fn decode_value(
    header: &str,
    line_end: usize,
    src: &mut BytesMut,
) -> Result<Option<Reply>, CodecError> {
    let mut parts = header.split_ascii_whitespace();
    let (Some(key), Some(flags), Some(len)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(CodecError::Protocol(format!("malformed VALUE line: {}", header)));
    };
    let flags: u32 = flags
        .parse()
        .map_err(|_| CodecError::Protocol(format!("bad flags: {}", flags)))?;
    let len: usize = len
        .parse()
        .map_err(|_| CodecError::Protocol(format!("bad length: {}", len)))?;
    let cas = match parts.next() {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| CodecError::Protocol(format!("bad cas: {}", raw)))?,
        ),
        None => None,
    };
    let key = key.to_string();

    if len > MAX_VALUE_LENGTH {
        return Err(CodecError::Protocol(format!("value too large: {} bytes", len)));
    }
    let data_start = line_end + CRLF.len();
    let (Some(data_end), Some(total)) = (
        data_start.checked_add(len),
        data_start.checked_add(len + CRLF.len() + END.len()),
    ) else {
        return Err(CodecError::Protocol(format!("bad length: {}", len)));
    };
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    if &src[data_end..data_end + CRLF.len()] != CRLF {
        return Err(CodecError::Protocol("data block not terminated".to_string()));
    }
    if &src[data_end + CRLF.len()..total] != END {
        return Err(CodecError::Protocol(
            "expected END after single value".to_string(),
        ));
    }

    let mut frame = src.split_to(total);
    frame.advance(data_start);
    let data = frame.split_to(len).freeze();

    Ok(Some(Reply::Value {
        key,
        flags,
        data,
        cas,
    }))
}

fn parse_status(line: &str) -> Result<Reply, CodecError> {
    let reply = match line {
        "END" => Reply::Miss,
        "STORED" => Reply::Stored,
        "NOT_STORED" => Reply::NotStored,
        "EXISTS" => Reply::Exists,
        "NOT_FOUND" => Reply::NotFound,
        "DELETED" => Reply::Deleted,
        "ERROR" => Reply::Error,
        other => {
            if let Some(msg) = other.strip_prefix("CLIENT_ERROR") {
                Reply::ClientError(msg.trim().to_string())
            } else if let Some(msg) = other.strip_prefix("SERVER_ERROR") {
                Reply::ServerError(msg.trim().to_string())
            } else if let Ok(n) = other.trim_end().parse::<u64>() {
                Reply::Number(n)
            } else {
                return Err(CodecError::Protocol(format!("unexpected reply: {}", other)));
            }
        }
    };
    Ok(reply)
}
