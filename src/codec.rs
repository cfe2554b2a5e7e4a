//! Wire codec for the filevault protocol.
//!
//! Every message is a flat sequence of three primitives:
//! - string: u16 big-endian byte count, then UTF-8 bytes
//! - int32: 4-byte big-endian signed integer
//! - blob: int32 byte count, then raw bytes
//!
//! Requests start with an action tag string, responses with an int32 status.
//! Decoding is strict: anything outside the known shapes is a [`ProtocolError`]
//! and the caller is expected to drop the connection.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{action, mode, status, MAX_STRING_LEN, MAX_WIRE_BLOB};
use crate::registry::FileId;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown action tag {0:?}")]
    UnknownAction(String),
    #[error("unknown lookup mode {0:?}")]
    UnknownMode(String),
    #[error("unexpected status code {0}")]
    UnknownStatus(i32),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("string too long: {len} bytes (max: {max} bytes)")]
    StringTooLong { len: usize, max: usize },
    #[error("negative blob length: {0}")]
    NegativeLength(i32),
    #[error("blob too large: {len} bytes (max: {max} bytes)")]
    BlobTooLarge { len: usize, max: usize },
    #[error("file id {0} does not fit the wire format")]
    IdOutOfRange(i64),
}

impl ProtocolError {
    /// True when the peer simply went away before a full message arrived.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type CodecResult<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Exit,
    Put,
    Get,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Exit => action::EXIT,
            Action::Put => action::PUT,
            Action::Get => action::GET,
            Action::Delete => action::DELETE,
        }
    }

    pub fn parse(tag: &str) -> CodecResult<Self> {
        match tag {
            action::EXIT => Ok(Action::Exit),
            action::PUT => Ok(Action::Put),
            action::GET => Ok(Action::Get),
            action::DELETE => Ok(Action::Delete),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// How a GET or DELETE names its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    ByName,
    ById,
}

impl Lookup {
    pub fn as_str(self) -> &'static str {
        match self {
            Lookup::ByName => mode::BY_NAME,
            Lookup::ById => mode::BY_ID,
        }
    }

    pub fn parse(tag: &str) -> CodecResult<Self> {
        match tag {
            mode::BY_NAME => Ok(Lookup::ByName),
            mode::BY_ID => Ok(Lookup::ById),
            other => Err(ProtocolError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Exit,
    Put { filename: String, content: Vec<u8> },
    Get { lookup: Lookup, identifier: String },
    Delete { lookup: Lookup, identifier: String },
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Request::Exit => Action::Exit,
            Request::Put { .. } => Action::Put,
            Request::Get { .. } => Action::Get,
            Request::Delete { .. } => Action::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 200 after PUT
    Stored(FileId),
    /// 200 after GET
    Content(Vec<u8>),
    /// 200 after DELETE
    Deleted,
    Forbidden,
    NotFound,
}

impl Response {
    pub fn status(&self) -> i32 {
        match self {
            Response::Stored(_) | Response::Content(_) | Response::Deleted => status::OK,
            Response::Forbidden => status::FORBIDDEN,
            Response::NotFound => status::NOT_FOUND,
        }
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) -> CodecResult<()> {
    let len = s.len();
    if len > MAX_STRING_LEN {
        return Err(ProtocolError::StringTooLong { len, max: MAX_STRING_LEN });
    }
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_blob(buf: &mut Vec<u8>, bytes: &[u8], max: usize) -> CodecResult<()> {
    if bytes.len() > max {
        return Err(ProtocolError::BlobTooLarge { len: bytes.len(), max });
    }
    put_i32(buf, bytes.len() as i32);
    buf.extend_from_slice(bytes);
    Ok(())
}

pub async fn read_string<R>(reader: &mut R) -> CodecResult<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

pub async fn read_i32<R>(reader: &mut R) -> CodecResult<i32>
where
    R: AsyncRead + Unpin,
{
    Ok(reader.read_i32().await?)
}

/// Read a length-prefixed blob, refusing lengths that are negative or above `max`.
pub async fn read_blob<R>(reader: &mut R, max: usize) -> CodecResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let raw = reader.read_i32().await?;
    if raw < 0 {
        return Err(ProtocolError::NegativeLength(raw));
    }
    let len = raw as usize;
    if len > max {
        return Err(ProtocolError::BlobTooLarge { len, max });
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(bytes)
}

pub fn encode_request(request: &Request, max_blob: usize) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    put_string(&mut buf, request.action().as_str())?;
    match request {
        Request::Exit => {}
        Request::Put { filename, content } => {
            put_string(&mut buf, filename)?;
            put_blob(&mut buf, content, max_blob)?;
        }
        Request::Get { lookup, identifier } | Request::Delete { lookup, identifier } => {
            put_string(&mut buf, lookup.as_str())?;
            put_string(&mut buf, identifier)?;
        }
    }
    Ok(buf)
}

/// Responses are only bounded by the wire format. The inbound blob cap never
/// applies here: a stored file too big for it must still get an answer.
pub fn encode_response(response: &Response) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(8);
    put_i32(&mut buf, response.status());
    match response {
        Response::Stored(id) => {
            let wire = i32::try_from(*id).map_err(|_| ProtocolError::IdOutOfRange(*id as i64))?;
            put_i32(&mut buf, wire);
        }
        Response::Content(bytes) => put_blob(&mut buf, bytes, MAX_WIRE_BLOB)?,
        Response::Deleted | Response::Forbidden | Response::NotFound => {}
    }
    Ok(buf)
}

pub async fn read_request<R>(reader: &mut R, max_blob: usize) -> CodecResult<Request>
where
    R: AsyncRead + Unpin,
{
    let tag = read_string(reader).await?;
    let request = match Action::parse(&tag)? {
        Action::Exit => Request::Exit,
        Action::Put => {
            let filename = read_string(reader).await?;
            let content = read_blob(reader, max_blob).await?;
            Request::Put { filename, content }
        }
        Action::Get => {
            let lookup = Lookup::parse(&read_string(reader).await?)?;
            let identifier = read_string(reader).await?;
            Request::Get { lookup, identifier }
        }
        Action::Delete => {
            let lookup = Lookup::parse(&read_string(reader).await?)?;
            let identifier = read_string(reader).await?;
            Request::Delete { lookup, identifier }
        }
    };
    Ok(request)
}

pub async fn write_request<W>(writer: &mut W, request: &Request, max_blob: usize) -> CodecResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_request(request, max_blob)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode the response to `action`. The 200 shape depends on which request was sent.
pub async fn read_response<R>(reader: &mut R, action: Action, max_blob: usize) -> CodecResult<Response>
where
    R: AsyncRead + Unpin,
{
    let code = read_i32(reader).await?;
    match code {
        status::OK => match action {
            Action::Put => {
                let raw = read_i32(reader).await?;
                let id = FileId::try_from(raw).map_err(|_| ProtocolError::IdOutOfRange(raw as i64))?;
                Ok(Response::Stored(id))
            }
            Action::Get => Ok(Response::Content(read_blob(reader, max_blob).await?)),
            Action::Delete => Ok(Response::Deleted),
            // EXIT never gets a response
            Action::Exit => Err(ProtocolError::UnknownStatus(code)),
        },
        status::FORBIDDEN => Ok(Response::Forbidden),
        status::NOT_FOUND => Ok(Response::NotFound),
        other => Err(ProtocolError::UnknownStatus(other)),
    }
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> CodecResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_response(response)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
