//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("unsupported Transfer-Encoding: {value:?}")]
    UnsupportedTransferEncoding { value: String },

    #[error("both Content-Length and Transfer-Encoding are set")]
    AmbiguousLength,

    #[error("malformed chunked body")]
    InvalidChunk,
}

/// A parsed HTTP/1.1 request.
///
/// [`Request::parse`] only consumes the request head. The server loop waits
/// until `Content-Length` bytes have arrived and then attaches them with
/// [`Request::set_body`], so the body never contains bytes that belong to a
/// pipelined follow-up request.
///
/// # Examples
///
/// ```
/// use deskrelay::http::Request;
///
/// let raw = b"POST /process HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}";
/// let (request, offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "POST");
/// assert_eq!(request.path(), "/process");
/// assert_eq!(request.content_length().unwrap(), 2);
/// assert_eq!(&raw[offset..], b"{}");
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses the request line and headers from `buf`.
    ///
    /// Returns the request (with an empty body) and the offset at which the
    /// body begins in `buf`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] when the header block is not finished yet.
    /// - [`RequestError::Parse`] when the data is not HTTP/1.x.
    /// - [`RequestError::MissingField`] when httparse reports a complete head
    ///   without a method, path or version.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => match m.parse() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        // The relay has no query parameters; drop them before routing.
        let path = raw_path
            .split_once('?')
            .map_or(raw_path, |(path, _)| path)
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path without any query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Whether the body uses chunked transfer coding.
    ///
    /// # Errors
    ///
    /// - [`RequestError::UnsupportedTransferEncoding`] for any coding other
    ///   than a bare `chunked`.
    /// - [`RequestError::AmbiguousLength`] when `Content-Length` is also set.
    pub fn is_chunked(&self) -> Result<bool, RequestError> {
        let Some(value) = self.headers.get("transfer-encoding") else {
            return Ok(false);
        };
        if !value.trim().eq_ignore_ascii_case("chunked") {
            return Err(RequestError::UnsupportedTransferEncoding {
                value: value.to_owned(),
            });
        }
        if self.headers.contains("content-length") {
            return Err(RequestError::AmbiguousLength);
        }
        Ok(true)
    }

    /// `Expect: 100-continue` on an HTTP/1.1 request.
    pub fn expects_continue(&self) -> bool {
        self.version == 1
            && self
                .headers
                .get("expect")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }

    /// Returns the declared body length, `0` when the header is absent.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidContentLength`] when the header is not a number.
    pub fn content_length(&self) -> Result<usize, RequestError> {
        match self.headers.get("content-length") {
            None => Ok(0),
            Some(value) => {
                value
                    .trim()
                    .parse()
                    .map_err(|_| RequestError::InvalidContentLength {
                        value: value.to_owned(),
                    })
            }
        }
    }
}
