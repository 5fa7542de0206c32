use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use std::io;
use std::time::Duration;

use crate::request::{close_query, metadata_query};
use crate::{JPIPError, ResponseMetadata, Session, StreamKind, ViewWindowRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_CHUNK: usize = 1024;

/// JPIP client over HTTP.
///
/// Every request is a plain GET against the server URI; the negotiated
/// channel, transaction and geometry live in the client [`Session`]. Requests
/// block until the whole response body is read.
pub struct JPIPClient {
    http: Client,
    uri: String,
    session: Session,
}

impl JPIPClient {
    pub fn new(uri: &str) -> Result<JPIPClient, JPIPError> {
        JPIPClient::with_timeout(uri, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(uri: &str, timeout: Duration) -> Result<JPIPClient, JPIPError> {
        let http = Client::builder()
            .user_agent(format!("jpip/{}", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|error| JPIPError::Transport {
                error: error.to_string(),
            })?;

        Ok(JPIPClient {
            http,
            uri: uri.trim_end_matches('?').to_owned(),
            session: Session::new(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sends one view-window request and merges the response headers into
    /// the session.
    ///
    /// Returns `None` when the server had nothing new to send.
    pub fn request_view_window(
        &mut self,
        request: &ViewWindowRequest,
    ) -> Result<Option<Vec<u8>>, JPIPError> {
        let query = request.query_string(&self.session)?;
        let (metadata, stream) = self.fetch(&self.url(&query))?;

        self.session.merge(&metadata);
        if request.channel_id().is_none() {
            self.session.bind_target(request.target());
        }

        Ok(if stream.is_empty() { None } else { Some(stream) })
    }

    /// Opens the session channel on `target`. Only one channel is allocated
    /// per session.
    pub fn open_channel(
        &mut self,
        target: &str,
        tid: Option<&str>,
        fsiz: (u32, u32),
        stream_kind: Option<StreamKind>,
    ) -> Result<Option<Vec<u8>>, JPIPError> {
        let mut request = ViewWindowRequest::new()
            .with_target(target)
            .with_frame_size(fsiz.0, fsiz.1)
            .with_new_channel();
        if let Some(tid) = tid {
            request = request.with_transaction_id(tid);
        }
        if let Some(kind) = stream_kind {
            request = request.with_stream_kind(kind);
        }
        self.request_view_window(&request)
    }

    /// Opens a channel for the session from a channel id known elsewhere,
    /// typically one the decode service still associates with the target.
    pub fn reopen_channel(
        &mut self,
        fsiz: (u32, u32),
        cid: &str,
        stream_kind: Option<StreamKind>,
    ) -> Result<Option<Vec<u8>>, JPIPError> {
        let mut request = ViewWindowRequest::new()
            .with_frame_size(fsiz.0, fsiz.1)
            .with_channel_id(cid)
            .with_new_channel();
        if let Some(kind) = stream_kind {
            request = request.with_stream_kind(kind);
        }
        self.request_view_window(&request)
    }

    /// Requests a new frame size on the session channel.
    pub fn request_frame(&mut self, fsiz: (u32, u32)) -> Result<Option<Vec<u8>>, JPIPError> {
        let cid = self.session.channel_id().ok_or(JPIPError::NoChannel)?;
        let request = ViewWindowRequest::new()
            .with_frame_size(fsiz.0, fsiz.1)
            .with_channel_id(cid);
        self.request_view_window(&request)
    }

    /// Requests a region of a frame on the session channel, or on the
    /// session transaction when no channel was opened.
    pub fn request_region(
        &mut self,
        fsiz: (u32, u32),
        roff: (u32, u32),
        rsiz: (u32, u32),
    ) -> Result<Option<Vec<u8>>, JPIPError> {
        let request = ViewWindowRequest::new()
            .with_frame_size(fsiz.0, fsiz.1)
            .with_region_offset(roff.0, roff.1)
            .with_region_size(rsiz.0, rsiz.1);

        let request = match (self.session.channel_id(), self.session.transaction_id()) {
            (Some(cid), _) => request.with_channel_id(cid),
            (None, Some(tid)) => request.with_transaction_id(tid),
            (None, None) => return Err(JPIPError::NoChannel),
        };
        self.request_view_window(&request)
    }

    /// Requests the XML metadata boxes of the target on the session channel.
    pub fn request_xml(&mut self) -> Result<Option<Vec<u8>>, JPIPError> {
        let query = metadata_query(&self.session)?;
        let (metadata, stream) = self.fetch(&self.url(&query))?;
        self.session.merge(&metadata);

        Ok(if stream.is_empty() { None } else { Some(stream) })
    }

    /// Closes the session channel on the server. Does nothing when no
    /// channel was ever allocated.
    pub fn close_channel(&mut self) -> Result<(), JPIPError> {
        let cid = match self.session.channel_id() {
            Some(cid) => cid.to_owned(),
            None => return Ok(()),
        };

        info!("closing cid: {}", cid);
        self.fetch(&self.url(&close_query(&cid)))?;
        self.session.clear_channel();

        Ok(())
    }

    /// Performs one GET and returns the JPIP response headers with the
    /// complete body. Redirects are not followed.
    pub fn fetch(&self, url: &str) -> Result<(ResponseMetadata, Vec<u8>), JPIPError> {
        info!("Requesting: {}", url);

        let mut response = self
            .http
            .get(url)
            .send()
            .map_err(|error| JPIPError::Transport {
                error: error.to_string(),
            })?;

        let status = response.status();
        debug!("{}", status);

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            return Err(JPIPError::Redirect {
                status: status.as_u16(),
                location,
            });
        }
        if !status.is_success() {
            return Err(JPIPError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_owned(),
            });
        }

        let metadata = ResponseMetadata::from_headers(response.headers());
        let stream = read_body(&mut response)?;

        if stream.is_empty() {
            info!("No new jpipstream");
        } else {
            info!("jpiplen: {}", stream.len());
        }

        Ok((metadata, stream))
    }

    fn url(&self, query: &str) -> String {
        format!("{}?{}", self.uri, query)
    }
}

/// Reads `reader` to its end in fixed-size chunks.
///
/// Servers do not always deliver the content length they declare, so a body
/// that breaks off early is taken as complete with the bytes received. Only
/// a timeout fails the read.
pub fn read_body<R: io::Read>(reader: &mut R) -> Result<Vec<u8>, JPIPError> {
    let mut stream = Vec::new();
    let mut buffer = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(length) => stream.extend_from_slice(&buffer[..length]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if error.kind() == io::ErrorKind::TimedOut => {
                return Err(JPIPError::Transport {
                    error: error.to_string(),
                })
            }
            Err(error) => {
                warn!("stream ended after {} bytes: {}", stream.len(), error);
                break;
            }
        }
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChunkedReader {
        data: Vec<u8>,
        position: usize,
        chunk: usize,
        fail: Option<io::ErrorKind>,
    }

    impl io::Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.position == self.data.len() {
                return match self.fail {
                    Some(kind) => Err(io::Error::new(kind, "closed")),
                    None => Ok(0),
                };
            }
            let length = self
                .chunk
                .min(buf.len())
                .min(self.data.len() - self.position);
            buf[..length].copy_from_slice(&self.data[self.position..self.position + length]);
            self.position += length;
            Ok(length)
        }
    }

    #[test]
    fn test_read_body_accumulates_chunks() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = ChunkedReader {
            data: data.clone(),
            position: 0,
            chunk: 7,
            fail: None,
        };
        assert_eq!(read_body(&mut reader).unwrap(), data);
    }

    #[test]
    fn test_read_body_broken_off_is_done() {
        let mut reader = ChunkedReader {
            data: vec![1, 2, 3],
            position: 0,
            chunk: 2,
            fail: Some(io::ErrorKind::Other),
        };
        assert_eq!(read_body(&mut reader).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_read_body_timeout_is_transport_error() {
        let mut reader = ChunkedReader {
            data: vec![1, 2, 3],
            position: 0,
            chunk: 2,
            fail: Some(io::ErrorKind::TimedOut),
        };
        assert!(matches!(
            read_body(&mut reader),
            Err(JPIPError::Transport { .. })
        ));
    }

    #[test]
    fn test_uri_trailing_question_mark() {
        let client = JPIPClient::new("http://localhost:8080/jpip?").unwrap();
        assert_eq!(client.uri(), "http://localhost:8080/jpip");
        assert_eq!(client.url("cid=1"), "http://localhost:8080/jpip?cid=1");
    }
}
