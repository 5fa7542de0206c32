use log::{debug, warn};
use std::error;
use std::fmt;
use std::str;

mod client;
mod header;
mod request;

pub use client::{read_body, JPIPClient};
pub use header::{
    parse_channel_id, parse_pair, parse_stream_kind, parse_transaction_id, ResponseMetadata,
};
pub use request::ViewWindowRequest;

#[derive(Debug)]
pub enum JPIPError {
    Transport {
        error: String,
    },
    Http {
        status: u16,
        reason: String,
    },
    Redirect {
        status: u16,
        location: String,
    },
    HeaderMalformed {
        header: &'static str,
        value: String,
    },
    ChannelAlreadyOpen {
        cid: String,
    },
    StreamKindConflict {
        requested: StreamKind,
        negotiated: StreamKind,
    },
    NoChannel,
    InvalidStreamKind {
        value: String,
    },
}

impl error::Error for JPIPError {}
impl fmt::Display for JPIPError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Transport { error } => {
                write!(f, "transport error {}", error)
            }
            Self::Http { status, reason } => {
                write!(f, "server responded {} {}", status, reason)
            }
            Self::Redirect { status, location } => {
                write!(
                    f,
                    "unexpected redirect {} to {:?}, redirects are not followed",
                    status, location
                )
            }
            Self::HeaderMalformed { header, value } => {
                write!(f, "malformed {} header value {:?}", header, value)
            }
            Self::ChannelAlreadyOpen { cid } => {
                write!(
                    f,
                    "channel {:?} already open, only one channel per session",
                    cid
                )
            }
            Self::StreamKindConflict {
                requested,
                negotiated,
            } => {
                write!(
                    f,
                    "requested {} but session already negotiated {}",
                    requested, negotiated
                )
            }
            Self::NoChannel => {
                write!(f, "no channel or transaction id in session")
            }
            Self::InvalidStreamKind { value } => {
                write!(f, "invalid stream type {:?}", value)
            }
        }
    }
}

/// Packaging of the returned codestream, negotiated with the `type=`
/// request field and reported back through `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Tile-based stream.
    JPT,
    /// Precinct-based stream.
    JPP,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::JPT => "jpt-stream",
            StreamKind::JPP => "jpp-stream",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl str::FromStr for StreamKind {
    type Err = JPIPError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpt" | "jpt-stream" => Ok(StreamKind::JPT),
            "jpp" | "jpp-stream" => Ok(StreamKind::JPP),
            _ => Err(JPIPError::InvalidStreamKind {
                value: s.to_owned(),
            }),
        }
    }
}

/// Identifiers and geometry negotiated for one logical image session.
///
/// A session is only ever changed by [`Session::merge`] with the metadata of
/// a successful response, so a failed request leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    target: Option<String>,
    cid: Option<String>,
    tid: Option<String>,
    fsiz: Option<(u32, u32)>,
    roff: Option<(u32, u32)>,
    rsiz: Option<(u32, u32)>,
    stream_kind: Option<StreamKind>,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.cid.as_deref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.tid.as_deref()
    }

    pub fn full_width(&self) -> Option<u32> {
        self.fsiz.map(|(width, _)| width)
    }

    pub fn full_height(&self) -> Option<u32> {
        self.fsiz.map(|(_, height)| height)
    }

    pub fn full_size(&self) -> Option<(u32, u32)> {
        self.fsiz
    }

    pub fn region_offset_x(&self) -> Option<u32> {
        self.roff.map(|(x, _)| x)
    }

    pub fn region_offset_y(&self) -> Option<u32> {
        self.roff.map(|(_, y)| y)
    }

    pub fn region_offset(&self) -> Option<(u32, u32)> {
        self.roff
    }

    pub fn region_width(&self) -> Option<u32> {
        self.rsiz.map(|(width, _)| width)
    }

    pub fn region_height(&self) -> Option<u32> {
        self.rsiz.map(|(_, height)| height)
    }

    pub fn region_size(&self) -> Option<(u32, u32)> {
        self.rsiz
    }

    pub fn stream_kind(&self) -> Option<StreamKind> {
        self.stream_kind
    }

    /// Applies the headers of a successful response.
    ///
    /// Only the fields present in the response are overwritten; servers omit
    /// geometry that did not change. The channel id and stream kind are
    /// sticky: once set they are never replaced.
    pub fn merge(&mut self, metadata: &ResponseMetadata) {
        if let Some(fsiz) = metadata.fsiz() {
            self.fsiz = Some(fsiz);
        }
        if let Some(roff) = metadata.roff() {
            self.roff = Some(roff);
        }
        if let Some(rsiz) = metadata.rsiz() {
            self.rsiz = Some(rsiz);
        }
        if let Some(tid) = metadata.tid() {
            self.tid = Some(tid.to_owned());
        }

        if let Some(cid) = metadata.cid() {
            match &self.cid {
                None => {
                    debug!("channel {} assigned", cid);
                    self.cid = Some(cid.to_owned());
                }
                Some(current) if current != cid => {
                    warn!("ignoring new channel {}, session holds {}", cid, current);
                }
                Some(_) => {}
            }
        }

        if let Some(kind) = metadata.stream_kind() {
            match self.stream_kind {
                None => self.stream_kind = Some(kind),
                Some(negotiated) if negotiated != kind => {
                    warn!("ignoring {}, session already negotiated {}", kind, negotiated);
                }
                Some(_) => {}
            }
        }
    }

    // The target is fixed by the first successful request naming one.
    pub(crate) fn bind_target(&mut self, target: Option<&str>) {
        if self.target.is_none() {
            self.target = target.map(str::to_owned);
        }
    }

    pub(crate) fn clear_channel(&mut self) {
        self.cid = None;
    }
}
