use crate::{JPIPError, Session, StreamKind};

/// Parameters of one view-window request.
///
/// C.4 View-window request fields: the frame size selects the resolution,
/// the region offset and region size select the area of that frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewWindowRequest {
    target: Option<String>,
    tid: Option<String>,
    fsiz: Option<(u32, u32)>,
    roff: Option<(u32, u32)>,
    rsiz: Option<(u32, u32)>,
    cid: Option<String>,
    cnew: bool,
    stream_kind: Option<StreamKind>,
}

impl ViewWindowRequest {
    pub fn new() -> ViewWindowRequest {
        ViewWindowRequest::default()
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_owned());
        self
    }

    pub fn with_transaction_id(mut self, tid: &str) -> Self {
        self.tid = Some(tid.to_owned());
        self
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.fsiz = Some((width, height));
        self
    }

    pub fn with_region_offset(mut self, x: u32, y: u32) -> Self {
        self.roff = Some((x, y));
        self
    }

    pub fn with_region_size(mut self, width: u32, height: u32) -> Self {
        self.rsiz = Some((width, height));
        self
    }

    pub fn with_channel_id(mut self, cid: &str) -> Self {
        self.cid = Some(cid.to_owned());
        self
    }

    pub fn with_new_channel(mut self) -> Self {
        self.cnew = true;
        self
    }

    pub fn with_stream_kind(mut self, kind: StreamKind) -> Self {
        self.stream_kind = Some(kind);
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.cid.as_deref()
    }

    pub fn new_channel(&self) -> bool {
        self.cnew
    }

    /// Builds the query string for this request against `session`.
    ///
    /// Fails without side effects when the request would open a second
    /// channel, or ask for a stream kind other than the one the session
    /// already negotiated.
    pub fn query_string(&self, session: &Session) -> Result<String, JPIPError> {
        if self.cnew {
            if let Some(cid) = session.channel_id() {
                return Err(JPIPError::ChannelAlreadyOpen {
                    cid: cid.to_owned(),
                });
            }
        }

        let stream_kind = match (self.stream_kind, session.stream_kind()) {
            (Some(requested), Some(negotiated)) if requested != negotiated => {
                return Err(JPIPError::StreamKindConflict {
                    requested,
                    negotiated,
                })
            }
            (Some(requested), _) => Some(requested),
            (None, negotiated) => negotiated,
        };

        let mut fields: Vec<String> = vec![];

        if let (Some(target), None) = (&self.target, &self.cid) {
            fields.push(format!("target={}", target));
        }
        if let Some(tid) = &self.tid {
            fields.push(format!("tid={}", tid));
        }
        if let Some((width, height)) = self.fsiz {
            fields.push(format!("fsiz={},{}", width, height));
        }
        if let Some((x, y)) = self.roff {
            fields.push(format!("roff={},{}", x, y));
        }
        if let Some((width, height)) = self.rsiz {
            fields.push(format!("rsiz={},{}", width, height));
        }
        if let Some(cid) = &self.cid {
            fields.push(format!("cid={}", cid));
        }
        if self.cnew {
            fields.push("cnew=http".to_owned());
        }
        if let Some(kind) = stream_kind {
            fields.push(format!("type={}", kind));
        }

        Ok(fields.join("&"))
    }
}

/// C.5.2 Metadata request on the channel of `session`.
pub fn metadata_query(session: &Session) -> Result<String, JPIPError> {
    let cid = session.channel_id().ok_or(JPIPError::NoChannel)?;
    Ok(format!("cid={}&metareq=[xml_]", cid))
}

/// C.3.4 Channel close, sent as the sole request field.
pub fn close_query(cid: &str) -> String {
    format!("cclose={}", cid)
}
