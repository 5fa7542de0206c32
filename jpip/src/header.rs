use log::{debug, warn};
use reqwest::header::HeaderMap;

use crate::{JPIPError, StreamKind};

const HEADER_FSIZ: &str = "JPIP-fsiz";
const HEADER_ROFF: &str = "JPIP-roff";
const HEADER_RSIZ: &str = "JPIP-rsiz";
const HEADER_CNEW: &str = "JPIP-cnew";
const HEADER_TID: &str = "JPIP-tid";
const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Parses a "W,H" or "X,Y" header value into a pair of integers.
pub fn parse_pair(header: &'static str, value: &str) -> Result<(u32, u32), JPIPError> {
    let malformed = || JPIPError::HeaderMalformed {
        header,
        value: value.to_owned(),
    };

    let (first, second) = value.split_once(',').ok_or_else(malformed)?;
    let first = first.trim().parse::<u32>().map_err(|_| malformed())?;
    let second = second.trim().parse::<u32>().map_err(|_| malformed())?;

    Ok((first, second))
}

/// Extracts the channel id from a `JPIP-cnew` value such as
/// `cid=ABC123,path=jpip,transport=http`.
pub fn parse_channel_id(value: &str) -> Result<String, JPIPError> {
    value
        .split(',')
        .filter_map(|field| field.split_once('='))
        .find(|(key, _)| key.trim() == "cid")
        .map(|(_, cid)| cid.trim())
        .filter(|cid| !cid.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| JPIPError::HeaderMalformed {
            header: HEADER_CNEW,
            value: value.to_owned(),
        })
}

/// Extracts the transaction id from a `JPIP-tid` value `tid=<value>`.
/// Everything after the first `=` is the id.
pub fn parse_transaction_id(value: &str) -> Result<String, JPIPError> {
    value
        .split_once('=')
        .map(|(_, tid)| tid.trim())
        .filter(|tid| !tid.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| JPIPError::HeaderMalformed {
            header: HEADER_TID,
            value: value.to_owned(),
        })
}

/// Matches a `Content-Type` value against the two stream packagings.
pub fn parse_stream_kind(value: &str) -> Option<StreamKind> {
    let value = value.trim();
    if value.ends_with(StreamKind::JPT.as_str()) {
        Some(StreamKind::JPT)
    } else if value.ends_with(StreamKind::JPP.as_str()) {
        Some(StreamKind::JPP)
    } else {
        None
    }
}

/// The JPIP response headers of one reply.
///
/// Every field is optional: a header that is absent, or whose value does not
/// parse, leaves the corresponding field unset without affecting the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMetadata {
    pub(crate) fsiz: Option<(u32, u32)>,
    pub(crate) roff: Option<(u32, u32)>,
    pub(crate) rsiz: Option<(u32, u32)>,
    pub(crate) cid: Option<String>,
    pub(crate) tid: Option<String>,
    pub(crate) stream_kind: Option<StreamKind>,
}

impl ResponseMetadata {
    pub fn from_headers(headers: &HeaderMap) -> ResponseMetadata {
        let mut metadata = ResponseMetadata::default();

        if let Some(value) = header_value(headers, HEADER_CONTENT_TYPE) {
            debug!("{}: {}", HEADER_CONTENT_TYPE, value);
            metadata.stream_kind = parse_stream_kind(value);
        }

        metadata.fsiz = parse_header(headers, HEADER_FSIZ, |v| parse_pair(HEADER_FSIZ, v));
        metadata.roff = parse_header(headers, HEADER_ROFF, |v| parse_pair(HEADER_ROFF, v));
        metadata.rsiz = parse_header(headers, HEADER_RSIZ, |v| parse_pair(HEADER_RSIZ, v));
        metadata.cid = parse_header(headers, HEADER_CNEW, parse_channel_id);
        metadata.tid = parse_header(headers, HEADER_TID, parse_transaction_id);

        metadata
    }

    pub fn fsiz(&self) -> Option<(u32, u32)> {
        self.fsiz
    }

    pub fn roff(&self) -> Option<(u32, u32)> {
        self.roff
    }

    pub fn rsiz(&self) -> Option<(u32, u32)> {
        self.rsiz
    }

    pub fn cid(&self) -> Option<&str> {
        self.cid.as_deref()
    }

    pub fn tid(&self) -> Option<&str> {
        self.tid.as_deref()
    }

    pub fn stream_kind(&self) -> Option<StreamKind> {
        self.stream_kind
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
    let value = headers.get(name)?;
    match value.to_str() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} header is not visible ASCII, ignored", name);
            None
        }
    }
}

fn parse_header<T, F>(headers: &HeaderMap, name: &'static str, parse: F) -> Option<T>
where
    T: std::fmt::Debug,
    F: Fn(&str) -> Result<T, JPIPError>,
{
    let value = header_value(headers, name)?;
    match parse(value) {
        Ok(parsed) => {
            debug!("{}: {:?}", name, parsed);
            Some(parsed)
        }
        Err(error) => {
            warn!("{}", error);
            None
        }
    }
}
