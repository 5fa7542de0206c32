use log::{debug, warn};
use std::error;
use std::fmt;
use std::io::{self, Read};

mod bridge;

pub use bridge::{
    decode_id, decode_pnm, decode_signal, decode_xml, BridgeConfig, ImgdecClient,
    DEFAULT_ADDRESS, DEFAULT_TIMEOUT,
};

const MAX_PREALLOCATION: usize = 1 << 20;

#[derive(Debug)]
pub enum ImgdecError {
    Connect {
        address: String,
        error: String,
    },
    Io {
        error: String,
    },
    Incomplete {
        expected: usize,
        received: usize,
    },
    InvalidMagic {
        expected: &'static [u8],
        found: Vec<u8>,
    },
    InvalidSubtype {
        subtype: u8,
    },
    UnsupportedMaxValue {
        max_value: u8,
    },
    Rejected {
        message: &'static str,
    },
    InvalidRaster {
        width: u32,
        height: u32,
        channels: u8,
        length: usize,
    },
    RegionOutOfRange {
        region: (u32, u32, u32, u32),
        width: u32,
        height: u32,
    },
}

impl error::Error for ImgdecError {}
impl fmt::Display for ImgdecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Connect { address, error } => {
                write!(f, "unable to connect to decoding server {} {}", address, error)
            }
            Self::Io { error } => {
                write!(f, "decoding server i/o error {}", error)
            }
            Self::Incomplete { expected, received } => {
                write!(
                    f,
                    "incomplete transfer, received {} of {} bytes",
                    received, expected
                )
            }
            Self::InvalidMagic { expected, found } => {
                write!(
                    f,
                    "expected header {:?} found {:?}",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(found)
                )
            }
            Self::InvalidSubtype { subtype } => {
                write!(f, "wrong PNM magic number {}", subtype)
            }
            Self::UnsupportedMaxValue { max_value } => {
                write!(f, "maximum sample value {}, only 255 is accepted", max_value)
            }
            Self::Rejected { message } => {
                write!(f, "decoding server rejected {:?}", message)
            }
            Self::InvalidRaster {
                width,
                height,
                channels,
                length,
            } => {
                write!(
                    f,
                    "{} samples do not fill {}x{} raster of {} channels",
                    length, width, height, channels
                )
            }
            Self::RegionOutOfRange {
                region,
                width,
                height,
            } => {
                write!(
                    f,
                    "region out of range: {},{} {}x{} outside {}x{} raster",
                    region.0, region.1, region.2, region.3, width, height
                )
            }
        }
    }
}

impl From<io::Error> for ImgdecError {
    fn from(error: io::Error) -> Self {
        ImgdecError::Io {
            error: error.to_string(),
        }
    }
}

/// An 8-bit raster returned by the decoding server.
///
/// Samples are interleaved row by row, one byte per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl DecodedImage {
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
    ) -> Result<DecodedImage, ImgdecError> {
        let expected = width as usize * height as usize * channels as usize;
        if !(channels == 1 || channels == 3) || data.len() != expected {
            return Err(ImgdecError::InvalidRaster {
                width,
                height,
                channels,
                length: data.len(),
            });
        }

        Ok(DecodedImage {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 1 for gray, 3 for color.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Crops `image` to the region of interest.
///
/// A missing offset starts the region at the origin and a missing size
/// extends it to the raster edge, so with neither the raster is returned
/// unmodified.
pub fn crop(
    image: &DecodedImage,
    offset: Option<(u32, u32)>,
    size: Option<(u32, u32)>,
) -> Result<DecodedImage, ImgdecError> {
    if offset.is_none() && size.is_none() {
        return Ok(image.clone());
    }

    let (x, y) = offset.unwrap_or((0, 0));
    let out_of_range = |width: u32, height: u32| ImgdecError::RegionOutOfRange {
        region: (x, y, width, height),
        width: image.width,
        height: image.height,
    };

    let (width, height) = match size {
        Some(size) => size,
        None => (
            image.width.checked_sub(x).ok_or_else(|| out_of_range(0, 0))?,
            image.height.checked_sub(y).ok_or_else(|| out_of_range(0, 0))?,
        ),
    };

    let right = x.checked_add(width);
    let bottom = y.checked_add(height);
    match (right, bottom) {
        (Some(right), Some(bottom)) if right <= image.width && bottom <= image.height => {}
        _ => return Err(out_of_range(width, height)),
    }

    debug!(
        "crop {},{} {}x{} from {}x{}",
        x, y, width, height, image.width, image.height
    );

    let channels = image.channels as usize;
    let stride = image.width as usize * channels;
    let row_length = width as usize * channels;
    let mut data = Vec::with_capacity(row_length * height as usize);

    for row in y as usize..(y + height) as usize {
        let start = row * stride + x as usize * channels;
        data.extend_from_slice(&image.data[start..start + row_length]);
    }

    DecodedImage::new(width, height, image.channels, data)
}

/// Reads exactly `length` bytes from `reader`, retrying short reads.
///
/// The length comes from a reply header, so the buffer grows with the bytes
/// actually received. A stream that ends first is an incomplete transfer and
/// nothing is returned.
pub fn read_stream<R: io::Read>(reader: &mut R, length: usize) -> Result<Vec<u8>, ImgdecError> {
    let mut stream = Vec::with_capacity(length.min(MAX_PREALLOCATION));
    reader.by_ref().take(length as u64).read_to_end(&mut stream)?;

    if stream.len() < length {
        warn!("failed to read_stream() {} of {} bytes", stream.len(), length);
        return Err(ImgdecError::Incomplete {
            expected: length,
            received: stream.len(),
        });
    }

    Ok(stream)
}
