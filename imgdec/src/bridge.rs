use log::{debug, info, warn};
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::{read_stream, DecodedImage, ImgdecError};

pub const DEFAULT_ADDRESS: &str = "localhost:5000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const VERSION: &str = "version 1.0";

const MESSAGE_JPT_STREAM: &str = "JPT-stream";
const MESSAGE_PNM_REQUEST: &str = "PNM request";
const MESSAGE_XML_REQUEST: &str = "XML request";
const MESSAGE_TID_REQUEST: &str = "TID request";
const MESSAGE_CID_REQUEST: &str = "CID request";
const MESSAGE_CID_DESTROY: &str = "CID destroy";
const MESSAGE_JP2_SAVE: &str = "JP2 save";
const MESSAGE_QUIT: &str = "QUIT";

const PNM_MAGIC: &[u8] = b"P";
const XML_MAGIC: &[u8] = b"XML";
const CID_LABEL: &[u8] = b"CID";
const TID_LABEL: &[u8] = b"TID";

const PNM_HEADER_LENGTH: usize = 7;
const XML_HEADER_LENGTH: usize = 5;
const ID_HEADER_LENGTH: usize = 4;

const MAX_SAMPLE_VALUE: u8 = 255;

/// Where the decoding server listens and how long each socket operation may
/// block.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub address: String,
    pub timeout: Duration,
}

impl BridgeConfig {
    /// Limit applied to connecting and to every read and write. A zero
    /// timeout falls back to [`DEFAULT_TIMEOUT`].
    pub fn socket_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            address: DEFAULT_ADDRESS.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Client of the decoding server.
///
/// Each message is one short-lived connection: a command line, parameter
/// lines, then an optional binary payload. The connection is dropped when
/// the exchange ends, whether it succeeded or not.
#[derive(Debug, Clone, Default)]
pub struct ImgdecClient {
    config: BridgeConfig,
}

impl ImgdecClient {
    pub fn new(config: BridgeConfig) -> ImgdecClient {
        ImgdecClient { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Caches a JPT-stream on the decoding server.
    pub fn send_jptstream(&self, jptstream: &[u8]) -> Result<(), ImgdecError> {
        info!("Sending {} Data Bytes to decodingServer", jptstream.len());

        let length = jptstream.len().to_string();
        let mut connection =
            self.send(&[MESSAGE_JPT_STREAM, VERSION, length.as_str()], jptstream)?;
        expect_signal(&mut connection, MESSAGE_JPT_STREAM)
    }

    /// Caches a JPT-stream and associates channel `cid` with `target` on the
    /// decoding server.
    pub fn register_jptstream(
        &self,
        jptstream: &[u8],
        target: &str,
        cid: &str,
    ) -> Result<(), ImgdecError> {
        info!(
            "Sending {} Data Bytes to decodingServer for {} on channel {}",
            jptstream.len(),
            target,
            cid
        );

        let length = jptstream.len().to_string();
        let mut connection = self.send(
            &[MESSAGE_JPT_STREAM, VERSION, target, cid, length.as_str()],
            jptstream,
        )?;
        expect_signal(&mut connection, MESSAGE_JPT_STREAM)
    }

    /// Decodes the cached stream of channel `cid` at frame size `fsiz`.
    pub fn get_pnmstream(&self, cid: &str, fsiz: (u32, u32)) -> Result<DecodedImage, ImgdecError> {
        let width = fsiz.0.to_string();
        let height = fsiz.1.to_string();
        let mut connection = self.send(
            &[MESSAGE_PNM_REQUEST, cid, width.as_str(), height.as_str()],
            &[],
        )?;
        decode_pnm(&mut connection)
    }

    /// Fetches the XML metadata cached for channel `cid`.
    pub fn get_xmlstream(&self, cid: &str) -> Result<Vec<u8>, ImgdecError> {
        let mut connection = self.send(&[MESSAGE_XML_REQUEST, cid], &[])?;
        decode_xml(&mut connection)
    }

    /// Asks which channel the decoding server associates with `target`.
    pub fn query_cid(&self, target: &str) -> Result<Option<String>, ImgdecError> {
        let mut connection = self.send(&[MESSAGE_CID_REQUEST, target], &[])?;
        let cid = decode_id(&mut connection, CID_LABEL)?;
        debug!("cid for {}: {:?}", target, cid);
        Ok(cid)
    }

    /// Asks which transaction the decoding server associates with `target`.
    pub fn query_tid(&self, target: &str) -> Result<Option<String>, ImgdecError> {
        let mut connection = self.send(&[MESSAGE_TID_REQUEST, target], &[])?;
        let tid = decode_id(&mut connection, TID_LABEL)?;
        debug!("tid for {}: {:?}", target, tid);
        Ok(tid)
    }

    /// Drops the association of channel `cid` on the decoding server.
    pub fn destroy_cid(&self, cid: &str) -> Result<(), ImgdecError> {
        let mut connection = self.send(&[MESSAGE_CID_DESTROY, cid], &[])?;
        expect_signal(&mut connection, MESSAGE_CID_DESTROY)
    }

    /// Asks the decoding server to save the stream of channel `cid` as a
    /// JP2 file on its side. The server does not reply.
    pub fn save_jp2(&self, cid: &str) -> Result<(), ImgdecError> {
        self.send(&[MESSAGE_JP2_SAVE, cid], &[])?;
        Ok(())
    }

    /// Stops the decoding server.
    pub fn quit(&self) -> Result<(), ImgdecError> {
        self.send(&[MESSAGE_QUIT], &[])?;
        Ok(())
    }

    fn send(&self, lines: &[&str], payload: &[u8]) -> Result<TcpStream, ImgdecError> {
        debug!("decodingServer message {:?}", lines.first());

        let mut message = Vec::with_capacity(payload.len() + 64);
        for line in lines {
            message.extend_from_slice(line.as_bytes());
            message.push(b'\n');
        }
        message.extend_from_slice(payload);

        let mut connection = self.connect()?;
        connection.write_all(&message)?;
        connection.flush()?;

        Ok(connection)
    }

    fn connect(&self) -> Result<TcpStream, ImgdecError> {
        let connect_error = |error: io::Error| ImgdecError::Connect {
            address: self.config.address.clone(),
            error: error.to_string(),
        };

        let timeout = self.config.socket_timeout();

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
        for address in self.config.address.to_socket_addrs().map_err(connect_error)? {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(connection) => {
                    connection.set_read_timeout(Some(timeout))?;
                    connection.set_write_timeout(Some(timeout))?;
                    return Ok(connection);
                }
                Err(error) => last_error = error,
            }
        }

        Err(connect_error(last_error))
    }
}

fn expect_signal<R: io::Read>(reader: &mut R, message: &'static str) -> Result<(), ImgdecError> {
    if decode_signal(reader)? {
        Ok(())
    } else {
        warn!("{} failed", message);
        Err(ImgdecError::Rejected { message })
    }
}

/// Reads the one byte reply signal. Any non-zero value is success.
pub fn decode_signal<R: io::Read>(reader: &mut R) -> Result<bool, ImgdecError> {
    let signal = read_stream(reader, 1)?;
    Ok(signal[0] != 0)
}

/// Reads a raster reply: `P`, the PNM subtype (5 gray, 6 color), width and
/// height as big endian u16, the maximum sample value, then the samples.
///
/// The header is validated before any sample is read.
pub fn decode_pnm<R: io::Read>(reader: &mut R) -> Result<DecodedImage, ImgdecError> {
    let header = read_stream(reader, PNM_HEADER_LENGTH)?;

    if &header[..1] != PNM_MAGIC {
        return Err(ImgdecError::InvalidMagic {
            expected: PNM_MAGIC,
            found: header[..1].to_vec(),
        });
    }

    // P5: gray, P6: color. The subtype may arrive as a number or a digit.
    let channels = match header[1] {
        5 | b'5' => 1,
        6 | b'6' => 3,
        subtype => return Err(ImgdecError::InvalidSubtype { subtype }),
    };

    let width = u16::from_be_bytes([header[2], header[3]]) as u32;
    let height = u16::from_be_bytes([header[4], header[5]]) as u32;
    let max_value = header[6];

    if max_value != MAX_SAMPLE_VALUE {
        return Err(ImgdecError::UnsupportedMaxValue { max_value });
    }

    debug!("PNM {}x{} channels {}", width, height, channels);

    let length = width as usize * height as usize * channels as usize;
    let data = read_stream(reader, length)?;

    DecodedImage::new(width, height, channels, data)
}

/// Reads an XML reply: `XML`, the length as big endian u16, then the data.
pub fn decode_xml<R: io::Read>(reader: &mut R) -> Result<Vec<u8>, ImgdecError> {
    let header = read_stream(reader, XML_HEADER_LENGTH)?;

    if &header[..3] != XML_MAGIC {
        return Err(ImgdecError::InvalidMagic {
            expected: XML_MAGIC,
            found: header[..3].to_vec(),
        });
    }

    let length = u16::from_be_bytes([header[3], header[4]]) as usize;
    read_stream(reader, length)
}

/// Reads an identifier reply: a three byte `label`, a one byte length, then
/// the identifier. A zero length means the server knows no identifier.
pub fn decode_id<R: io::Read>(
    reader: &mut R,
    label: &'static [u8],
) -> Result<Option<String>, ImgdecError> {
    let header = read_stream(reader, ID_HEADER_LENGTH)?;

    if &header[..3] != label {
        return Err(ImgdecError::InvalidMagic {
            expected: label,
            found: header[..3].to_vec(),
        });
    }

    let length = header[3] as usize;
    if length == 0 {
        return Ok(None);
    }

    let id = read_stream(reader, length)?;
    Ok(Some(String::from_utf8_lossy(&id).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reply(header: &[u8], payload: &[u8]) -> Cursor<Vec<u8>> {
        let mut data = header.to_vec();
        data.extend_from_slice(payload);
        Cursor::new(data)
    }

    #[test]
    fn test_decode_pnm_color() {
        let samples: Vec<u8> = (1..=12).collect();
        let mut reader = reply(&[0x50, 0x36, 0x00, 0x02, 0x00, 0x02, 0xFF], &samples);

        let image = decode_pnm(&mut reader).unwrap();
        assert_eq!(image.width(), 2);
        assert_eq!(image.height(), 2);
        assert_eq!(image.channels(), 3);
        assert_eq!(image.data(), samples.as_slice());
    }

    #[test]
    fn test_decode_pnm_gray() {
        let mut reader = reply(&[b'P', 5, 0x01, 0x00, 0x00, 0x01, 255], &[42; 256]);

        let image = decode_pnm(&mut reader).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (256, 1, 1));
    }

    #[test]
    fn test_decode_pnm_rejects_before_payload() {
        let headers: [[u8; 7]; 4] = [
            [b'Q', 6, 0, 2, 0, 2, 255],
            [b'P', 4, 0, 2, 0, 2, 255],
            [b'P', b'7', 0, 2, 0, 2, 255],
            [b'P', 6, 0, 2, 0, 2, 15],
        ];

        for header in headers.iter() {
            let mut reader = reply(header, &[0; 12]);
            assert!(decode_pnm(&mut reader).is_err());
            assert_eq!(reader.position(), PNM_HEADER_LENGTH as u64);
        }

        let mut reader = reply(&[b'P', 6, 0, 2, 0, 2, 15], &[]);
        assert!(matches!(
            decode_pnm(&mut reader),
            Err(ImgdecError::UnsupportedMaxValue { max_value: 15 })
        ));
    }

    #[test]
    fn test_decode_pnm_short_payload() {
        let mut reader = reply(&[b'P', 6, 0, 2, 0, 2, 255], &[0; 11]);
        assert!(matches!(
            decode_pnm(&mut reader),
            Err(ImgdecError::Incomplete {
                expected: 12,
                received: 11
            })
        ));
    }

    #[test]
    fn test_decode_pnm_oversized_header() {
        // 65535x65535 color declared, three samples sent
        let mut reader = reply(&[b'P', 6, 0xFF, 0xFF, 0xFF, 0xFF, 255], &[7; 3]);
        match decode_pnm(&mut reader) {
            Err(ImgdecError::Incomplete { expected, received }) => {
                assert_eq!(expected, 65_535 * 65_535 * 3);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_xml() {
        let mut reader = reply(&[0x58, 0x4D, 0x4C, 0x00, 0x05], b"<xml/>");
        assert_eq!(decode_xml(&mut reader).unwrap(), b"<xml/".to_vec());

        let mut reader = reply(b"XMX\x00\x01", b"a");
        assert!(matches!(
            decode_xml(&mut reader),
            Err(ImgdecError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_decode_id() {
        let mut reader = reply(b"CID\x06", b"ABC123");
        assert_eq!(
            decode_id(&mut reader, CID_LABEL).unwrap(),
            Some("ABC123".to_owned())
        );

        let mut reader = reply(b"CID\x00", b"");
        assert_eq!(decode_id(&mut reader, CID_LABEL).unwrap(), None);

        let mut reader = reply(b"TID\x02", b"T1");
        assert!(decode_id(&mut reader, CID_LABEL).is_err());
    }

    #[test]
    fn test_socket_timeout() {
        let config = BridgeConfig {
            address: DEFAULT_ADDRESS.to_owned(),
            timeout: Duration::from_secs(0),
        };
        assert_eq!(config.socket_timeout(), DEFAULT_TIMEOUT);

        let config = BridgeConfig {
            timeout: Duration::from_millis(250),
            ..config
        };
        assert_eq!(config.socket_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_decode_signal() {
        assert!(decode_signal(&mut Cursor::new(vec![1u8])).unwrap());
        assert!(decode_signal(&mut Cursor::new(vec![7u8])).unwrap());
        assert!(!decode_signal(&mut Cursor::new(vec![0u8])).unwrap());
        assert!(decode_signal(&mut Cursor::new(Vec::<u8>::new())).is_err());
    }
}
