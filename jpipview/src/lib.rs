use imgdec::{crop, DecodedImage, ImgdecClient, ImgdecError};
use jpip::{JPIPClient, JPIPError, Session, StreamKind};
use log::{info, warn};
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum ImageManagerError {
    Jpip { error: JPIPError },
    Imgdec { error: ImgdecError },
}

impl error::Error for ImageManagerError {}
impl fmt::Display for ImageManagerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Jpip { error } => write!(f, "jpip {}", error),
            Self::Imgdec { error } => write!(f, "imgdec {}", error),
        }
    }
}

impl From<JPIPError> for ImageManagerError {
    fn from(error: JPIPError) -> Self {
        ImageManagerError::Jpip { error }
    }
}

impl From<ImgdecError> for ImageManagerError {
    fn from(error: ImgdecError) -> Self {
        ImageManagerError::Imgdec { error }
    }
}

/// Retrieves view windows of one remote image.
///
/// The JPIP client fetches the codestream, the decoding server turns the
/// accumulated stream into a raster, and the raster is cropped to the region
/// the server reported for the last response.
pub struct ImageManager {
    jpip: JPIPClient,
    imgdec: ImgdecClient,
    image: Option<DecodedImage>,
}

impl ImageManager {
    pub fn new(jpip: JPIPClient, imgdec: ImgdecClient) -> ImageManager {
        ImageManager {
            jpip,
            imgdec,
            image: None,
        }
    }

    pub fn session(&self) -> &Session {
        self.jpip.session()
    }

    /// Width of the last decoded raster, before cropping.
    pub fn orig_width(&self) -> Option<u32> {
        self.image.as_ref().map(DecodedImage::width)
    }

    /// Height of the last decoded raster, before cropping.
    pub fn orig_height(&self) -> Option<u32> {
        self.image.as_ref().map(DecodedImage::height)
    }

    /// Opens `target` at frame size `fsiz` and returns the decoded view.
    ///
    /// When the decoding server still associates a channel with `target`,
    /// that channel id is presented to the JPIP server so the cached stream
    /// is reused.
    pub fn get_image(
        &mut self,
        target: &str,
        fsiz: (u32, u32),
        stream_kind: Option<StreamKind>,
    ) -> Result<DecodedImage, ImageManagerError> {
        let jptstream = match self.imgdec.query_cid(target)? {
            Some(refcid) => {
                info!("reusing decoder channel {} for {}", refcid, target);
                self.jpip.reopen_channel(fsiz, &refcid, stream_kind)?
            }
            None => self.jpip.open_channel(target, None, fsiz, stream_kind)?,
        };

        let cid = self
            .jpip
            .session()
            .channel_id()
            .ok_or(JPIPError::NoChannel)?
            .to_owned();

        info!("decoding to PNM image");
        self.imgdec
            .register_jptstream(jptstream.as_deref().unwrap_or_default(), target, &cid)?;
        self.decode(&cid, fsiz)
    }

    /// Requests a region of frame `fsiz` on the open channel and returns the
    /// decoded region.
    pub fn get_region(
        &mut self,
        fsiz: (u32, u32),
        roff: (u32, u32),
        rsiz: (u32, u32),
    ) -> Result<DecodedImage, ImageManagerError> {
        let jptstream = self.jpip.request_region(fsiz, roff, rsiz)?;

        let session = self.jpip.session();
        let id = session
            .channel_id()
            .or_else(|| session.transaction_id())
            .ok_or(JPIPError::NoChannel)?
            .to_owned();

        info!("decoding to PNM image");
        if let Some(jptstream) = jptstream {
            self.imgdec.send_jptstream(&jptstream)?;
        }
        self.decode(&id, fsiz)
    }

    /// Fetches the XML metadata of the target. Returns `None` when the
    /// server had no metadata to send.
    pub fn get_xml(&mut self) -> Result<Option<Vec<u8>>, ImageManagerError> {
        let jptstream = match self.jpip.request_xml()? {
            Some(jptstream) => jptstream,
            None => return Ok(None),
        };
        let cid = self
            .jpip
            .session()
            .channel_id()
            .ok_or(JPIPError::NoChannel)?
            .to_owned();

        self.imgdec.send_jptstream(&jptstream)?;
        Ok(Some(self.imgdec.get_xmlstream(&cid)?))
    }

    /// Asks the decoding server to save what it cached for the channel as
    /// a JP2 file.
    pub fn save_jp2(&self) -> Result<(), ImageManagerError> {
        let cid = self.session().channel_id().ok_or(JPIPError::NoChannel)?;
        self.imgdec.save_jp2(cid)?;
        Ok(())
    }

    /// Releases the channel on both the decoding server and the JPIP server.
    ///
    /// Both sides are always asked, decoding server first; the first failure
    /// is returned.
    pub fn close_channel(&mut self) -> Result<(), ImageManagerError> {
        let cid = match self.session().channel_id() {
            Some(cid) => cid.to_owned(),
            None => return Ok(()),
        };

        let destroyed = self.imgdec.destroy_cid(&cid);
        if let Err(error) = &destroyed {
            warn!("decoder kept channel {}: {}", cid, error);
        }
        let closed = self.jpip.close_channel();
        destroyed?;
        closed?;

        Ok(())
    }

    fn decode(&mut self, id: &str, fsiz: (u32, u32)) -> Result<DecodedImage, ImageManagerError> {
        let session = self.jpip.session();
        let fsiz = session.full_size().unwrap_or(fsiz);
        let (roff, rsiz) = (session.region_offset(), session.region_size());

        let image = self.imgdec.get_pnmstream(id, fsiz)?;
        info!("     done");

        let view = crop(&image, roff, rsiz)?;
        self.image = Some(image);

        Ok(view)
    }
}
