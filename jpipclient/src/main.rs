use clap::Parser;
use log::info;
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::str::FromStr;
use std::time::Duration;

use imgdec::{BridgeConfig, DecodedImage, ImgdecClient, DEFAULT_ADDRESS};
use jpip::{JPIPClient, StreamKind};
use jpipview::ImageManager;

#[derive(Parser)]
struct Opts {
    /// JPIP server URI, e.g. http://localhost:8080/jpip
    #[clap(short, long, env = "JPIP_SERVER")]
    server: String,

    /// Address of the decoding server
    #[clap(short, long, env = "JPIP_DECODER", default_value = DEFAULT_ADDRESS)]
    decoder: String,

    /// Network timeout in seconds, 0 keeps the default of 30
    #[clap(short, long, env = "JPIP_TIMEOUT", default_value = "30")]
    timeout: u64,

    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Fetch and decode a whole frame of the target
    View(View),

    /// Fetch and decode a region of a frame of the target
    Region(Region),

    /// Print the XML metadata of the target (stdout)
    Xml(Target),

    /// Ask the decoding server to save the cached target as JP2
    Save(Target),

    /// Stop the decoding server
    Quit,
}

#[derive(Parser)]
struct Target {
    /// Target name on the JPIP server
    target: String,

    /// Frame width
    fw: u32,

    /// Frame height
    fh: u32,

    /// Requested stream type, jpt-stream or jpp-stream
    #[clap(short, long)]
    stream_type: Option<String>,

    /// Leave the channel open on both servers
    #[clap(short, long)]
    keep_channel: bool,
}

#[derive(Parser)]
struct View {
    #[clap(flatten)]
    target: Target,

    /// Path to write the raw interleaved samples to
    #[clap(short, long)]
    output: Option<String>,
}

#[derive(Parser)]
struct Region {
    #[clap(flatten)]
    target: Target,

    /// Region offset x
    rx: u32,

    /// Region offset y
    ry: u32,

    /// Region width
    rw: u32,

    /// Region height
    rh: u32,

    /// Path to write the raw interleaved samples to
    #[clap(short, long)]
    output: Option<String>,
}

fn write_samples(image: &DecodedImage, output: Option<&str>) -> io::Result<()> {
    println!(
        "{}x{} {} channel(s)",
        image.width(),
        image.height(),
        image.channels()
    );
    if let Some(path) = output {
        let mut file = File::create(path)?;
        file.write_all(image.data())?;
        info!("wrote {} bytes to {}", image.data().len(), path);
    }
    Ok(())
}

fn open(manager: &mut ImageManager, target: &Target) -> Result<DecodedImage, Box<dyn Error>> {
    let stream_kind = match &target.stream_type {
        Some(value) => Some(StreamKind::from_str(value)?),
        None => None,
    };
    Ok(manager.get_image(&target.target, (target.fw, target.fh), stream_kind)?)
}

fn close(manager: &mut ImageManager, target: &Target) -> Result<(), Box<dyn Error>> {
    if !target.keep_channel {
        manager.close_channel()?;
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();
    let timeout = Duration::from_secs(opts.timeout);

    let imgdec = ImgdecClient::new(BridgeConfig {
        address: opts.decoder,
        timeout,
    });

    if let SubCommand::Quit = opts.subcommand {
        imgdec.quit()?;
        return Ok(());
    }

    let jpip = if opts.timeout == 0 {
        JPIPClient::new(&opts.server)?
    } else {
        JPIPClient::with_timeout(&opts.server, timeout)?
    };
    let mut manager = ImageManager::new(jpip, imgdec);

    match opts.subcommand {
        SubCommand::View(c) => {
            let image = open(&mut manager, &c.target)?;
            write_samples(&image, c.output.as_deref())?;
            close(&mut manager, &c.target)?;
        }
        SubCommand::Region(c) => {
            open(&mut manager, &c.target)?;
            let image = manager.get_region(
                (c.target.fw, c.target.fh),
                (c.rx, c.ry),
                (c.rw, c.rh),
            )?;
            write_samples(&image, c.output.as_deref())?;
            close(&mut manager, &c.target)?;
        }
        SubCommand::Xml(c) => {
            open(&mut manager, &c)?;
            match manager.get_xml()? {
                Some(xml) => io::stdout().write_all(&xml)?,
                None => info!("no XML metadata"),
            }
            close(&mut manager, &c)?;
        }
        SubCommand::Save(c) => {
            open(&mut manager, &c)?;
            manager.save_jp2()?;
            close(&mut manager, &c)?;
        }
        SubCommand::Quit => {}
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => {
            return Err(e.to_string().into());
        }
        Ok(_) => Ok(()),
    }
}
