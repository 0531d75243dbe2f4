use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 12207)]
    pub port: u16,

    /// Root directory for source photos and their sidecars
    #[arg(long, env = "PHOTO_MARKUP_PHOTO_ROOT")]
    pub photo_root: PathBuf,

    /// Root directory uploaded archives are stored under
    #[arg(long, env = "PHOTO_MARKUP_OUTPUT_ROOT")]
    pub output_root: PathBuf,

    /// Directory for per-job scratch space (defaults to the system temp dir)
    #[arg(long, env = "PHOTO_MARKUP_SCRATCH_ROOT")]
    pub scratch_root: Option<PathBuf>,

    /// Primary font family for annotation text
    #[arg(long, env = "PHOTO_MARKUP_FONT_FAMILY", default_value = "Arial")]
    pub font_family: String,

    /// Extra font files to load on top of the system fonts
    #[arg(long, env = "PHOTO_MARKUP_FONT_DIR")]
    pub font_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Export every photo under the photo root into one archive
    Export {
        /// Write clean images without drawing annotations
        #[arg(long)]
        no_annotations: bool,

        /// Put images into one folder per area
        #[arg(long)]
        group_by_area: bool,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("photo-markup"))
    }
}
