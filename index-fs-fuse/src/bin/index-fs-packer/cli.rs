use std::path::PathBuf;

use clap::{Parser, Subcommand};
use index_fs::SECTOR_SIZE;
use typed_bytesize::ByteSizeIec;

#[derive(Parser)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format a new image and pack every regular file of a directory into it
    Pack {
        /// Source directory
        #[arg(long, short)]
        source: PathBuf,

        /// Output directory, the image is written to `fs.img` inside it
        #[arg(long, short = 'O')]
        out_dir: PathBuf,

        /// Image size in sectors
        #[arg(long, default_value_t = default_sectors())]
        sectors: u32,
    },

    /// Print the contents of one file of an image
    Cat {
        /// Image path
        #[arg(long, short)]
        image: PathBuf,

        /// Descriptor sector of the file
        #[arg(long)]
        sector: u32,
    },
}

/// 默认镜像 8 MiB
fn default_sectors() -> u32 {
    (ByteSizeIec::mib(8).0 / SECTOR_SIZE as u64) as u32
}
