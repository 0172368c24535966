use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Disk image path, created and truncated
    #[arg(long, short)]
    pub image: PathBuf,

    /// Total sectors of the image
    #[arg(long, short, default_value_t = 16 * 2048)]
    pub sectors: usize,

    /// Host files to pack into the root directory
    pub pack: Vec<PathBuf>,
}
