use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mkext2",
    about = "Format a fixed-geometry ext2 disk image",
    long_about = "Build a minimal ext2 volume from scratch: block groups, bitmaps, \
root and lost+found directories, serialized bit-exactly into a fresh image file"
)]
pub struct Args {
    /// Output image path
    #[arg(short = 'o', long = "output", default_value = "disk.img")]
    pub output: PathBuf,

    /// Disk size in MiB
    #[arg(short = 's', long = "size-mib", default_value = "64")]
    pub size_mib: usize,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}
