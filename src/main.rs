mod bitmap;
mod cli;
mod dirent;
mod group;
mod image;
mod layout;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use log::info;

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .format_timestamp(None)
        .format_target(false)
        .init();

    let disk_size = args
        .size_mib
        .checked_mul(1024 * 1024)
        .context("disk size in MiB is out of range")?;
    let geometry = layout::Geometry::for_disk_size(disk_size)?;
    info!(
        "formatting {} blocks in {} groups, {} inodes",
        geometry.block_count, geometry.group_count, geometry.inode_count
    );

    let disk = image::assemble(&geometry)?;
    image::write_image(&args.output, &disk)?;

    println!(
        "Formatted {} with ext2 ({} MiB, {} block groups)",
        args.output.display(),
        args.size_mib,
        geometry.group_count
    );
    Ok(())
}
