//! Serialization of the computed structures and assembly of the final
//! image.
//!
//! The whole volume is assembled in memory first — every structure lands in
//! its absolute byte range of a zero-filled buffer, and all target ranges
//! are disjoint by construction. Persisting goes through a temp file in the
//! destination directory followed by a rename, so a failed run never leaves
//! a half-written image at the output path.

use crate::dirent;
use crate::group::{self, BlockGroup};
use crate::layout::{
    inode_group, inode_offset, Geometry, BLOCKS_PER_GROUP, BLOCK_SIZE, EXT2_SUPER_MAGIC,
    FIRST_DATA_BLOCK, GDT_BLOCK, GROUP_DESC_SIZE, INODES_PER_GROUP, INODE_SIZE, LOST_FOUND_INO,
    MODE_DIR_0755, ROOT_INO, SECTORS_PER_BLOCK, SUPERBLOCK_BLOCK,
};
use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Run every allocation pass and serialize the result into a disk-size
/// buffer.
pub fn assemble(geo: &Geometry) -> Result<Vec<u8>> {
    let mut groups = group::build_groups(geo);
    let objects = group::place_reserved_objects(geo, &mut groups)?;

    // Totals are summed only now, after both allocation passes have run;
    // any earlier sum would be stale.
    let free_blocks: usize = groups.iter().map(|g| g.free_blocks_count).sum();
    let free_inodes: usize = groups.iter().map(|g| g.free_inodes_count).sum();
    debug!(
        "allocation done: {free_blocks} of {} blocks free, {free_inodes} of {} inodes free",
        geo.block_count, geo.inode_count
    );

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let mut image = vec![0u8; geo.disk_size];
    write_superblock(&mut image, geo, free_blocks, free_inodes, now);
    write_group_descriptors(&mut image, &groups);

    for g in &groups {
        block_mut(&mut image, g.block_bitmap_block).copy_from_slice(g.block_bitmap.as_bytes());
        block_mut(&mut image, g.inode_bitmap_block).copy_from_slice(g.inode_bitmap.as_bytes());
    }

    // Links: root is referenced by its own `.`, its `..` and
    // lost+found's `..`; lost+found by its `.` and the root entry.
    write_inode(
        &mut image,
        &groups[inode_group(ROOT_INO)],
        ROOT_INO,
        3,
        objects.root_block,
    );
    write_inode(
        &mut image,
        &groups[inode_group(LOST_FOUND_INO)],
        LOST_FOUND_INO,
        2,
        objects.lost_found_block,
    );

    block_mut(&mut image, objects.root_block).copy_from_slice(&dirent::root_block());
    block_mut(&mut image, objects.lost_found_block).copy_from_slice(&dirent::lost_found_block());

    Ok(image)
}

/// Persist the assembled image. Writes to `<path>.tmp` and renames onto
/// `path` only once the full write succeeded; on failure the temp file is
/// removed and the output path is left untouched.
pub fn write_image(path: &Path, image: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    let result = (|| -> Result<()> {
        fs::write(&tmp, image)
            .with_context(|| format!("failed to write image to {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move image into place at {}", path.display()))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn block_mut(image: &mut [u8], block: usize) -> &mut [u8] {
    &mut image[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE]
}

fn write_superblock(
    image: &mut [u8],
    geo: &Geometry,
    free_blocks: usize,
    free_inodes: usize,
    now: u32,
) {
    let offset = SUPERBLOCK_BLOCK * BLOCK_SIZE;
    let sb = &mut image[offset..offset + BLOCK_SIZE];

    // s_inodes_count
    write_le32(sb, 0, geo.inode_count as u32);
    // s_blocks_count
    write_le32(sb, 4, geo.block_count as u32);
    // s_r_blocks_count (reserved)
    write_le32(sb, 8, 0);
    // s_free_blocks_count
    write_le32(sb, 12, free_blocks as u32);
    // s_free_inodes_count
    write_le32(sb, 16, free_inodes as u32);
    // s_first_data_block (1 for 1KB blocks)
    write_le32(sb, 20, FIRST_DATA_BLOCK as u32);
    // s_log_block_size (0 = 1024)
    write_le32(sb, 24, 0);
    // s_log_frag_size
    write_le32(sb, 28, 0);
    // s_blocks_per_group
    write_le32(sb, 32, BLOCKS_PER_GROUP as u32);
    // s_frags_per_group
    write_le32(sb, 36, BLOCKS_PER_GROUP as u32);
    // s_inodes_per_group
    write_le32(sb, 40, INODES_PER_GROUP as u32);
    // s_mtime, s_wtime
    write_le32(sb, 44, now);
    write_le32(sb, 48, now);
    // s_mnt_count
    write_le16(sb, 52, 0);
    // s_max_mnt_count
    write_le16(sb, 54, 20);
    // s_magic
    write_le16(sb, 56, EXT2_SUPER_MAGIC);
    // s_state (clean)
    write_le16(sb, 58, 1);
    // s_errors (continue)
    write_le16(sb, 60, 1);
    // s_rev_level (0, so inode size is the fixed 128 bytes)
    write_le32(sb, 76, 0);
}

fn write_group_descriptors(image: &mut [u8], groups: &[BlockGroup]) {
    let offset = GDT_BLOCK * BLOCK_SIZE;
    for g in groups {
        let bg =
            &mut image[offset + g.id * GROUP_DESC_SIZE..offset + (g.id + 1) * GROUP_DESC_SIZE];
        // bg_block_bitmap
        write_le32(bg, 0, g.block_bitmap_block as u32);
        // bg_inode_bitmap
        write_le32(bg, 4, g.inode_bitmap_block as u32);
        // bg_inode_table
        write_le32(bg, 8, g.inode_table_block as u32);
        // bg_free_blocks_count
        write_le16(bg, 12, g.free_blocks_count as u16);
        // bg_free_inodes_count
        write_le16(bg, 14, g.free_inodes_count as u16);
        // bg_used_dirs_count
        write_le16(bg, 16, g.used_dirs_count as u16);
        // bg_pad + bg_reserved stay zero
    }
}

/// Pack one 128-byte directory inode into its slot in `group`'s inode
/// table. Only the fields this format uses are non-zero.
fn write_inode(image: &mut [u8], group: &BlockGroup, ino: u32, links: u16, data_block: usize) {
    let offset = group.inode_table_block * BLOCK_SIZE + inode_offset(ino) * INODE_SIZE;
    let inode = &mut image[offset..offset + INODE_SIZE];

    // i_mode: directory, permission 0755
    write_le16(inode, 0, MODE_DIR_0755);
    // i_size
    write_le32(inode, 4, BLOCK_SIZE as u32);
    // i_links_count
    write_le16(inode, 26, links);
    // i_blocks (512-byte sectors)
    write_le32(inode, 28, SECTORS_PER_BLOCK as u32);
    // i_block[0]
    write_le32(inode, 40, data_block as u32);
}

fn write_le16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_le32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
