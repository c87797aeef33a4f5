//! Volume geometry: the fixed format parameters and the values derived
//! from them.
//!
//! The on-disk format is deliberately rigid — 1 KiB blocks, 128-byte
//! inodes, one superblock/GDT copy in group 0 and nowhere else. Only the
//! disk size varies at runtime.

use anyhow::{bail, Result};

pub const BLOCK_SIZE: usize = 1024;
pub const SECTORS_PER_BLOCK: usize = BLOCK_SIZE / 512;
pub const INODE_SIZE: usize = 128;
pub const BLOCKS_PER_GROUP: usize = 8192;
pub const INODES_PER_GROUP: usize = 2048;

pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Block 0 is the boot block; block numbering starts at 1 for 1 KiB blocks.
pub const FIRST_DATA_BLOCK: usize = 1;
/// Absolute block holding the superblock.
pub const SUPERBLOCK_BLOCK: usize = 1;
/// Absolute block holding the (single-block) group descriptor table.
pub const GDT_BLOCK: usize = 2;

// Inode numbers (1-based; 1..=10 are reserved by convention)
pub const ROOT_INO: u32 = 2;
pub const LOST_FOUND_INO: u32 = 11;
pub const LAST_RESERVED_INO: u32 = 10;

/// Directory file-type tag in directory entries.
pub const EXT2_FT_DIR: u8 = 2;

/// Size of one group descriptor record in the GDT.
pub const GROUP_DESC_SIZE: usize = 32;

/// Inode mode for a directory with permission 0755.
pub const MODE_DIR_0755: u16 = 0o040000 | 0o755; // 0x41ED

/// Everything the build derives from the disk size.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub disk_size: usize,
    pub block_count: usize,
    pub group_count: usize,
    pub inode_count: usize,
    /// Blocks occupied by one group's slice of the inode table.
    pub inode_table_blocks: usize,
}

impl Geometry {
    /// Validate the parameters and derive counts. All configuration errors
    /// surface here, before anything is allocated or written.
    pub fn for_disk_size(disk_size: usize) -> Result<Self> {
        if disk_size == 0 || disk_size % BLOCK_SIZE != 0 {
            bail!(
                "disk size {disk_size} is not a positive multiple of the {BLOCK_SIZE}-byte block size"
            );
        }
        if (INODES_PER_GROUP * INODE_SIZE) % BLOCK_SIZE != 0 {
            bail!("inode table for one group does not fill a whole number of blocks");
        }

        let block_count = disk_size / BLOCK_SIZE;
        if block_count % BLOCKS_PER_GROUP != 0 {
            // A partial trailing group would make the per-group free counts
            // disagree with the bitmap; refuse the geometry instead.
            bail!(
                "block count {block_count} is not a whole number of {BLOCKS_PER_GROUP}-block groups"
            );
        }
        let group_count = block_count / BLOCKS_PER_GROUP;
        if group_count * GROUP_DESC_SIZE > BLOCK_SIZE {
            // The descriptor table occupies exactly one block at block 2;
            // more groups than fit there would spill into group 0's
            // metadata blocks.
            bail!(
                "{group_count} group descriptors do not fit the single {BLOCK_SIZE}-byte descriptor table block"
            );
        }
        let inode_count = INODES_PER_GROUP * group_count;
        if inode_count < LOST_FOUND_INO as usize {
            bail!("{inode_count} inodes is too few for the reserved range, root and lost+found");
        }

        Ok(Geometry {
            disk_size,
            block_count,
            group_count,
            inode_count,
            inode_table_blocks: INODES_PER_GROUP * INODE_SIZE / BLOCK_SIZE,
        })
    }

    /// First absolute block number of group `group`.
    pub fn group_first_block(&self, group: usize) -> usize {
        group * BLOCKS_PER_GROUP + FIRST_DATA_BLOCK
    }
}

/// Group index owning inode `ino` (1-based numbering).
pub fn inode_group(ino: u32) -> usize {
    (ino as usize - 1) / INODES_PER_GROUP
}

/// Bit offset of inode `ino` within its group's inode bitmap.
pub fn inode_offset(ino: u32) -> usize {
    (ino as usize - 1) % INODES_PER_GROUP
}
