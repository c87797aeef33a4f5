//! Block groups and the two allocation passes that fill them in.
//!
//! Pass one ([`build_groups`]) places each group's metadata: block bitmap,
//! inode bitmap and inode table, plus the superblock/GDT reservation that
//! only group 0 carries. Pass two ([`place_reserved_objects`]) marks the
//! reserved inode range and allocates the root and `lost+found` directories
//! along with one data block each.
//!
//! The passes are chained by signature — pass two takes the groups pass one
//! produced — so the ordering the free-count totals depend on cannot be
//! accidentally inverted.

use crate::bitmap::Bitmap;
use crate::layout::{
    inode_group, inode_offset, Geometry, BLOCKS_PER_GROUP, GDT_BLOCK, INODES_PER_GROUP,
    LAST_RESERVED_INO, LOST_FOUND_INO, ROOT_INO, SUPERBLOCK_BLOCK,
};
use anyhow::{bail, Context, Result};
use log::debug;

pub struct BlockGroup {
    pub id: usize,
    /// Absolute block numbers of this group's metadata.
    pub block_bitmap_block: usize,
    pub inode_bitmap_block: usize,
    pub inode_table_block: usize,
    pub free_blocks_count: usize,
    pub free_inodes_count: usize,
    pub used_dirs_count: usize,
    pub block_bitmap: Bitmap,
    pub inode_bitmap: Bitmap,
}

impl BlockGroup {
    fn new(id: usize) -> Self {
        BlockGroup {
            id,
            block_bitmap_block: 0,
            inode_bitmap_block: 0,
            inode_table_block: 0,
            free_blocks_count: BLOCKS_PER_GROUP,
            free_inodes_count: INODES_PER_GROUP,
            used_dirs_count: 0,
            block_bitmap: Bitmap::new(),
            inode_bitmap: Bitmap::new(),
        }
    }

    /// Mark the block at absolute address `block` used in this group.
    fn claim_block(&mut self, geo: &Geometry, block: usize) {
        let rel = block - geo.group_first_block(self.id);
        self.block_bitmap.set(rel);
        self.free_blocks_count -= 1;
    }

    /// Mark inode `ino` used in this group's inode bitmap.
    fn claim_inode(&mut self, ino: u32) {
        self.inode_bitmap.set(inode_offset(ino));
        self.free_inodes_count -= 1;
    }

    /// First-fit data block allocation: lowest clear bit in the block
    /// bitmap, scanning from the group's first block upward. Returns the
    /// absolute block address. The scan order is part of the format's
    /// determinism guarantee.
    fn alloc_data_block(&mut self, geo: &Geometry) -> Result<usize> {
        let rel = match self.block_bitmap.first_clear(BLOCKS_PER_GROUP) {
            Some(rel) => rel,
            None => bail!("no free block left in group {}", self.id),
        };
        self.block_bitmap.set(rel);
        self.free_blocks_count -= 1;
        Ok(geo.group_first_block(self.id) + rel)
    }
}

/// Lay out every group's metadata blocks and mark them in the block bitmaps.
pub fn build_groups(geo: &Geometry) -> Vec<BlockGroup> {
    let mut groups: Vec<BlockGroup> = (0..geo.group_count).map(BlockGroup::new).collect();

    for g in groups.iter_mut() {
        let start_block = geo.group_first_block(g.id);
        let mut next = if g.id == 0 {
            // Group 0 also hosts the superblock (block 1) and the
            // single-block descriptor table (block 2); no other group
            // carries copies.
            g.claim_block(geo, SUPERBLOCK_BLOCK);
            g.claim_block(geo, GDT_BLOCK);
            GDT_BLOCK + 1
        } else {
            start_block
        };

        g.block_bitmap_block = next;
        g.claim_block(geo, next);
        next += 1;

        g.inode_bitmap_block = next;
        g.claim_block(geo, next);
        next += 1;

        g.inode_table_block = next;
        for k in 0..geo.inode_table_blocks {
            g.claim_block(geo, next + k);
        }

        debug!(
            "group {}: block bitmap at {}, inode bitmap at {}, inode table at {}..{}",
            g.id,
            g.block_bitmap_block,
            g.inode_bitmap_block,
            g.inode_table_block,
            g.inode_table_block + geo.inode_table_blocks
        );
        debug_assert_eq!(
            g.block_bitmap.count_set(),
            BLOCKS_PER_GROUP - g.free_blocks_count
        );
    }

    groups
}

/// Data-block addresses of the two directories.
pub struct ReservedObjects {
    pub root_block: usize,
    pub lost_found_block: usize,
}

/// Mark the reserved inode range and allocate the root and `lost+found`
/// directories: inode bits, directory counters, and one first-fit data
/// block each in the owning group.
pub fn place_reserved_objects(
    geo: &Geometry,
    groups: &mut [BlockGroup],
) -> Result<ReservedObjects> {
    // Root directory, inode 2
    let root_group = &mut groups[inode_group(ROOT_INO)];
    root_group.claim_inode(ROOT_INO);
    root_group.used_dirs_count += 1;

    // Remaining reserved inodes 1..=10
    for ino in 1..=LAST_RESERVED_INO {
        if ino == ROOT_INO {
            continue;
        }
        groups[inode_group(ino)].claim_inode(ino);
    }

    let root_group = &mut groups[inode_group(ROOT_INO)];
    let root_block = root_group
        .alloc_data_block(geo)
        .context("allocating the root directory's data block")?;
    debug!("root directory data block at {root_block}");

    // lost+found, inode 11
    let lf_group = &mut groups[inode_group(LOST_FOUND_INO)];
    lf_group.claim_inode(LOST_FOUND_INO);
    lf_group.used_dirs_count += 1;
    let lost_found_block = lf_group
        .alloc_data_block(geo)
        .context("allocating the lost+found directory's data block")?;
    debug!("lost+found data block at {lost_found_block}");

    Ok(ReservedObjects {
        root_block,
        lost_found_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_geometry() -> Geometry {
        Geometry::for_disk_size(64 * 1024 * 1024).unwrap()
    }

    #[test]
    fn test_group0_metadata_placement() {
        let geo = default_geometry();
        let groups = build_groups(&geo);
        let g0 = &groups[0];
        // Superblock 1, GDT 2, then bitmaps and the 256-block inode table
        assert_eq!(g0.block_bitmap_block, 3);
        assert_eq!(g0.inode_bitmap_block, 4);
        assert_eq!(g0.inode_table_block, 5);
        assert!(g0.block_bitmap.is_set(0)); // superblock
        assert!(g0.block_bitmap.is_set(1)); // GDT
        assert!(g0.block_bitmap.is_set(259)); // last inode table block (abs 260)
        assert!(!g0.block_bitmap.is_set(260));
        assert_eq!(g0.free_blocks_count, 8192 - 2 - 2 - 256);
    }

    #[test]
    fn test_other_group_metadata_placement() {
        let geo = default_geometry();
        let groups = build_groups(&geo);
        let g1 = &groups[1];
        assert_eq!(g1.block_bitmap_block, 8193);
        assert_eq!(g1.inode_bitmap_block, 8194);
        assert_eq!(g1.inode_table_block, 8195);
        assert_eq!(g1.free_blocks_count, 8192 - 2 - 256);
        assert!(g1.block_bitmap.is_set(0));
        assert!(!g1.block_bitmap.is_set(258));
    }

    #[test]
    fn test_bitmap_consistency_after_metadata_pass() {
        let geo = default_geometry();
        for g in build_groups(&geo) {
            assert_eq!(
                g.block_bitmap.count_set(),
                BLOCKS_PER_GROUP - g.free_blocks_count
            );
            assert_eq!(g.inode_bitmap.count_set(), 0);
        }
    }

    #[test]
    fn test_reserved_objects_default_layout() {
        let geo = default_geometry();
        let mut groups = build_groups(&geo);
        let objs = place_reserved_objects(&geo, &mut groups).unwrap();

        // First free blocks after group 0's metadata (abs 1..=260 used)
        assert_eq!(objs.root_block, 261);
        assert_eq!(objs.lost_found_block, 262);

        let g0 = &groups[0];
        // Inodes 1..=11 marked, nothing else
        for bit in 0..11 {
            assert!(g0.inode_bitmap.is_set(bit));
        }
        assert!(!g0.inode_bitmap.is_set(11));
        assert_eq!(g0.inode_bitmap.count_set(), 11);
        assert_eq!(g0.free_inodes_count, INODES_PER_GROUP - 11);
        assert_eq!(g0.used_dirs_count, 2);
        assert_eq!(g0.free_blocks_count, 8192 - 260 - 2);

        // Other groups untouched by this pass
        let g1 = &groups[1];
        assert_eq!(g1.free_inodes_count, INODES_PER_GROUP);
        assert_eq!(g1.used_dirs_count, 0);
    }

    #[test]
    fn test_no_double_allocation() {
        let geo = default_geometry();
        let mut groups = build_groups(&geo);
        let objs = place_reserved_objects(&geo, &mut groups).unwrap();

        let g0 = &groups[0];
        let mut claimed = vec![1, 2, g0.block_bitmap_block, g0.inode_bitmap_block];
        claimed.extend(g0.inode_table_block..g0.inode_table_block + geo.inode_table_blocks);
        claimed.push(objs.root_block);
        claimed.push(objs.lost_found_block);

        let mut sorted = claimed.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), claimed.len());

        // Exactly the claimed addresses appear in the bitmap
        assert_eq!(g0.block_bitmap.count_set(), claimed.len());
        for block in claimed {
            assert!(g0.block_bitmap.is_set(block - geo.group_first_block(0)));
        }
    }

    #[test]
    fn test_allocation_exhaustion_is_an_error() {
        let geo = default_geometry();
        let mut g = BlockGroup::new(0);
        for i in 0..BLOCKS_PER_GROUP {
            g.block_bitmap.set(i);
        }
        g.free_blocks_count = 0;
        let err = g.alloc_data_block(&geo).unwrap_err();
        assert!(err.to_string().contains("group 0"));
    }
}
