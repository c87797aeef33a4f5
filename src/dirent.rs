//! Directory content blocks for the two directories in the freshly
//! formatted tree.
//!
//! Entries are packed back to back from offset 0; every entry except the
//! last takes the minimal 4-byte-aligned record length, and the last entry
//! stretches its `rec_len` to the block boundary so the records always sum
//! to exactly one block.

use crate::layout::{BLOCK_SIZE, EXT2_FT_DIR, LOST_FOUND_INO, ROOT_INO};

/// Root directory block: `.` and `..` point at the root itself,
/// `lost+found` at inode 11.
pub fn root_block() -> Vec<u8> {
    directory_block(&[
        (ROOT_INO, "."),
        (ROOT_INO, ".."),
        (LOST_FOUND_INO, "lost+found"),
    ])
}

/// `lost+found` directory block: only `.` and `..`.
pub fn lost_found_block() -> Vec<u8> {
    directory_block(&[(LOST_FOUND_INO, "."), (ROOT_INO, "..")])
}

fn directory_block(entries: &[(u32, &str)]) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut offset = 0;
    for (i, &(ino, name)) in entries.iter().enumerate() {
        let is_last = i == entries.len() - 1;
        offset += write_dirent(&mut block, offset, ino, name, is_last);
    }
    debug_assert_eq!(offset, BLOCK_SIZE);
    block
}

/// Write one directory entry. Returns the number of bytes consumed.
fn write_dirent(block: &mut [u8], offset: usize, ino: u32, name: &str, is_last: bool) -> usize {
    let name_bytes = name.as_bytes();
    let name_len = name_bytes.len();
    // rec_len is 4-byte aligned, minimum 8-byte header + name
    let rec_len = if is_last {
        BLOCK_SIZE - offset
    } else {
        (8 + name_len + 3) & !3
    };

    let ent = &mut block[offset..offset + rec_len];
    ent[0..4].copy_from_slice(&ino.to_le_bytes());
    ent[4..6].copy_from_slice(&(rec_len as u16).to_le_bytes());
    ent[6] = name_len as u8;
    ent[7] = EXT2_FT_DIR;
    ent[8..8 + name_len].copy_from_slice(name_bytes);

    rec_len
}
