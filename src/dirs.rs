//! Directory decoding: shortform entries held inside the inode, and
//! block/leaf/node directories reached through the extent map. All
//! four layouts surface the same `(inode, name, type)` entries.

use log::debug;
use log::warn;
use positioned_io::ReadAt;

use crate::corrupt;
use crate::extents::BmbtIrec;
use crate::raw;
use crate::read_be16;
use crate::read_be64;
use crate::Checksums;
use crate::DirEntry;
use crate::Error;
use crate::FileSystem;
use crate::FileType;
use crate::Result;

/// Directory logical address space is partitioned into data, leaf
/// index, and free index segments, in bytes.
pub const XFS_DIR2_LEAF_OFFSET: u64 = 1 << 35;
pub const XFS_DIR2_FREE_OFFSET: u64 = 2 << 35;

/// High 16 bits of the entry-inode field marking a free region.
const XFS_DIR2_DATA_FREE_TAG: u16 = 0xffff;

/// A `LOCAL`-format directory: everything lives in the inode fork.
#[derive(Debug, Clone)]
pub struct ShortformDir {
    pub parent: u64,
    pub entries: Vec<DirEntry>,
}

/// Decode the shortform fork: a `(count, i8count, parent)` header and
/// `count` packed entries. When `i8count` is non-zero, the parent and
/// every entry inode are eight bytes wide instead of four.
pub(crate) fn parse_shortform(ino: u64, fork: &[u8]) -> Result<ShortformDir> {
    if fork.len() < 2 {
        return Err(corrupt("shortform header", "count and i8count", fork.len()));
    }

    let count = usize::from(fork[0]);
    let wide_inodes = fork[1] != 0;
    let ino_width = if wide_inodes { 8 } else { 4 };

    let mut off = 2;
    let parent = read_sf_ino(ino, fork, &mut off, wide_inodes)?;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if off + 3 > fork.len() {
            return Err(short_entry(ino, fork.len()));
        }
        let name_len = usize::from(fork[off]);
        if name_len == 0 {
            return Err(corrupt("shortform name length", "1..=255", format!("0 (inode {})", ino)));
        }
        // two bytes of directory-offset hint, unused here
        off += 3;

        if off + name_len + 1 + ino_width > fork.len() {
            return Err(short_entry(ino, fork.len()));
        }
        let name = &fork[off..off + name_len];
        off += name_len;
        let ftype = fork[off];
        off += 1;
        let inode = read_sf_ino(ino, fork, &mut off, wide_inodes)?;

        push_entry(ino, inode, name, ftype, &mut entries);
    }

    Ok(ShortformDir { parent, entries })
}

fn read_sf_ino(dir_ino: u64, fork: &[u8], off: &mut usize, wide: bool) -> Result<u64> {
    let width = if wide { 8 } else { 4 };
    if *off + width > fork.len() {
        return Err(short_entry(dir_ino, fork.len()));
    }
    let value = if wide {
        read_be64(&fork[*off..])
    } else {
        u64::from(crate::read_be32(&fork[*off..]))
    };
    *off += width;
    Ok(value)
}

fn short_entry(ino: u64, len: usize) -> Error {
    corrupt(
        "shortform entry",
        "an entry within the fork",
        format!("truncated at {} bytes (inode {})", len, ino),
    )
}

/// List a directory stored in extents (block, leaf, or node layout) or
/// reached through a b+tree's extent map. Only the data segment of the
/// directory address space holds entries; leaf and free segments are
/// skipped. An extent that fails with `Unsupported` is dropped from
/// the listing with a warning; `Corrupt` aborts.
pub(crate) fn extents_dir_entries<R: ReadAt>(
    fs: &FileSystem<R>,
    ino: u64,
    extents: &[BmbtIrec],
) -> Result<Vec<DirEntry>> {
    let sb = fs.superblock();
    let dir_block_fsblocks = 1u64 << sb.dir_block_log;
    let leaf_block = XFS_DIR2_LEAF_OFFSET >> sb.block_log;
    let free_block = XFS_DIR2_FREE_OFFSET >> sb.block_log;

    let mut entries = Vec::new();

    for extent in extents {
        if extent.start_off >= free_block {
            debug!("inode {}: skipping free-index extent at {}", ino, extent.start_off);
            continue;
        }
        if extent.start_off >= leaf_block {
            warn!("inode {}: skipping leaf-index extent at {}", ino, extent.start_off);
            continue;
        }
        if extent.is_hole() {
            warn!("inode {}: hole in directory data at {}", ino, extent.start_off);
            continue;
        }

        // each directory block inside the extent carries its own header
        let dir_blocks = extent.block_count / dir_block_fsblocks;
        if extent.block_count % dir_block_fsblocks != 0 {
            warn!(
                "inode {}: extent of {} blocks is not whole directory blocks",
                ino, extent.block_count
            );
        }

        for n in 0..dir_blocks {
            let block = fs.read_fs_blocks(
                extent.start_block.saturating_add(n * dir_block_fsblocks),
                dir_block_fsblocks,
            )?;
            match parse_data_block(&block, ino, fs.options().checksums, &mut entries) {
                Ok(()) => (),
                Err(Error::Unsupported(reason)) => {
                    warn!("inode {}: dropping directory block: {}", ino, reason);
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(entries)
}

/// Decode one directory data block. `XDB3` blocks carry a tail of leaf
/// entries which must not be parsed as data; `XDD3` blocks are data to
/// the end.
fn parse_data_block(
    block: &[u8],
    ino: u64,
    checksums: Checksums,
    entries: &mut Vec<DirEntry>,
) -> Result<()> {
    let hdr = raw::RawDir3DataHdr::from_slice(block)?;

    let payload_end = match hdr.magic {
        raw::XFS_DIR3_BLOCK_MAGIC => {
            let tail_start = block.len() - raw::RawDir2BlockTail::SIZE;
            let tail = raw::RawDir2BlockTail::from_slice(&block[tail_start..])?;
            let tail_bytes = tail.count as usize * raw::RawDir2BlockTail::LEAF_ENTRY_SIZE
                + raw::RawDir2BlockTail::SIZE;
            if tail_bytes + raw::RawDir3DataHdr::SIZE > block.len() {
                return Err(corrupt(
                    "dir block tail",
                    format!("at most {} leaf entries", (block.len() - raw::RawDir3DataHdr::SIZE - raw::RawDir2BlockTail::SIZE) / raw::RawDir2BlockTail::LEAF_ENTRY_SIZE),
                    format!("{} (inode {})", tail.count, ino),
                ));
            }
            block.len() - tail_bytes
        }
        raw::XFS_DIR3_DATA_MAGIC => block.len(),
        other => {
            return Err(Error::Unsupported(format!(
                "directory block magic {:#010x}",
                other
            )))
        }
    };

    if checksums == Checksums::Enabled {
        crate::verify_crc(block, raw::RawDir3DataHdr::CRC_OFFSET, "dir block crc")?;
    }

    parse_entries(block, payload_end, ino, entries)
}

/// Walk the packed entries in `[header end, payload_end)`. Every
/// record is 8-byte aligned from the start of the block; free regions
/// announce their own length.
fn parse_entries(
    block: &[u8],
    payload_end: usize,
    ino: u64,
    entries: &mut Vec<DirEntry>,
) -> Result<()> {
    let mut off = raw::RawDir3DataHdr::SIZE;

    while off + 8 <= payload_end {
        let inumber = read_be64(&block[off..]);

        if (inumber >> 48) as u16 == XFS_DIR2_DATA_FREE_TAG {
            // freetag, length, ..., tag: skip the whole region
            let length = usize::from(read_be16(&block[off + 2..]));
            if length < 8 || length % 8 != 0 || off + length > payload_end {
                return Err(corrupt(
                    "dir free region",
                    "a multiple of 8 bytes within the block",
                    format!("{} at offset {} (inode {})", length, off, ino),
                ));
            }
            off += length;
            continue;
        }

        if off + 10 > payload_end {
            break;
        }
        let name_len = usize::from(block[off + 8]);
        if name_len == 0 {
            return Err(corrupt(
                "dirent name length",
                "1..=255",
                format!("0 at offset {} (inode {})", off, ino),
            ));
        }

        // inumber + namelen + name + ftype + tag, rounded up to the
        // 8-byte record alignment; the tag sits in the final two bytes
        let ent_len = align8(8 + 1 + name_len + 1 + 2);
        if off + ent_len > payload_end {
            break;
        }

        let name = &block[off + 9..off + 9 + name_len];
        let ftype = block[off + 9 + name_len];

        if name != b"." && name != b".." {
            push_entry(ino, inumber, name, ftype, entries);
        }

        off += ent_len;
    }

    Ok(())
}

fn push_entry(dir_ino: u64, inode: u64, name: &[u8], ftype: u8, entries: &mut Vec<DirEntry>) {
    match FileType::from_dir_hint(ftype) {
        Some(file_type) => entries.push(DirEntry {
            inode,
            file_type,
            name: String::from_utf8_lossy(name).into_owned(),
        }),
        None => warn!(
            "inode {}: dropping entry {:?} with unknown file type {}",
            dir_ino,
            String::from_utf8_lossy(name),
            ftype
        ),
    }
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}
