//! The packed 128-bit b-map extent record, the extent b+tree walk for
//! large forks, and the lazy file-content reader layered on top.

use std::io;

use positioned_io::ReadAt;

use crate::corrupt;
use crate::raw;
use crate::read_be64;
use crate::Checksums;
use crate::FileSystem;
use crate::Result;

/// Unpacked extent record: `block_count` fs-blocks of file data,
/// logically at `start_off`, physically at `start_block`. A
/// `start_block` of zero marks a sparse hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmbtIrec {
    /* logical fs-block within the file */
    pub start_off: u64,
    /* physical fs-block, ag index in the high bits */
    pub start_block: u64,
    pub block_count: u64,
    /* the unwritten-extent flag bit; carried but not interpreted */
    pub state: u8,
}

impl BmbtIrec {
    pub const PACKED_SIZE: usize = 16;

    /// Unpack the on-disk 128-bit record:
    ///
    /// ```text
    /// flag        = l0 >> 63
    /// start_off   = (l0 >> 9) & (2^54 - 1)
    /// start_block = ((l0 & 0x1ff) << 43) | (l1 >> 21)
    /// block_count = l1 & (2^21 - 1)
    /// ```
    pub fn unpack(l0: u64, l1: u64) -> BmbtIrec {
        BmbtIrec {
            start_off: (l0 >> 9) & ((1 << 54) - 1),
            start_block: ((l0 & 0x1ff) << 43) | (l1 >> 21),
            block_count: l1 & ((1 << 21) - 1),
            state: (l0 >> 63) as u8,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.start_block == 0
    }
}

/// Decode `nextents` packed records sitting inline in a data fork.
pub fn decode_extent_list(fork: &[u8], nextents: u32) -> Result<Vec<BmbtIrec>> {
    let nextents = nextents as usize;
    // an EXTENTS fork that claims more records than it can hold must
    // really have been a btree fork
    if nextents
        .checked_mul(BmbtIrec::PACKED_SIZE)
        .map(|bytes| bytes > fork.len())
        .unwrap_or(true)
    {
        return Err(corrupt(
            "extent count",
            format!("at most {} inline records", fork.len() / BmbtIrec::PACKED_SIZE),
            nextents,
        ));
    }

    let mut extents = Vec::with_capacity(nextents);
    for i in 0..nextents {
        let rec = &fork[i * BmbtIrec::PACKED_SIZE..];
        extents.push(BmbtIrec::unpack(read_be64(rec), read_be64(&rec[8..])));
    }
    Ok(extents)
}

/// Beyond this the tree is corrupt, not merely deep.
const MAX_BTREE_LEVEL: u16 = 8;

/// Load the extent map of a `BTREE`-format fork: the root node lives
/// in the fork itself, everything below it in fs-blocks. Children are
/// visited left to right, so leaf records come back ordered by
/// `start_off`.
pub fn load_btree_extents<R: ReadAt>(
    fs: &FileSystem<R>,
    ino: u64,
    fork: &[u8],
) -> Result<Vec<BmbtIrec>> {
    let root = raw::RawBmdrHdr::from_slice(fork)?;
    if root.level == 0 || root.level > MAX_BTREE_LEVEL {
        return Err(corrupt(
            "bmbt root level",
            format!("1..={}", MAX_BTREE_LEVEL),
            format!("{} (inode {})", root.level, ino),
        ));
    }

    // the pointer array is placed for the largest record count the
    // fork could hold, not for the count actually present
    let maxrecs = (fork.len() - raw::RawBmdrHdr::SIZE) / 16;
    let numrecs = usize::from(root.numrecs);
    if numrecs == 0 || numrecs > maxrecs {
        return Err(corrupt(
            "bmbt root records",
            format!("1..={}", maxrecs),
            format!("{} (inode {})", numrecs, ino),
        ));
    }

    let ptrs_base = raw::RawBmdrHdr::SIZE + maxrecs * 8;
    let mut extents = Vec::new();
    for i in 0..numrecs {
        let child = read_be64(&fork[ptrs_base + i * 8..]);
        walk_btree_block(fs, ino, child, root.level - 1, &mut extents)?;
    }

    debug_assert!(
        extents.windows(2).all(|w| w[0].start_off < w[1].start_off),
        "bmbt leaves out of order for inode {}",
        ino
    );

    Ok(extents)
}

fn walk_btree_block<R: ReadAt>(
    fs: &FileSystem<R>,
    ino: u64,
    fs_block: u64,
    level: u16,
    extents: &mut Vec<BmbtIrec>,
) -> Result<()> {
    let block_size = fs.superblock().block_size as usize;
    let data = fs.read_fs_blocks(fs_block, 1)?;

    let hdr = raw::RawBtreeLongHdr::from_slice(&data)?;
    if hdr.magic != raw::XFS_BMAP_CRC_MAGIC {
        return Err(corrupt(
            "bmbt block magic",
            format!("{:#010x}", raw::XFS_BMAP_CRC_MAGIC),
            format!("{:#010x} (inode {})", hdr.magic, ino),
        ));
    }
    if hdr.level != level {
        return Err(corrupt(
            "bmbt block level",
            level,
            format!("{} (inode {})", hdr.level, ino),
        ));
    }
    if fs.options().checksums == Checksums::Enabled {
        crate::verify_crc(&data, raw::RawBtreeLongHdr::CRC_OFFSET, "bmbt block crc")?;
    }

    let numrecs = usize::from(hdr.numrecs);
    let payload = block_size - raw::RawBtreeLongHdr::SIZE;

    if level == 0 {
        if numrecs * BmbtIrec::PACKED_SIZE > payload {
            return Err(corrupt(
                "bmbt leaf records",
                format!("at most {}", payload / BmbtIrec::PACKED_SIZE),
                numrecs,
            ));
        }
        for i in 0..numrecs {
            let rec = &data[raw::RawBtreeLongHdr::SIZE + i * BmbtIrec::PACKED_SIZE..];
            extents.push(BmbtIrec::unpack(read_be64(rec), read_be64(&rec[8..])));
        }
        return Ok(());
    }

    let maxrecs = payload / 16;
    if numrecs == 0 || numrecs > maxrecs {
        return Err(corrupt(
            "bmbt node records",
            format!("1..={}", maxrecs),
            numrecs,
        ));
    }
    let ptrs_base = raw::RawBtreeLongHdr::SIZE + maxrecs * 8;
    for i in 0..numrecs {
        let child = read_be64(&data[ptrs_base + i * 8..]);
        walk_btree_block(fs, ino, child, level - 1, extents)?;
    }
    Ok(())
}

/// Lazy reader over a regular file's logical bytes `[0, size)`. Each
/// logical block is resolved through the extent map; holes read as
/// zeros, and the final block is cut at `size`.
pub struct TreeReader<'a, R: ReadAt> {
    fs: &'a FileSystem<R>,
    ino: u64,
    extents: Vec<BmbtIrec>,
    len: u64,
    pos: u64,
}

enum FoundBlock<'e> {
    Actual(&'e BmbtIrec),
    /// No mapping for this many blocks (hole, or everything after the
    /// last extent).
    Sparse(u64),
}

fn find_block(block: u64, extents: &[BmbtIrec]) -> FoundBlock<'_> {
    for extent in extents {
        if block < extent.start_off {
            // we've gone past it
            return FoundBlock::Sparse(extent.start_off - block);
        }

        if block < extent.start_off + extent.block_count {
            if extent.is_hole() {
                return FoundBlock::Sparse(extent.start_off + extent.block_count - block);
            }
            return FoundBlock::Actual(extent);
        }
    }

    FoundBlock::Sparse(u64::max_value())
}

impl<'a, R: ReadAt> TreeReader<'a, R> {
    pub(crate) fn new(
        fs: &'a FileSystem<R>,
        ino: u64,
        size: u64,
        extents: Vec<BmbtIrec>,
    ) -> Result<TreeReader<'a, R>> {
        let block_size = u64::from(fs.superblock().block_size);
        let blocks = size / block_size + u64::from(size % block_size != 0);
        let covered = extents
            .last()
            .map(|e| e.start_off + e.block_count)
            .unwrap_or(0);
        if covered < blocks && !fs.options().lenient {
            return Err(corrupt(
                "extent coverage",
                format!("{} blocks for inode {}", blocks, ino),
                covered,
            ));
        }

        Ok(TreeReader {
            fs,
            ino,
            extents,
            len: size,
            pos: 0,
        })
    }

    pub fn size(&self) -> u64 {
        self.len
    }

    pub fn extents(&self) -> &[BmbtIrec] {
        &self.extents
    }
}

impl<'a, R: ReadAt> io::Read for TreeReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }

        let block_size = u64::from(self.fs.superblock().block_size);
        let wanted_block = self.pos / block_size;
        let read_of_this_block = self.pos % block_size;

        match find_block(wanted_block, &self.extents) {
            FoundBlock::Actual(extent) => {
                let bytes_through_extent =
                    (wanted_block - extent.start_off) * block_size + read_of_this_block;
                let remaining_bytes_in_extent =
                    extent.block_count * block_size - bytes_through_extent;
                let to_read = remaining_bytes_in_extent
                    .min(buf.len() as u64)
                    .min(self.len - self.pos) as usize;

                let abs = self
                    .fs
                    .superblock()
                    .block_to_abs(extent.start_block + (wanted_block - extent.start_off))
                    .saturating_add(read_of_this_block);
                self.fs
                    .inner()
                    .fill_exact_at(abs, &mut buf[..to_read])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                self.pos += to_read as u64;
                Ok(to_read)
            }
            FoundBlock::Sparse(blocks) => {
                let sparse_bytes = blocks
                    .saturating_mul(block_size)
                    .saturating_sub(read_of_this_block);
                let to_zero = sparse_bytes
                    .min(buf.len() as u64)
                    .min(self.len - self.pos) as usize;
                for b in buf[..to_zero].iter_mut() {
                    *b = 0;
                }
                self.pos += to_zero as u64;
                Ok(to_zero)
            }
        }
    }
}

impl<'a, R: ReadAt> io::Seek for TreeReader<'a, R> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(set) => Some(set),
            io::SeekFrom::Current(diff) => {
                if diff >= 0 {
                    self.pos.checked_add(diff as u64)
                } else {
                    self.pos.checked_sub(diff.unsigned_abs())
                }
            }
            io::SeekFrom::End(diff) => {
                if diff >= 0 {
                    self.len.checked_add(diff as u64)
                } else {
                    self.len.checked_sub(diff.unsigned_abs())
                }
            }
        };

        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek before start of inode {}", self.ino),
            )),
        }
    }
}
