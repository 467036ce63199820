//! Builds a complete two-allocation-group XFS v5 image in memory,
//! standing in for the loop-mounted fixture a mkfs script would
//! produce. Geometry is deliberately awkward: 60 blocks per ag with
//! agblklog 6, so any code path that treats an fs-block number as a
//! linear block index lands in the wrong allocation group.

use std::io;

use positioned_io::ReadAt;

pub const BLOCK_SIZE: usize = 4096;
pub const SECTOR_SIZE: usize = 512;
pub const INODE_SIZE: usize = 512;
pub const INODE_CORE_SIZE: usize = 176;
pub const AG_BLOCKS: u64 = 60;
pub const AG_COUNT: u64 = 2;
pub const AG_BLK_LOG: u32 = 6;
pub const INOP_BLOG: u32 = 3;
pub const ROOT_INO: u64 = 8;

/// First logical block of the leaf-index segment (1<<35 bytes / 4096).
pub const LEAF_BLOCK: u64 = (1 << 35) / BLOCK_SIZE as u64;
/// First logical block of the free-index segment.
pub const FREE_BLOCK: u64 = (2 << 35) / BLOCK_SIZE as u64;

const FMT_DEV: u8 = 0;
const FMT_LOCAL: u8 = 1;
const FMT_EXTENTS: u8 = 2;
const FMT_BTREE: u8 = 3;

const UUID: [u8; 16] = *b"xfs-test-fixture";
const MTIME: u32 = 1_600_000_000;

/// In-memory image with stateless positioned reads.
pub struct MemImage(pub Vec<u8>);

impl ReadAt for MemImage {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        if pos >= self.0.len() as u64 {
            return Ok(0);
        }
        let pos = pos as usize;
        let n = buf.len().min(self.0.len() - pos);
        buf[..n].copy_from_slice(&self.0[pos..pos + n]);
        Ok(n)
    }
}

/// Deterministic file content.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u64).wrapping_mul(31).wrapping_add(seed as u64) as u8)
        .collect()
}

#[derive(Clone, Copy)]
pub struct Segment<'a> {
    pub ag: u64,
    pub start_off: u64,
    pub content: &'a [u8],
}

pub struct ImageBuilder {
    pub buf: Vec<u8>,
    next_block: [u64; 2],
    inode_cursor: [Option<(u64, u64)>; 2],
}

impl ImageBuilder {
    pub fn new() -> ImageBuilder {
        let mut b = ImageBuilder {
            buf: vec![0u8; (AG_COUNT * AG_BLOCKS) as usize * BLOCK_SIZE],
            next_block: [1, 1],
            inode_cursor: [None, None],
        };
        for ag in 0..AG_COUNT {
            b.write_ag_headers(ag);
        }
        // the root inode is always the first allocation in ag 0
        assert_eq!(ROOT_INO, b.alloc_ino(0));
        b
    }

    pub fn finish(self) -> MemImage {
        MemImage(self.buf)
    }

    fn ag_base(ag: u64) -> usize {
        (ag * AG_BLOCKS) as usize * BLOCK_SIZE
    }

    /// Physical byte offset of an fs-block number.
    pub fn abs_of_fsb(fsb: u64) -> usize {
        let ag = fsb >> AG_BLK_LOG;
        let rel = fsb & ((1 << AG_BLK_LOG) - 1);
        (ag * AG_BLOCKS + rel) as usize * BLOCK_SIZE
    }

    /// Allocate `count` contiguous blocks; returns the fs-block number.
    pub fn alloc_blocks(&mut self, ag: u64, count: u64) -> u64 {
        let rel = self.next_block[ag as usize];
        self.next_block[ag as usize] += count;
        assert!(
            self.next_block[ag as usize] <= AG_BLOCKS,
            "fixture overflowed ag {}",
            ag
        );
        (ag << AG_BLK_LOG) | rel
    }

    /// Allocate an inode slot; inode blocks are taken from the same
    /// pool as data blocks.
    pub fn alloc_ino(&mut self, ag: u64) -> u64 {
        let (block, slot) = match self.inode_cursor[ag as usize] {
            Some((block, slot)) if slot < 8 => (block, slot),
            _ => {
                let fsb = self.alloc_blocks(ag, 1);
                (fsb & ((1 << AG_BLK_LOG) - 1), 0)
            }
        };
        self.inode_cursor[ag as usize] = Some((block, slot + 1));
        (ag << (AG_BLK_LOG + INOP_BLOG)) | (block << INOP_BLOG) | slot
    }

    pub fn write_block(&mut self, fsb: u64, data: &[u8]) {
        assert!(data.len() <= BLOCK_SIZE);
        let base = Self::abs_of_fsb(fsb);
        self.buf[base..base + data.len()].copy_from_slice(data);
    }

    fn put16(buf: &mut [u8], off: usize, v: u16) {
        buf[off..off + 2].copy_from_slice(&v.to_be_bytes());
    }

    fn put32(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn put64(buf: &mut [u8], off: usize, v: u64) {
        buf[off..off + 8].copy_from_slice(&v.to_be_bytes());
    }

    fn write_ag_headers(&mut self, ag: u64) {
        let base = Self::ag_base(ag);

        // superblock sector
        {
            let sb = &mut self.buf[base..base + SECTOR_SIZE];
            sb[0..4].copy_from_slice(b"XFSB");
            Self::put32(sb, 0x04, BLOCK_SIZE as u32);
            Self::put64(sb, 0x08, AG_COUNT * AG_BLOCKS);
            sb[0x20..0x30].copy_from_slice(&UUID);
            Self::put64(sb, 0x38, ROOT_INO);
            Self::put32(sb, 0x54, AG_BLOCKS as u32);
            Self::put32(sb, 0x58, AG_COUNT as u32);
            Self::put16(sb, 0x64, 0xb4a5); // version 5 plus feature bits
            Self::put16(sb, 0x66, SECTOR_SIZE as u16);
            Self::put16(sb, 0x68, INODE_SIZE as u16);
            Self::put16(sb, 0x6a, (BLOCK_SIZE / INODE_SIZE) as u16);
            sb[0x6c..0x73].copy_from_slice(b"fixture");
            sb[0x78] = 12; // blocklog
            sb[0x79] = 9; // sectlog
            sb[0x7a] = 9; // inodelog
            sb[0x7b] = INOP_BLOG as u8;
            sb[0x7c] = AG_BLK_LOG as u8; // rounded up: 60 blocks
            sb[0x7f] = 25; // imax_pct
            sb[0xc0] = 0; // dirblklog
        }

        // agf sector
        {
            let agf = &mut self.buf[base + SECTOR_SIZE..base + 2 * SECTOR_SIZE];
            agf[0..4].copy_from_slice(b"XAGF");
            Self::put32(agf, 0x04, 1);
            Self::put32(agf, 0x08, ag as u32);
            Self::put32(agf, 0x0c, AG_BLOCKS as u32);
            Self::put32(agf, 0x10, 1); // bno root
            Self::put32(agf, 0x14, 2); // cnt root
            Self::put32(agf, 0x1c, 1);
            Self::put32(agf, 0x20, 1);
            agf[0x40..0x50].copy_from_slice(&UUID);
        }

        // agi sector
        {
            let agi = &mut self.buf[base + 2 * SECTOR_SIZE..base + 3 * SECTOR_SIZE];
            agi[0..4].copy_from_slice(b"XAGI");
            Self::put32(agi, 0x04, 1);
            Self::put32(agi, 0x08, ag as u32);
            Self::put32(agi, 0x0c, AG_BLOCKS as u32);
            Self::put32(agi, 0x14, 3); // inobt root
            Self::put32(agi, 0x18, 1);
            for i in 0..64 {
                Self::put32(agi, 0x28 + 4 * i, 0xffff_ffff); // NULLAGINO
            }
            agi[0x128..0x138].copy_from_slice(&UUID);
        }

        // agfl sector
        {
            let agfl = &mut self.buf[base + 3 * SECTOR_SIZE..base + 4 * SECTOR_SIZE];
            agfl[0..4].copy_from_slice(b"XAFL");
            Self::put32(agfl, 0x04, ag as u32);
            agfl[0x08..0x18].copy_from_slice(&UUID);
            for i in 0..118 {
                Self::put32(agfl, 0x24 + 4 * i, 0xffff_ffff); // NULLAGBLOCK
            }
        }
    }

    /// Write an inode record. `fork` lands right after the v3 core;
    /// `forkoff` is in 8-byte units like the on-disk field.
    pub fn write_inode(
        &mut self,
        ino: u64,
        mode: u16,
        format: u8,
        size: u64,
        nextents: u32,
        nlink: u32,
        forkoff: u8,
        fork: &[u8],
    ) {
        assert!(fork.len() <= INODE_SIZE - INODE_CORE_SIZE);
        let ag = ino >> (AG_BLK_LOG + INOP_BLOG);
        let rel = ino & ((1 << (AG_BLK_LOG + INOP_BLOG)) - 1);
        let block = rel >> INOP_BLOG;
        let slot = rel & ((1 << INOP_BLOG) - 1);
        let base = Self::ag_base(ag) + block as usize * BLOCK_SIZE + slot as usize * INODE_SIZE;

        let rec = &mut self.buf[base..base + INODE_SIZE];
        for b in rec.iter_mut() {
            *b = 0;
        }
        rec[0..2].copy_from_slice(b"IN");
        Self::put16(rec, 0x02, mode);
        rec[0x04] = 3; // version
        rec[0x05] = format;
        Self::put32(rec, 0x10, nlink);
        Self::put32(rec, 0x20, MTIME); // atime
        Self::put32(rec, 0x28, MTIME); // mtime
        Self::put32(rec, 0x30, MTIME); // ctime
        Self::put64(rec, 0x38, size);
        Self::put32(rec, 0x4c, nextents);
        rec[0x52] = forkoff;
        rec[0x53] = FMT_EXTENTS; // aformat
        Self::put32(rec, 0x60, 0xffff_ffff); // next_unlinked
        Self::put32(rec, 0x90, MTIME); // crtime
        Self::put64(rec, 0x98, ino);
        rec[0xa0..0xb0].copy_from_slice(&UUID);
        rec[INODE_CORE_SIZE..INODE_CORE_SIZE + fork.len()].copy_from_slice(fork);
    }

    /// Pack one extent record the way the b-map stores it.
    pub fn pack_extent(start_off: u64, start_block: u64, count: u64) -> [u8; 16] {
        assert!(start_block < 1 << 43);
        let l0 = start_off << 9;
        let l1 = (start_block << 21) | count;
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&l0.to_be_bytes());
        out[8..].copy_from_slice(&l1.to_be_bytes());
        out
    }

    /// Regular file stored as a single extent in `ag`.
    pub fn add_file(&mut self, ag: u64, mode: u16, content: &[u8]) -> u64 {
        let seg = Segment {
            ag,
            start_off: 0,
            content,
        };
        self.add_file_multi(mode, content.len() as u64, &[seg])
    }

    /// Regular file from explicit segments; gaps between segments are
    /// sparse holes.
    pub fn add_file_multi(&mut self, mode: u16, size: u64, segs: &[Segment<'_>]) -> u64 {
        let ino = self.alloc_ino(0);
        let mut fork = Vec::new();
        for seg in segs {
            let blocks = ((seg.content.len() + BLOCK_SIZE - 1) / BLOCK_SIZE) as u64;
            let fsb = self.alloc_blocks(seg.ag, blocks);
            for (i, chunk) in seg.content.chunks(BLOCK_SIZE).enumerate() {
                self.write_block(fsb + i as u64, chunk);
            }
            fork.extend_from_slice(&Self::pack_extent(seg.start_off, fsb, blocks));
        }
        self.write_inode(ino, mode, FMT_EXTENTS, size, segs.len() as u32, 1, 0, &fork);
        ino
    }

    /// Regular file whose extent map lives in a one-level b+tree.
    pub fn add_btree_file(&mut self, ag: u64, mode: u16, content: &[u8]) -> u64 {
        let ino = self.alloc_ino(ag);
        // two deliberately non-adjacent extents
        let half = (content.len() / 2 + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE;
        let (a, b) = content.split_at(half.min(content.len()));
        let blocks_a = ((a.len() + BLOCK_SIZE - 1) / BLOCK_SIZE) as u64;
        let blocks_b = ((b.len() + BLOCK_SIZE - 1) / BLOCK_SIZE) as u64;

        let fsb_a = self.alloc_blocks(ag, blocks_a);
        let _gap = self.alloc_blocks(ag, 1);
        let fsb_b = if blocks_b > 0 { self.alloc_blocks(ag, blocks_b) } else { 0 };

        for (i, chunk) in a.chunks(BLOCK_SIZE).enumerate() {
            self.write_block(fsb_a + i as u64, chunk);
        }
        for (i, chunk) in b.chunks(BLOCK_SIZE).enumerate() {
            self.write_block(fsb_b + i as u64, chunk);
        }

        let mut recs = vec![(0u64, fsb_a, blocks_a)];
        if blocks_b > 0 {
            recs.push((blocks_a, fsb_b, blocks_b));
        }
        let leaf = self.write_bmbt_leaf(ag, ino, &recs);
        let fork = Self::bmdr_fork(&[(0, leaf)]);
        self.write_inode(
            ino,
            mode,
            FMT_BTREE,
            content.len() as u64,
            recs.len() as u32,
            1,
            0,
            &fork,
        );
        ino
    }

    fn write_bmbt_leaf(&mut self, ag: u64, owner: u64, recs: &[(u64, u64, u64)]) -> u64 {
        let fsb = self.alloc_blocks(ag, 1);
        let mut block = vec![0u8; BLOCK_SIZE];
        block[0..4].copy_from_slice(b"BMA3");
        Self::put16(&mut block, 0x04, 0); // level
        Self::put16(&mut block, 0x06, recs.len() as u16);
        Self::put64(&mut block, 0x08, u64::max_value()); // leftsib
        Self::put64(&mut block, 0x10, u64::max_value()); // rightsib
        Self::put64(&mut block, 0x18, (Self::abs_of_fsb(fsb) / SECTOR_SIZE) as u64);
        block[0x28..0x38].copy_from_slice(&UUID);
        Self::put64(&mut block, 0x38, owner);
        for (i, &(start_off, start_block, count)) in recs.iter().enumerate() {
            let rec = Self::pack_extent(start_off, start_block, count);
            block[72 + i * 16..72 + i * 16 + 16].copy_from_slice(&rec);
        }
        self.write_block(fsb, &block);
        fsb
    }

    /// Root node of an extent b+tree, sized for the full 336-byte data
    /// fork: keys up front, pointers starting at the half-way mark the
    /// record capacity dictates.
    fn bmdr_fork(children: &[(u64, u64)]) -> Vec<u8> {
        let fork_len = INODE_SIZE - INODE_CORE_SIZE;
        let maxrecs = (fork_len - 4) / 16;
        let mut fork = vec![0u8; fork_len];
        Self::put16(&mut fork, 0, 1); // level
        Self::put16(&mut fork, 2, children.len() as u16);
        for (i, &(key, ptr)) in children.iter().enumerate() {
            Self::put64(&mut fork, 4 + i * 8, key);
            Self::put64(&mut fork, 4 + maxrecs * 8 + i * 8, ptr);
        }
        fork
    }

    fn sf_fork(parent: u64, entries: &[(&str, u64, u8)]) -> Vec<u8> {
        let mut fork = vec![entries.len() as u8, 0];
        fork.extend_from_slice(&(parent as u32).to_be_bytes());
        for &(name, ino, ftype) in entries {
            assert!(ino < 1 << 32, "fixture shortform entries are narrow");
            fork.push(name.len() as u8);
            fork.extend_from_slice(&[0, 0]); // offset hint
            fork.extend_from_slice(name.as_bytes());
            fork.push(ftype);
            fork.extend_from_slice(&(ino as u32).to_be_bytes());
        }
        fork
    }

    /// Shortform directory held entirely in the inode.
    pub fn add_sf_dir(&mut self, ag: u64, parent: u64, entries: &[(&str, u64, u8)]) -> u64 {
        let ino = self.alloc_ino(ag);
        self.write_sf_dir_at(ino, parent, entries);
        ino
    }

    pub fn write_sf_dir_at(&mut self, ino: u64, parent: u64, entries: &[(&str, u64, u8)]) {
        let fork = Self::sf_fork(parent, entries);
        let subdirs = entries.iter().filter(|e| e.2 == 2).count() as u32;
        self.write_inode(
            ino,
            0o040755,
            FMT_LOCAL,
            fork.len() as u64,
            0,
            2 + subdirs,
            0,
            &fork,
        );
    }

    fn data_entry(ino: u64, name: &[u8], ftype: u8, tag: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ino.to_be_bytes());
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.push(ftype);
        while (out.len() + 2) % 8 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&tag.to_be_bytes());
        out
    }

    fn free_region(length: usize, tag: u16) -> Vec<u8> {
        assert!(length >= 8 && length % 8 == 0 && length < 1 << 16);
        let mut out = vec![0u8; length];
        out[0..2].copy_from_slice(&0xffffu16.to_be_bytes());
        out[2..4].copy_from_slice(&(length as u16).to_be_bytes());
        out[length - 2..].copy_from_slice(&tag.to_be_bytes());
        out
    }

    fn data_block_header(magic: &[u8; 4], owner: u64, blkno: u64) -> Vec<u8> {
        let mut hdr = vec![0u8; 64];
        hdr[0..4].copy_from_slice(magic);
        Self::put64(&mut hdr, 0x08, blkno);
        hdr[0x18..0x28].copy_from_slice(&UUID);
        Self::put64(&mut hdr, 0x28, owner);
        hdr
    }

    /// Single-block directory: one XDB3 block with the tail of leaf
    /// entries at its end.
    pub fn add_block_dir(&mut self, ag: u64, parent: u64, entries: &[(&str, u64, u8)]) -> u64 {
        let ino = self.alloc_ino(ag);
        let fsb = self.alloc_blocks(ag, 1);

        let total = entries.len() + 2; // plus "." and ".."
        let tail_bytes = total * 8 + 8;
        let payload_end = BLOCK_SIZE - tail_bytes;

        let mut block = Self::data_block_header(b"XDB3", ino, (Self::abs_of_fsb(fsb) / SECTOR_SIZE) as u64);
        block.extend_from_slice(&Self::data_entry(ino, b".", 2, block.len() as u16));
        block.extend_from_slice(&Self::data_entry(parent, b"..", 2, block.len() as u16));
        for &(name, child, ftype) in entries {
            let tag = block.len() as u16;
            block.extend_from_slice(&Self::data_entry(child, name.as_bytes(), ftype, tag));
        }
        assert!(block.len() <= payload_end, "block directory overflow");
        if block.len() < payload_end {
            let tag = block.len() as u16;
            let gap = payload_end - block.len();
            block.extend_from_slice(&Self::free_region(gap, tag));
        }
        // leaf entries stay zero; only the count matters to a reader
        block.resize(BLOCK_SIZE, 0);
        Self::put32(&mut block, BLOCK_SIZE - 8, total as u32);

        self.write_block(fsb, &block);

        let fork = Self::pack_extent(0, fsb, 1);
        let subdirs = entries.iter().filter(|e| e.2 == 2).count() as u32;
        self.write_inode(ino, 0o040755, FMT_EXTENTS, BLOCK_SIZE as u64, 1, 2 + subdirs, 0, &fork);
        ino
    }

    /// Multi-block directory (leaf or node shape): XDD3 data blocks
    /// plus placeholder leaf and free index extents that a reader must
    /// skip. With `btree`, the extent map goes through a two-leaf
    /// b+tree instead of the inline list.
    pub fn add_data_dir(
        &mut self,
        ag: u64,
        parent: u64,
        entries: &[(String, u64, u8)],
        btree: bool,
    ) -> u64 {
        let ino = self.alloc_ino(ag);

        // pack greedily into 4096-byte blocks, each with its own header
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let mut current = Self::data_block_header(b"XDD3", ino, 0);
        current.extend_from_slice(&Self::data_entry(ino, b".", 2, current.len() as u16));
        current.extend_from_slice(&Self::data_entry(parent, b"..", 2, current.len() as u16));
        for (name, child, ftype) in entries {
            let entry_len = Self::data_entry(*child, name.as_bytes(), *ftype, 0).len();
            if current.len() + entry_len > BLOCK_SIZE {
                blocks.push(current);
                current = Self::data_block_header(b"XDD3", ino, 0);
            }
            let tag = current.len() as u16;
            current.extend_from_slice(&Self::data_entry(*child, name.as_bytes(), *ftype, tag));
        }
        blocks.push(current);

        let data_blocks = blocks.len() as u64;
        let data_fsb = self.alloc_blocks(ag, data_blocks);
        for (i, mut block) in blocks.into_iter().enumerate() {
            if block.len() < BLOCK_SIZE {
                let tag = block.len() as u16;
                let gap = BLOCK_SIZE - block.len();
                block.extend_from_slice(&Self::free_region(gap, tag));
            }
            let fsb = data_fsb + i as u64;
            Self::put64(&mut block, 0x08, (Self::abs_of_fsb(fsb) / SECTOR_SIZE) as u64);
            self.write_block(fsb, &block);
        }

        // index segments: on-disk blocks exist but a reader never
        // parses them, so zeroes prove they were skipped
        let leaf_fsb = self.alloc_blocks(ag, 1);
        let free_fsb = self.alloc_blocks(ag, 1);

        let recs = [
            (0u64, data_fsb, data_blocks),
            (LEAF_BLOCK, leaf_fsb, 1),
            (FREE_BLOCK, free_fsb, 1),
        ];

        let subdirs = entries.iter().filter(|e| e.2 == 2).count() as u32;
        let size = data_blocks * BLOCK_SIZE as u64;
        if btree {
            let first = self.write_bmbt_leaf(ag, ino, &recs[..1]);
            let second = self.write_bmbt_leaf(ag, ino, &recs[1..]);
            let fork = Self::bmdr_fork(&[(0, first), (LEAF_BLOCK, second)]);
            self.write_inode(ino, 0o040755, FMT_BTREE, size, 3, 2 + subdirs, 0, &fork);
        } else {
            let mut fork = Vec::new();
            for &(start_off, fsb, count) in &recs {
                fork.extend_from_slice(&Self::pack_extent(start_off, fsb, count));
            }
            self.write_inode(ino, 0o040755, FMT_EXTENTS, size, 3, 2 + subdirs, 0, &fork);
        }
        ino
    }

    pub fn add_symlink(&mut self, ag: u64, target: &str) -> u64 {
        let ino = self.alloc_ino(ag);
        self.write_inode(
            ino,
            0o120777,
            FMT_LOCAL,
            target.len() as u64,
            0,
            1,
            0,
            target.as_bytes(),
        );
        ino
    }

    pub fn add_char_dev(&mut self, ag: u64) -> u64 {
        let ino = self.alloc_ino(ag);
        self.write_inode(ino, 0o020644, FMT_DEV, 0, 0, 1, 0, &[]);
        ino
    }
}

/// The standard fixture used by the golden tests: one directory and
/// file of every supported shape, including the ones that need a
/// second allocation group or a b+tree extent map.
pub fn build_test_image() -> MemImage {
    let mut b = ImageBuilder::new();

    // etc/os-release
    let os_release_ino = b.add_file(0, 0o100644, OS_RELEASE.as_bytes());
    let etc = b.add_sf_dir(0, ROOT_INO, &[("os-release", os_release_ino, 1)]);

    // flat files of the classic sizes; the 16k one straddles both ags
    let f1024 = b.add_file(0, 0o100644, &pattern(1, 1024));
    let f4096 = b.add_file(0, 0o100644, &pattern(2, 4096));
    let content16k = pattern(3, 16384);
    let f16384 = {
        let (first, second) = content16k.split_at(8192);
        b.add_file_multi(
            0o100644,
            16384,
            &[
                Segment { ag: 0, start_off: 0, content: first },
                Segment { ag: 1, start_off: 2, content: second },
            ],
        )
    };

    // eight subdirectories listed from one XDB3 block
    let mut block_children = Vec::new();
    for i in 1..=8u32 {
        let child = b.add_sf_dir(0, 0, &[]);
        block_children.push((i.to_string(), child, 2u8));
    }
    // parents fixed up after the directory exists
    let refs: Vec<(&str, u64, u8)> = block_children
        .iter()
        .map(|(n, i, t)| (n.as_str(), *i, *t))
        .collect();
    let block_dir = b.add_block_dir(0, ROOT_INO, &refs);
    for (_, child, _) in &block_children {
        b.write_sf_dir_at(*child, block_dir, &[]);
    }

    // 200 entries over two XDD3 blocks plus skipped index extents
    let targets = [f1024, f4096, f16384, os_release_ino];
    let leaf_entries: Vec<(String, u64, u8)> = (1..=200)
        .map(|i| (format!("leaf_file_{:03}", i), targets[i % 4], 1u8))
        .collect();
    let leaf_dir = b.add_data_dir(0, ROOT_INO, &leaf_entries, false);

    // 1024 entries, the node-directory shape
    let node_entries: Vec<(String, u64, u8)> = (1..=1024)
        .map(|i| (format!("node_file_{:04}", i), targets[i % 4], 1u8))
        .collect();
    let node_dir = b.add_data_dir(0, ROOT_INO, &node_entries, false);

    // same listing semantics, extent map behind a b+tree
    let btree_entries: Vec<(String, u64, u8)> = (1..=300)
        .map(|i| (format!("btree_file_{:03}", i), targets[i % 4], 1u8))
        .collect();
    let btree_dir = b.add_data_dir(0, ROOT_INO, &btree_entries, true);

    let btree_file = b.add_btree_file(0, 0o100644, &pattern(4, 8192));

    // hole in the middle: blocks 0 and 2 mapped, block 1 missing
    let sparse = {
        let front = pattern(5, 4096);
        let back = pattern(6, 4096);
        b.add_file_multi(
            0o100644,
            12288,
            &[
                Segment { ag: 0, start_off: 0, content: &front },
                Segment { ag: 0, start_off: 2, content: &back },
            ],
        )
    };

    // extent map stops a block short of size: corrupt unless lenient
    let short_file = b.add_file_multi(
        0o100644,
        8192,
        &[Segment { ag: 0, start_off: 0, content: &pattern(7, 4096) }],
    );

    let link = b.add_symlink(0, "etc/os-release");
    let dev = b.add_char_dev(0);

    // local directory holding a single shortform child
    let short_form = b.add_sf_dir(0, 0, &[]);
    let local_dir = b.add_sf_dir(0, ROOT_INO, &[("short_form", short_form, 2)]);
    b.write_sf_dir_at(short_form, local_dir, &[]);

    // nested chain with two executables at different depths
    let exec_content = b"#!/bin/sh\nexit 0\n";
    let exec5 = b.add_file(0, 0o100755, exec_content);
    let exec6 = b.add_file(0, 0o100755, exec_content);
    let child5 = b.add_sf_dir(0, 0, &[("executable", exec6, 1)]);
    let child4 = b.add_sf_dir(0, 0, &[("child", child5, 2), ("executable", exec5, 1)]);
    let child3 = b.add_sf_dir(0, 0, &[("child", child4, 2)]);
    let child2 = b.add_sf_dir(0, 0, &[("child", child3, 2)]);
    let child1 = b.add_sf_dir(0, 0, &[("child", child2, 2)]);
    let parent = b.add_sf_dir(0, ROOT_INO, &[("child", child1, 2)]);
    b.write_sf_dir_at(child1, parent, &[("child", child2, 2)]);
    b.write_sf_dir_at(child2, child1, &[("child", child3, 2)]);
    b.write_sf_dir_at(child3, child2, &[("child", child4, 2)]);
    b.write_sf_dir_at(child4, child3, &[("child", child5, 2), ("executable", exec5, 1)]);
    b.write_sf_dir_at(child5, child4, &[("executable", exec6, 1)]);

    // a directory and file that live entirely in the second ag
    let far_content = pattern(8, 4096);
    let far_file = {
        let ino = b.alloc_ino(1);
        let fsb = b.alloc_blocks(1, 1);
        b.write_block(fsb, &far_content);
        let fork = ImageBuilder::pack_extent(0, fsb, 1);
        b.write_inode(ino, 0o100644, FMT_EXTENTS, 4096, 1, 1, 0, &fork);
        ino
    };
    let second_ag = b.add_sf_dir(1, ROOT_INO, &[("far", far_file, 1)]);

    // attribute-fork recognition: fork shrinks, contents ignored
    let with_attr = {
        let content = pattern(9, 2048);
        let ino = b.alloc_ino(0);
        let fsb = b.alloc_blocks(0, 1);
        b.write_block(fsb, &content);
        let fork = ImageBuilder::pack_extent(0, fsb, 1);
        b.write_inode(ino, 0o100644, FMT_EXTENTS, 2048, 1, 1, 20, &fork);
        ino
    };

    let root_entries: Vec<(String, u64, u8)> = vec![
        ("etc".to_string(), etc, 2),
        ("fmt_extents_file_1024".to_string(), f1024, 1),
        ("fmt_extents_file_4096".to_string(), f4096, 1),
        ("fmt_extents_file_16384".to_string(), f16384, 1),
        ("fmt_extents_block_directories".to_string(), block_dir, 2),
        ("fmt_leaf_directories".to_string(), leaf_dir, 2),
        ("fmt_local_directory".to_string(), local_dir, 2),
        ("fmt_node_directories".to_string(), node_dir, 2),
        ("fmt_btree_directory".to_string(), btree_dir, 2),
        ("fmt_btree_file".to_string(), btree_file, 1),
        ("fmt_sparse_file".to_string(), sparse, 1),
        ("fmt_short_file".to_string(), short_file, 1),
        ("link_to_os_release".to_string(), link, 7),
        ("dev_console".to_string(), dev, 3),
        ("parent".to_string(), parent, 2),
        ("second_ag".to_string(), second_ag, 2),
        ("with_attr_fork".to_string(), with_attr, 1),
    ];
    let refs: Vec<(&str, u64, u8)> = root_entries
        .iter()
        .map(|(n, i, t)| (n.as_str(), *i, *t))
        .collect();
    build_root(&mut b, &refs);

    b.finish()
}

/// Root is a single-block directory at the reserved inode number.
fn build_root(b: &mut ImageBuilder, entries: &[(&str, u64, u8)]) {
    let fsb = b.alloc_blocks(0, 1);

    let total = entries.len() + 2;
    let tail_bytes = total * 8 + 8;
    let payload_end = BLOCK_SIZE - tail_bytes;

    let mut block = ImageBuilder::data_block_header(
        b"XDB3",
        ROOT_INO,
        (ImageBuilder::abs_of_fsb(fsb) / SECTOR_SIZE) as u64,
    );
    block.extend_from_slice(&ImageBuilder::data_entry(ROOT_INO, b".", 2, block.len() as u16));
    block.extend_from_slice(&ImageBuilder::data_entry(ROOT_INO, b"..", 2, block.len() as u16));
    for &(name, child, ftype) in entries {
        let tag = block.len() as u16;
        block.extend_from_slice(&ImageBuilder::data_entry(child, name.as_bytes(), ftype, tag));
    }
    assert!(block.len() <= payload_end, "root directory overflow");
    if block.len() < payload_end {
        let tag = block.len() as u16;
        let gap = payload_end - block.len();
        block.extend_from_slice(&ImageBuilder::free_region(gap, tag));
    }
    block.resize(BLOCK_SIZE, 0);
    ImageBuilder::put32(&mut block, BLOCK_SIZE - 8, total as u32);
    b.write_block(fsb, &block);

    let fork = ImageBuilder::pack_extent(0, fsb, 1);
    let subdirs = entries.iter().filter(|e| e.2 == 2).count() as u32;
    b.write_inode(
        ROOT_INO,
        0o040755,
        FMT_EXTENTS,
        BLOCK_SIZE as u64,
        1,
        2 + subdirs,
        0,
        &fork,
    );
}

pub const OS_RELEASE: &str = "NAME=\"Fixture Linux\"\nID=fixture\nVERSION_ID=\"9.1\"\nPRETTY_NAME=\"Fixture Linux 9.1\"\n";
