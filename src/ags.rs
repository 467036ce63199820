//! Superblock and allocation-group headers, plus the inode-number and
//! fs-block address arithmetic derived from the superblock geometry.

use log::warn;
use positioned_io::ReadAt;

use crate::corrupt;
use crate::inner_reader::InnerReader;
use crate::raw;
use crate::Checksums;
use crate::Error;
use crate::Result;

/// Geometry and identity taken from the primary superblock. All
/// shifts below use the on-disk log fields, never assumed constants.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub block_size: u32,
    pub block_log: u8,
    pub sector_size: u32,
    pub sector_log: u8,
    pub inode_size: u32,
    pub inode_log: u8,
    pub inodes_per_block: u32,
    pub inodes_per_block_log: u8,
    pub ag_blocks: u32,
    pub ag_block_log: u8,
    pub ag_count: u32,
    pub dir_block_log: u8,
    pub data_blocks: u64,
    pub log_start: u64,
    pub root_ino: u64,
    pub uuid: [u8; 16],
    pub version: u16,
    pub features_incompat: u32,
}

impl Superblock {
    /// Decode and sanity-check the primary superblock from the leading
    /// bytes of the image.
    pub fn from_sector(data: &[u8]) -> Result<Superblock> {
        let raw = raw::RawSuperblock::from_slice(data)?;

        if raw.sb_magicnum != raw::XFS_SB_MAGIC {
            return Err(corrupt(
                "superblock magic",
                format!("{:#010x}", raw::XFS_SB_MAGIC),
                format!("{:#010x}", raw.sb_magicnum),
            ));
        }

        if raw.sb_versionnum & 0x000f != 5 {
            return Err(Error::Unsupported(format!(
                "superblock version {} (only version 5 images are readable)",
                raw.sb_versionnum & 0x000f
            )));
        }

        let sb = Superblock {
            block_size: raw.sb_blocksize,
            block_log: raw.sb_blocklog,
            sector_size: u32::from(raw.sb_sectsize),
            sector_log: raw.sb_sectlog,
            inode_size: u32::from(raw.sb_inodesize),
            inode_log: raw.sb_inodelog,
            inodes_per_block: u32::from(raw.sb_inopblock),
            inodes_per_block_log: raw.sb_inopblog,
            ag_blocks: raw.sb_agblocks,
            ag_block_log: raw.sb_agblklog,
            ag_count: raw.sb_agcount,
            dir_block_log: raw.sb_dirblklog,
            data_blocks: raw.sb_dblocks,
            log_start: raw.sb_logstart,
            root_ino: raw.sb_rootino,
            uuid: raw.sb_uuid,
            version: raw.sb_versionnum,
            features_incompat: raw.sb_features_incompat,
        };

        sb.check_geometry()?;
        Ok(sb)
    }

    /// The log fields must agree with the sizes they describe and stay
    /// within the format's limits, or all of the shift arithmetic
    /// below is meaningless.
    fn check_geometry(&self) -> Result<()> {
        fn log_matches(value: u32, log: u8) -> bool {
            log < 32 && value != 0 && value == 1u32 << log
        }

        // on-disk limits: blocks 512..=64k, sectors 512..=32k, inodes
        // 256..=2048, directory blocks at most 64k
        if self.block_log < 9 || self.block_log > 16 {
            return Err(corrupt("superblock blocklog", "9..=16", self.block_log));
        }
        if self.sector_log < 9 || self.sector_log > 15 {
            return Err(corrupt("superblock sectlog", "9..=15", self.sector_log));
        }
        if self.inode_log < 8 || self.inode_log > 11 {
            return Err(corrupt("superblock inodelog", "8..=11", self.inode_log));
        }
        if u32::from(self.block_log) + u32::from(self.dir_block_log) > 16 {
            return Err(corrupt(
                "superblock dirblklog",
                "directory blocks of at most 64KiB",
                format!("2^{}", u32::from(self.block_log) + u32::from(self.dir_block_log)),
            ));
        }
        if self.sector_size > self.block_size {
            return Err(corrupt(
                "superblock sectsize",
                format!("at most the {}-byte block", self.block_size),
                self.sector_size,
            ));
        }

        if !log_matches(self.block_size, self.block_log) {
            return Err(corrupt(
                "superblock blocklog",
                self.block_size,
                format!("2^{}", self.block_log),
            ));
        }
        if !log_matches(self.sector_size, self.sector_log) {
            return Err(corrupt(
                "superblock sectlog",
                self.sector_size,
                format!("2^{}", self.sector_log),
            ));
        }
        if !log_matches(self.inode_size, self.inode_log) {
            return Err(corrupt(
                "superblock inodelog",
                self.inode_size,
                format!("2^{}", self.inode_log),
            ));
        }
        if !log_matches(self.inodes_per_block, self.inodes_per_block_log) {
            return Err(corrupt(
                "superblock inopblog",
                self.inodes_per_block,
                format!("2^{}", self.inodes_per_block_log),
            ));
        }
        // agblklog is the rounded-up log; agblocks itself need not be a
        // power of two
        if self.ag_blocks == 0
            || self.ag_block_log >= 32
            || u64::from(self.ag_blocks) > (1u64 << self.ag_block_log)
        {
            return Err(corrupt(
                "superblock agblklog",
                format!("covers {} ag blocks", self.ag_blocks),
                format!("2^{}", self.ag_block_log),
            ));
        }
        if self.ag_count == 0 {
            return Err(corrupt("superblock agcount", "at least one ag", 0));
        }
        if u64::from(self.inodes_per_block) * u64::from(self.inode_size)
            != u64::from(self.block_size)
        {
            return Err(corrupt(
                "superblock inopblock",
                self.block_size / self.inode_size.max(1),
                self.inodes_per_block,
            ));
        }
        if self.inode_size < raw::RawInode::SIZE as u32 {
            return Err(corrupt("superblock inodesize", "at least the v3 core", self.inode_size));
        }
        if self.root_ino == 0 || self.ag_index(self.root_ino) >= u64::from(self.ag_count) {
            return Err(corrupt("superblock rootino", "an inode inside the image", self.root_ino));
        }
        Ok(())
    }

    /// Which allocation group an inode number belongs to.
    pub fn ag_index(&self, ino: u64) -> u64 {
        ino >> (self.ag_block_log + self.inodes_per_block_log)
    }

    /// Slot of an inode within its block.
    pub fn inode_within_block(&self, ino: u64) -> u64 {
        ino & ((1 << self.inodes_per_block_log) - 1)
    }

    /// Absolute byte offset of an inode record.
    pub fn inode_abs_offset(&self, ino: u64) -> u64 {
        let rel_shift = self.ag_block_log + self.inodes_per_block_log;
        let rel_ino = ino & ((1 << rel_shift) - 1);
        let inode_block = rel_ino >> self.inodes_per_block_log;
        let inode_slot = rel_ino & ((1 << self.inodes_per_block_log) - 1);
        self.ag_byte_offset(self.ag_index(ino))
            .saturating_add(inode_block * u64::from(self.block_size))
            .saturating_add(inode_slot * u64::from(self.inode_size))
    }

    /// Absolute byte offset of an fs-block number. The ag index lives
    /// in the high bits of the block number; the block is not a plain
    /// linear index, so this must never be a single shift. Saturates
    /// on nonsense input; the read it feeds then fails typed.
    pub fn block_to_abs(&self, fs_block: u64) -> u64 {
        let ag = fs_block >> self.ag_block_log;
        let rel = fs_block & ((1 << self.ag_block_log) - 1);
        ag.saturating_mul(u64::from(self.ag_blocks))
            .saturating_add(rel)
            .saturating_mul(u64::from(self.block_size))
    }

    /// Absolute byte offset of the start of an allocation group.
    pub fn ag_byte_offset(&self, ag_index: u64) -> u64 {
        ag_index
            .saturating_mul(u64::from(self.ag_blocks))
            .saturating_mul(u64::from(self.block_size))
    }

    /// Bytes in one directory block (may span several fs-blocks).
    pub fn dir_block_size(&self) -> u64 {
        u64::from(self.block_size) << self.dir_block_log
    }
}

/// One allocation group's headers. Btree roots are retained but the
/// trees behind them are not walked.
pub struct Ag {
    pub index: u32,
    pub superblock: raw::RawSuperblock,
    pub agf: raw::RawAgf,
    pub agi: raw::RawAgi,
    pub agfl: raw::RawAgfl,
}

/// Parse the four header sectors of allocation group `index`,
/// validating each magic. The free-list area and the pad blocks that
/// follow are not read.
pub fn parse_ag<R: ReadAt>(
    inner: &InnerReader<R>,
    sb: &Superblock,
    index: u32,
    checksums: Checksums,
) -> Result<Ag> {
    let base = sb.ag_byte_offset(u64::from(index));
    let sector = sb.sector_size as usize;

    let sector_at = |n: u64| -> Result<Vec<u8>> {
        inner.read_exact_at(base.saturating_add(n * u64::from(sb.sector_size)), sector)
    };

    let sb_sector = sector_at(0)?;
    let copy = raw::RawSuperblock::from_slice(&sb_sector)?;
    if copy.sb_magicnum != raw::XFS_SB_MAGIC {
        return Err(corrupt(
            "secondary superblock magic",
            format!("{:#010x}", raw::XFS_SB_MAGIC),
            format!("{:#010x} (ag {})", copy.sb_magicnum, index),
        ));
    }
    if checksums == Checksums::Enabled {
        crate::verify_crc(&sb_sector, raw::RawSuperblock::CRC_OFFSET, "superblock crc")?;
    }
    if copy.sb_uuid != sb.uuid {
        warn!("ag {}: secondary superblock uuid differs from the primary", index);
    }

    let agf_sector = sector_at(1)?;
    let agf = raw::RawAgf::from_slice(&agf_sector)?;
    if agf.agf_magicnum != raw::XFS_AGF_MAGIC {
        return Err(corrupt(
            "agf magic",
            format!("{:#010x}", raw::XFS_AGF_MAGIC),
            format!("{:#010x} (ag {})", agf.agf_magicnum, index),
        ));
    }
    if checksums == Checksums::Enabled {
        crate::verify_crc(&agf_sector, raw::RawAgf::CRC_OFFSET, "agf crc")?;
    }
    if agf.agf_seqno != index {
        warn!("ag {}: agf carries sequence number {}", index, agf.agf_seqno);
    }

    let agi_sector = sector_at(2)?;
    let agi = raw::RawAgi::from_slice(&agi_sector)?;
    if agi.agi_magicnum != raw::XFS_AGI_MAGIC {
        return Err(corrupt(
            "agi magic",
            format!("{:#010x}", raw::XFS_AGI_MAGIC),
            format!("{:#010x} (ag {})", agi.agi_magicnum, index),
        ));
    }
    if checksums == Checksums::Enabled {
        crate::verify_crc(&agi_sector, raw::RawAgi::CRC_OFFSET, "agi crc")?;
    }
    if agi.agi_seqno != index {
        warn!("ag {}: agi carries sequence number {}", index, agi.agi_seqno);
    }

    let agfl_sector = sector_at(3)?;
    let agfl = raw::RawAgfl::from_slice(&agfl_sector)?;
    if agfl.agfl_magicnum != raw::XFS_AGFL_MAGIC {
        return Err(corrupt(
            "agfl magic",
            format!("{:#010x}", raw::XFS_AGFL_MAGIC),
            format!("{:#010x} (ag {})", agfl.agfl_magicnum, index),
        ));
    }
    if checksums == Checksums::Enabled {
        crate::verify_crc(&agfl_sector, raw::RawAgfl::CRC_OFFSET, "agfl crc")?;
    }

    Ok(Ag {
        index,
        superblock: copy,
        agf,
        agi,
        agfl,
    })
}
