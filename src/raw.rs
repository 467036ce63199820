//! Byte-offset decoders for the fixed on-disk records. Everything here
//! is big-endian and length-checked; nothing is cast over raw memory.

use std::convert::TryInto;

use crate::read_be16;
use crate::read_be32;
use crate::read_be64;
use crate::Error;
use crate::Result;

/// "XFSB"
pub const XFS_SB_MAGIC: u32 = 0x5846_5342;
/// "XAGF"
pub const XFS_AGF_MAGIC: u32 = 0x5841_4746;
/// "XAGI"
pub const XFS_AGI_MAGIC: u32 = 0x5841_4749;
/// "XAFL"
pub const XFS_AGFL_MAGIC: u32 = 0x5841_464c;
/// "XDB3", single-block directory data
pub const XFS_DIR3_BLOCK_MAGIC: u32 = 0x5844_4233;
/// "XDD3", multi-block directory data
pub const XFS_DIR3_DATA_MAGIC: u32 = 0x5844_4433;
/// "BMA3", extent b+tree block
pub const XFS_BMAP_CRC_MAGIC: u32 = 0x424d_4133;
/// "IN"
pub const XFS_DINODE_MAGIC: u16 = 0x494e;

fn need(data: &[u8], len: usize, field: &'static str) -> Result<()> {
    if data.len() < len {
        return Err(Error::Corrupt {
            field,
            expected: format!("at least {} bytes", len),
            actual: format!("{} bytes", data.len()),
        });
    }
    Ok(())
}

pub struct RawSuperblock {
    pub sb_magicnum: u32,
    /* filesystem block size, bytes */
    pub sb_blocksize: u32,
    /* total data blocks */
    pub sb_dblocks: u64,
    /* realtime blocks */
    pub sb_rblocks: u64,
    /* realtime extents */
    pub sb_rextents: u64,
    pub sb_uuid: [u8; 16],
    /* first block of the log, fsblock */
    pub sb_logstart: u64,
    /* root inode number */
    pub sb_rootino: u64,
    pub sb_rbmino: u64,
    pub sb_rsumino: u64,
    pub sb_rextsize: u32,
    /* blocks per allocation group */
    pub sb_agblocks: u32,
    /* number of allocation groups */
    pub sb_agcount: u32,
    pub sb_rbmblocks: u32,
    pub sb_logblocks: u32,
    pub sb_versionnum: u16,
    pub sb_sectsize: u16,
    pub sb_inodesize: u16,
    /* inodes per block */
    pub sb_inopblock: u16,
    pub sb_fname: [u8; 12],
    /* log2 of sb_blocksize */
    pub sb_blocklog: u8,
    /* log2 of sb_sectsize */
    pub sb_sectlog: u8,
    /* log2 of sb_inodesize */
    pub sb_inodelog: u8,
    /* log2 of sb_inopblock */
    pub sb_inopblog: u8,
    /* log2 of sb_agblocks, rounded up */
    pub sb_agblklog: u8,
    pub sb_rextslog: u8,
    /* mkfs in progress */
    pub sb_inprogress: u8,
    pub sb_imax_pct: u8,
    pub sb_icount: u64,
    pub sb_ifree: u64,
    pub sb_fdblocks: u64,
    pub sb_frextents: u64,
    pub sb_uquotino: u64,
    pub sb_gquotino: u64,
    pub sb_qflags: u16,
    pub sb_flags: u8,
    pub sb_shared_vn: u8,
    pub sb_inoalignmt: u32,
    pub sb_unit: u32,
    pub sb_width: u32,
    /* log2 of fsblocks per directory block */
    pub sb_dirblklog: u8,
    pub sb_logsectlog: u8,
    pub sb_logsectsize: u16,
    pub sb_logsunit: u32,
    pub sb_features2: u32,
    pub sb_bad_features2: u32,
    pub sb_features_compat: u32,
    pub sb_features_ro_compat: u32,
    pub sb_features_incompat: u32,
    pub sb_features_log_incompat: u32,
    /* crc32c of the superblock sector, stored little-endian */
    pub sb_crc: u32,
    pub sb_spino_align: u32,
    pub sb_pquotino: u64,
    pub sb_lsn: i64,
    pub sb_meta_uuid: [u8; 16],
}

impl RawSuperblock {
    pub const SIZE: usize = 264;
    pub const CRC_OFFSET: usize = 224;

    pub fn from_slice(data: &[u8]) -> Result<RawSuperblock> {
        need(data, Self::SIZE, "superblock")?;
        Ok(RawSuperblock {
            sb_magicnum: read_be32(&data[0x00..]),
            sb_blocksize: read_be32(&data[0x04..]),
            sb_dblocks: read_be64(&data[0x08..]),
            sb_rblocks: read_be64(&data[0x10..]),
            sb_rextents: read_be64(&data[0x18..]),
            sb_uuid: data[0x20..0x30].try_into().expect("sliced"),
            sb_logstart: read_be64(&data[0x30..]),
            sb_rootino: read_be64(&data[0x38..]),
            sb_rbmino: read_be64(&data[0x40..]),
            sb_rsumino: read_be64(&data[0x48..]),
            sb_rextsize: read_be32(&data[0x50..]),
            sb_agblocks: read_be32(&data[0x54..]),
            sb_agcount: read_be32(&data[0x58..]),
            sb_rbmblocks: read_be32(&data[0x5c..]),
            sb_logblocks: read_be32(&data[0x60..]),
            sb_versionnum: read_be16(&data[0x64..]),
            sb_sectsize: read_be16(&data[0x66..]),
            sb_inodesize: read_be16(&data[0x68..]),
            sb_inopblock: read_be16(&data[0x6a..]),
            sb_fname: data[0x6c..0x78].try_into().expect("sliced"),
            sb_blocklog: data[0x78],
            sb_sectlog: data[0x79],
            sb_inodelog: data[0x7a],
            sb_inopblog: data[0x7b],
            sb_agblklog: data[0x7c],
            sb_rextslog: data[0x7d],
            sb_inprogress: data[0x7e],
            sb_imax_pct: data[0x7f],
            sb_icount: read_be64(&data[0x80..]),
            sb_ifree: read_be64(&data[0x88..]),
            sb_fdblocks: read_be64(&data[0x90..]),
            sb_frextents: read_be64(&data[0x98..]),
            sb_uquotino: read_be64(&data[0xa0..]),
            sb_gquotino: read_be64(&data[0xa8..]),
            sb_qflags: read_be16(&data[0xb0..]),
            sb_flags: data[0xb2],
            sb_shared_vn: data[0xb3],
            sb_inoalignmt: read_be32(&data[0xb4..]),
            sb_unit: read_be32(&data[0xb8..]),
            sb_width: read_be32(&data[0xbc..]),
            sb_dirblklog: data[0xc0],
            sb_logsectlog: data[0xc1],
            sb_logsectsize: read_be16(&data[0xc2..]),
            sb_logsunit: read_be32(&data[0xc4..]),
            sb_features2: read_be32(&data[0xc8..]),
            sb_bad_features2: read_be32(&data[0xcc..]),
            sb_features_compat: read_be32(&data[0xd0..]),
            sb_features_ro_compat: read_be32(&data[0xd4..]),
            sb_features_incompat: read_be32(&data[0xd8..]),
            sb_features_log_incompat: read_be32(&data[0xdc..]),
            sb_crc: u32::from_le_bytes(data[0xe0..0xe4].try_into().expect("sliced")),
            sb_spino_align: read_be32(&data[0xe4..]),
            sb_pquotino: read_be64(&data[0xe8..]),
            sb_lsn: read_be64(&data[0xf0..]) as i64,
            sb_meta_uuid: data[0xf8..0x108].try_into().expect("sliced"),
        })
    }
}

pub struct RawAgf {
    pub agf_magicnum: u32,
    pub agf_versionnum: u32,
    /* index of this ag */
    pub agf_seqno: u32,
    /* length of the ag, fsblocks */
    pub agf_length: u32,
    /* freespace btree roots: bno, cnt, rmap */
    pub agf_roots: [u32; 3],
    pub agf_levels: [u32; 3],
    pub agf_flfirst: u32,
    pub agf_fllast: u32,
    pub agf_flcount: u32,
    pub agf_freeblks: u32,
    pub agf_longest: u32,
    pub agf_btreeblks: u32,
    pub agf_uuid: [u8; 16],
    pub agf_rmap_blocks: u32,
    pub agf_refcount_blocks: u32,
    pub agf_refcount_root: u32,
    pub agf_refcount_level: u32,
    pub agf_lsn: u64,
    pub agf_crc: u32,
}

impl RawAgf {
    pub const SIZE: usize = 224;
    pub const CRC_OFFSET: usize = 216;

    pub fn from_slice(data: &[u8]) -> Result<RawAgf> {
        need(data, Self::SIZE, "agf")?;
        Ok(RawAgf {
            agf_magicnum: read_be32(&data[0x00..]),
            agf_versionnum: read_be32(&data[0x04..]),
            agf_seqno: read_be32(&data[0x08..]),
            agf_length: read_be32(&data[0x0c..]),
            agf_roots: [
                read_be32(&data[0x10..]),
                read_be32(&data[0x14..]),
                read_be32(&data[0x18..]),
            ],
            agf_levels: [
                read_be32(&data[0x1c..]),
                read_be32(&data[0x20..]),
                read_be32(&data[0x24..]),
            ],
            agf_flfirst: read_be32(&data[0x28..]),
            agf_fllast: read_be32(&data[0x2c..]),
            agf_flcount: read_be32(&data[0x30..]),
            agf_freeblks: read_be32(&data[0x34..]),
            agf_longest: read_be32(&data[0x38..]),
            agf_btreeblks: read_be32(&data[0x3c..]),
            agf_uuid: data[0x40..0x50].try_into().expect("sliced"),
            agf_rmap_blocks: read_be32(&data[0x50..]),
            agf_refcount_blocks: read_be32(&data[0x54..]),
            agf_refcount_root: read_be32(&data[0x58..]),
            agf_refcount_level: read_be32(&data[0x5c..]),
            // 112 spare bytes, then the tail
            agf_lsn: read_be64(&data[0xd0..]),
            agf_crc: u32::from_le_bytes(data[0xd8..0xdc].try_into().expect("sliced")),
        })
    }
}

pub struct RawAgi {
    pub agi_magicnum: u32,
    pub agi_versionnum: u32,
    pub agi_seqno: u32,
    pub agi_length: u32,
    /* allocated inodes */
    pub agi_count: u32,
    /* inode btree root block, ag-relative */
    pub agi_root: u32,
    pub agi_level: u32,
    pub agi_freecount: u32,
    pub agi_newino: u32,
    pub agi_dirino: u32,
    /* hash table of unlinked-but-open inodes */
    pub agi_unlinked: [u8; 256],
    pub agi_uuid: [u8; 16],
    pub agi_crc: u32,
    pub agi_lsn: u64,
    /* free inode btree root */
    pub agi_free_root: u32,
    pub agi_free_level: u32,
    pub agi_iblocks: u32,
    pub agi_fblocks: u32,
}

impl RawAgi {
    pub const SIZE: usize = 344;
    pub const CRC_OFFSET: usize = 312;

    pub fn from_slice(data: &[u8]) -> Result<RawAgi> {
        need(data, Self::SIZE, "agi")?;
        Ok(RawAgi {
            agi_magicnum: read_be32(&data[0x00..]),
            agi_versionnum: read_be32(&data[0x04..]),
            agi_seqno: read_be32(&data[0x08..]),
            agi_length: read_be32(&data[0x0c..]),
            agi_count: read_be32(&data[0x10..]),
            agi_root: read_be32(&data[0x14..]),
            agi_level: read_be32(&data[0x18..]),
            agi_freecount: read_be32(&data[0x1c..]),
            agi_newino: read_be32(&data[0x20..]),
            agi_dirino: read_be32(&data[0x24..]),
            agi_unlinked: data[0x28..0x128].try_into().expect("sliced"),
            agi_uuid: data[0x128..0x138].try_into().expect("sliced"),
            agi_crc: u32::from_le_bytes(data[0x138..0x13c].try_into().expect("sliced")),
            agi_lsn: read_be64(&data[0x140..]),
            agi_free_root: read_be32(&data[0x148..]),
            agi_free_level: read_be32(&data[0x14c..]),
            agi_iblocks: read_be32(&data[0x150..]),
            agi_fblocks: read_be32(&data[0x154..]),
        })
    }
}

pub struct RawAgfl {
    pub agfl_magicnum: u32,
    pub agfl_seqno: u32,
    pub agfl_uuid: [u8; 16],
    pub agfl_lsn: u64,
    pub agfl_crc: u32,
    /* free-list block numbers, ag-relative */
    pub agfl_bno: Vec<u32>,
}

impl RawAgfl {
    pub const SIZE: usize = 36 + 4 * Self::BNO_COUNT;
    pub const CRC_OFFSET: usize = 32;
    pub const BNO_COUNT: usize = 118;

    pub fn from_slice(data: &[u8]) -> Result<RawAgfl> {
        need(data, Self::SIZE, "agfl")?;
        let mut agfl_bno = Vec::with_capacity(Self::BNO_COUNT);
        for i in 0..Self::BNO_COUNT {
            agfl_bno.push(read_be32(&data[0x24 + 4 * i..]));
        }
        Ok(RawAgfl {
            agfl_magicnum: read_be32(&data[0x00..]),
            agfl_seqno: read_be32(&data[0x04..]),
            agfl_uuid: data[0x08..0x18].try_into().expect("sliced"),
            agfl_lsn: read_be64(&data[0x18..]),
            agfl_crc: u32::from_le_bytes(data[0x20..0x24].try_into().expect("sliced")),
            agfl_bno,
        })
    }
}

/// Inode core, version 3 only. The data fork begins at `SIZE`.
pub struct RawInode {
    pub di_magic: u16,
    /* type and permissions */
    pub di_mode: u16,
    pub di_version: u8,
    /* data fork format code */
    pub di_format: u8,
    pub di_onlink: u16,
    pub di_uid: u32,
    pub di_gid: u32,
    pub di_nlink: u32,
    pub di_projid: u16,
    pub di_projid_hi: u16,
    pub di_flushiter: u16,
    pub di_atime: (u32, u32),
    pub di_mtime: (u32, u32),
    pub di_ctime: (u32, u32),
    /* size in bytes */
    pub di_size: u64,
    /* blocks held, data and attr forks together */
    pub di_nblocks: u64,
    pub di_extsize: u32,
    /* data fork extent count */
    pub di_nextents: u32,
    /* attr fork extent count */
    pub di_anextents: u16,
    /* attr fork offset past the core, in 8-byte units; 0 = absent */
    pub di_forkoff: u8,
    pub di_aformat: u8,
    pub di_dmevmask: u32,
    pub di_dmstate: u16,
    pub di_flags: u16,
    pub di_gen: u32,
    pub di_next_unlinked: u32,
    pub di_crc: u32,
    pub di_changecount: u64,
    pub di_lsn: u64,
    pub di_flags2: u64,
    pub di_cowextsize: u32,
    pub di_crtime: (u32, u32),
    /* this inode's own number */
    pub di_ino: u64,
    pub di_uuid: [u8; 16],
}

impl RawInode {
    /// Size of the v3 core; the data fork starts here.
    pub const SIZE: usize = 176;
    pub const CRC_OFFSET: usize = 100;

    pub fn from_slice(data: &[u8]) -> Result<RawInode> {
        need(data, Self::SIZE, "inode core")?;
        Ok(RawInode {
            di_magic: read_be16(&data[0x00..]),
            di_mode: read_be16(&data[0x02..]),
            di_version: data[0x04],
            di_format: data[0x05],
            di_onlink: read_be16(&data[0x06..]),
            di_uid: read_be32(&data[0x08..]),
            di_gid: read_be32(&data[0x0c..]),
            di_nlink: read_be32(&data[0x10..]),
            di_projid: read_be16(&data[0x14..]),
            di_projid_hi: read_be16(&data[0x16..]),
            // 6 pad bytes
            di_flushiter: read_be16(&data[0x1e..]),
            di_atime: (read_be32(&data[0x20..]), read_be32(&data[0x24..])),
            di_mtime: (read_be32(&data[0x28..]), read_be32(&data[0x2c..])),
            di_ctime: (read_be32(&data[0x30..]), read_be32(&data[0x34..])),
            di_size: read_be64(&data[0x38..]),
            di_nblocks: read_be64(&data[0x40..]),
            di_extsize: read_be32(&data[0x48..]),
            di_nextents: read_be32(&data[0x4c..]),
            di_anextents: read_be16(&data[0x50..]),
            di_forkoff: data[0x52],
            di_aformat: data[0x53],
            di_dmevmask: read_be32(&data[0x54..]),
            di_dmstate: read_be16(&data[0x58..]),
            di_flags: read_be16(&data[0x5a..]),
            di_gen: read_be32(&data[0x5c..]),
            di_next_unlinked: read_be32(&data[0x60..]),
            di_crc: u32::from_le_bytes(data[0x64..0x68].try_into().expect("sliced")),
            di_changecount: read_be64(&data[0x68..]),
            di_lsn: read_be64(&data[0x70..]),
            di_flags2: read_be64(&data[0x78..]),
            di_cowextsize: read_be32(&data[0x80..]),
            // 12 pad bytes
            di_crtime: (read_be32(&data[0x90..]), read_be32(&data[0x94..])),
            di_ino: read_be64(&data[0x98..]),
            di_uuid: data[0xa0..0xb0].try_into().expect("sliced"),
        })
    }
}

/// Header shared by XDB3 and XDD3 directory data blocks, including the
/// best-free table and its padding.
pub struct RawDir3DataHdr {
    pub magic: u32,
    pub crc: u32,
    /* disk address of this block */
    pub blkno: u64,
    pub lsn: u64,
    pub uuid: [u8; 16],
    /* inode that owns the block */
    pub owner: u64,
    /* best free regions: (offset, length) */
    pub frees: [(u16, u16); 3],
}

impl RawDir3DataHdr {
    /// Entries begin at this offset within the directory block.
    pub const SIZE: usize = 64;
    pub const CRC_OFFSET: usize = 4;

    pub fn from_slice(data: &[u8]) -> Result<RawDir3DataHdr> {
        need(data, Self::SIZE, "dir data header")?;
        Ok(RawDir3DataHdr {
            magic: read_be32(&data[0x00..]),
            crc: u32::from_le_bytes(data[0x04..0x08].try_into().expect("sliced")),
            blkno: read_be64(&data[0x08..]),
            lsn: read_be64(&data[0x10..]),
            uuid: data[0x18..0x28].try_into().expect("sliced"),
            owner: read_be64(&data[0x28..]),
            frees: [
                (read_be16(&data[0x30..]), read_be16(&data[0x32..])),
                (read_be16(&data[0x34..]), read_be16(&data[0x36..])),
                (read_be16(&data[0x38..]), read_be16(&data[0x3a..])),
            ],
            // 4 bytes of padding close the header
        })
    }
}

/// Tail of a single-block (XDB3) directory: `count` leaf entries and
/// this struct sit at the end of the block, after the data entries.
pub struct RawDir2BlockTail {
    pub count: u32,
    pub stale: u32,
}

impl RawDir2BlockTail {
    pub const SIZE: usize = 8;
    /* hashval + address */
    pub const LEAF_ENTRY_SIZE: usize = 8;

    pub fn from_slice(data: &[u8]) -> Result<RawDir2BlockTail> {
        need(data, Self::SIZE, "dir block tail")?;
        Ok(RawDir2BlockTail {
            count: read_be32(&data[0x00..]),
            stale: read_be32(&data[0x04..]),
        })
    }
}

/// Root of an extent b+tree as embedded in an inode's data fork. The
/// pointer array starts halfway through the fork, not right after the
/// keys: its offset is computed from the fork's record capacity.
pub struct RawBmdrHdr {
    pub level: u16,
    pub numrecs: u16,
}

impl RawBmdrHdr {
    pub const SIZE: usize = 4;

    pub fn from_slice(data: &[u8]) -> Result<RawBmdrHdr> {
        need(data, Self::SIZE, "bmbt root header")?;
        Ok(RawBmdrHdr {
            level: read_be16(&data[0x00..]),
            numrecs: read_be16(&data[0x02..]),
        })
    }
}

/// On-disk extent b+tree block header (long form, v5).
pub struct RawBtreeLongHdr {
    pub magic: u32,
    pub level: u16,
    pub numrecs: u16,
    pub leftsib: u64,
    pub rightsib: u64,
    pub blkno: u64,
    pub lsn: u64,
    pub uuid: [u8; 16],
    pub owner: u64,
    pub crc: u32,
}

impl RawBtreeLongHdr {
    pub const SIZE: usize = 72;
    pub const CRC_OFFSET: usize = 64;

    pub fn from_slice(data: &[u8]) -> Result<RawBtreeLongHdr> {
        need(data, Self::SIZE, "btree block header")?;
        Ok(RawBtreeLongHdr {
            magic: read_be32(&data[0x00..]),
            level: read_be16(&data[0x04..]),
            numrecs: read_be16(&data[0x06..]),
            leftsib: read_be64(&data[0x08..]),
            rightsib: read_be64(&data[0x10..]),
            blkno: read_be64(&data[0x18..]),
            lsn: read_be64(&data[0x20..]),
            uuid: data[0x28..0x38].try_into().expect("sliced"),
            owner: read_be64(&data[0x38..]),
            crc: u32::from_le_bytes(data[0x40..0x44].try_into().expect("sliced")),
        })
    }
}
