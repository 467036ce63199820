use log::debug;
use positioned_io::ReadAt;

use crate::corrupt;
use crate::dirs;
use crate::extents;
use crate::raw;
use crate::Error;
use crate::FileSystem;
use crate::FileType;
use crate::Inode;
use crate::InodeBody;
use crate::InodeFlags;
use crate::Result;
use crate::Stat;
use crate::Time;

pub const XFS_DINODE_FMT_DEV: u8 = 0;
pub const XFS_DINODE_FMT_LOCAL: u8 = 1;
pub const XFS_DINODE_FMT_EXTENTS: u8 = 2;
pub const XFS_DINODE_FMT_BTREE: u8 = 3;
pub const XFS_DINODE_FMT_UUID: u8 = 4;
pub const XFS_DINODE_FMT_RMAP: u8 = 5;

/// Decode one on-disk inode record. `data` is the full `inodesize`
/// bytes; `ino` is the number it was addressed by.
pub(crate) fn inode<R: ReadAt>(fs: &FileSystem<R>, ino: u64, data: &[u8]) -> Result<Inode> {
    let raw = raw::RawInode::from_slice(data)?;

    if raw.di_magic != raw::XFS_DINODE_MAGIC {
        return Err(corrupt(
            "inode magic",
            format!("{:#06x}", raw::XFS_DINODE_MAGIC),
            format!("{:#06x} (inode {})", raw.di_magic, ino),
        ));
    }
    if raw.di_version != 3 {
        return Err(Error::Unsupported(format!(
            "inode version {} (inode {}, only version 3 is readable)",
            raw.di_version, ino
        )));
    }
    if raw.di_ino != ino {
        return Err(corrupt("inode number", ino, raw.di_ino));
    }

    let file_type = FileType::from_mode(raw.di_mode).ok_or_else(|| {
        corrupt(
            "inode mode",
            "a known file type",
            format!("{:#08o} (inode {})", raw.di_mode, ino),
        )
    })?;

    // the data fork runs from the end of the core to the attribute
    // fork, or to the end of the record if there isn't one
    let fork_start = raw::RawInode::SIZE;
    let fork_end = if raw.di_forkoff != 0 {
        fork_start + usize::from(raw.di_forkoff) * 8
    } else {
        data.len()
    };
    if fork_end > data.len() || fork_end < fork_start {
        return Err(corrupt(
            "inode fork offset",
            format!("within the {}-byte inode", data.len()),
            format!("{} (inode {})", raw.di_forkoff, ino),
        ));
    }
    let fork = &data[fork_start..fork_end];

    if raw.di_forkoff != 0 {
        debug!(
            "inode {} has an attribute fork at +{} (not parsed)",
            ino,
            usize::from(raw.di_forkoff) * 8
        );
    }

    let body = match (raw.di_format, file_type) {
        (XFS_DINODE_FMT_DEV, _) => InodeBody::Device,
        (XFS_DINODE_FMT_LOCAL, FileType::Directory) => {
            InodeBody::LocalDirectory(dirs::parse_shortform(ino, fork)?)
        }
        (XFS_DINODE_FMT_LOCAL, FileType::SymbolicLink) => {
            let len = raw.di_size as usize;
            if len > fork.len() {
                return Err(corrupt(
                    "symlink length",
                    format!("at most the {}-byte fork", fork.len()),
                    format!("{} (inode {})", len, ino),
                ));
            }
            InodeBody::LocalSymlink(fork[..len].to_vec())
        }
        (XFS_DINODE_FMT_EXTENTS, FileType::Directory) => {
            InodeBody::ExtentsDirectory(extents::decode_extent_list(fork, raw.di_nextents)?)
        }
        (XFS_DINODE_FMT_EXTENTS, FileType::RegularFile) => {
            InodeBody::ExtentsFile(extents::decode_extent_list(fork, raw.di_nextents)?)
        }
        (XFS_DINODE_FMT_BTREE, FileType::Directory) => {
            InodeBody::BtreeDirectory(extents::load_btree_extents(fs, ino, fork)?)
        }
        (XFS_DINODE_FMT_BTREE, FileType::RegularFile) => {
            InodeBody::BtreeFile(extents::load_btree_extents(fs, ino, fork)?)
        }
        (XFS_DINODE_FMT_UUID, _) => {
            return Err(Error::Unsupported(format!("inode format uuid (inode {})", ino)))
        }
        (XFS_DINODE_FMT_RMAP, _) => {
            return Err(Error::Unsupported(format!("inode format rmap (inode {})", ino)))
        }
        (format, _) => {
            return Err(Error::Unsupported(format!(
                "inode format {} for {:?} (inode {})",
                format, file_type, ino
            )))
        }
    };

    let stat = Stat {
        file_type,
        mode: raw.di_mode,
        perms: raw.di_mode & 0o7777,
        uid: raw.di_uid,
        gid: raw.di_gid,
        size: raw.di_size,
        nlink: raw.di_nlink,
        nblocks: raw.di_nblocks,
        atime: Time { epoch_secs: raw.di_atime.0, nanos: raw.di_atime.1 },
        mtime: Time { epoch_secs: raw.di_mtime.0, nanos: raw.di_mtime.1 },
        ctime: Time { epoch_secs: raw.di_ctime.0, nanos: raw.di_ctime.1 },
        crtime: Time { epoch_secs: raw.di_crtime.0, nanos: raw.di_crtime.1 },
        flags: InodeFlags::from_bits_truncate(raw.di_flags),
    };

    Ok(Inode {
        number: ino,
        stat,
        body,
        attr_fork: raw.di_forkoff != 0,
    })
}
