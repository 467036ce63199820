//! Read-only access to XFS (v5, version-3 inode) filesystem images.
//!
//! The image is anything implementing `positioned_io::ReadAt`: a raw
//! block device, a disk image file, or a pre-sliced partition. All
//! reads are offset-indexed; nothing here holds a seek position.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use std::io::Read;
//!
//! let image = positioned_io::RandomAccessFile::open("fs.img")?;
//! let fs = xfs::FileSystem::new(image)?;
//! for entry in fs.read_dir("/etc")? {
//!     println!("{} -> inode {}", entry.name, entry.inode);
//! }
//! let mut content = String::new();
//! fs.open("/etc/os-release")?.read_to_string(&mut content)?;
//! # Ok(())
//! # }
//! ```
//!
//! Strictly a decoder: no write support, no journal replay, no quota
//! or attribute parsing, and no partition-table handling.

use std::fmt;
use std::io;

use bitflags::bitflags;
use byteorder::BigEndian;
use byteorder::ByteOrder;
use crc::Crc;
use crc::CRC_32_ISCSI;
use positioned_io::ReadAt;
use thiserror::Error as ThisError;

mod ags;
mod cache;
mod dirs;
mod extents;
mod inner_reader;
mod parse;
pub mod raw;

pub use crate::ags::Ag;
pub use crate::ags::Superblock;
pub use crate::cache::InodeCache;
pub use crate::cache::LruInodeCache;
pub use crate::cache::NoopCache;
pub use crate::dirs::ShortformDir;
pub use crate::extents::BmbtIrec;
pub use crate::extents::TreeReader;

use crate::inner_reader::InnerReader;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The reader ran out of bytes before the request was satisfied.
    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: usize, got: usize },

    /// The reader failed at the OS level.
    #[error("read failed at offset {offset}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A magic mismatch or structural impossibility in the image.
    #[error("corrupt {field}: expected {expected}, actual {actual}")]
    Corrupt {
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// Valid on disk, but outside what this crate decodes.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn read_be16(data: &[u8]) -> u16 {
    BigEndian::read_u16(data)
}

pub(crate) fn read_be32(data: &[u8]) -> u32 {
    BigEndian::read_u32(data)
}

pub(crate) fn read_be64(data: &[u8]) -> u64 {
    BigEndian::read_u64(data)
}

pub(crate) fn corrupt(
    field: &'static str,
    expected: impl fmt::Display,
    actual: impl fmt::Display,
) -> Error {
    Error::Corrupt {
        field,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// CRC32c of `buf` with the four checksum bytes treated as zero. XFS
/// stores the result little-endian, unlike every other field.
pub(crate) fn crc32c_zeroed(buf: &[u8], crc_offset: usize) -> u32 {
    let mut digest = CASTAGNOLI.digest();
    digest.update(&buf[..crc_offset]);
    digest.update(&[0u8; 4]);
    digest.update(&buf[crc_offset + 4..]);
    digest.finalize()
}

pub(crate) fn verify_crc(buf: &[u8], crc_offset: usize, field: &'static str) -> Result<()> {
    if crc_offset + 4 > buf.len() {
        return Err(corrupt(field, "a checksummed record", "a truncated one"));
    }
    let stored = u32::from_le_bytes([
        buf[crc_offset],
        buf[crc_offset + 1],
        buf[crc_offset + 2],
        buf[crc_offset + 3],
    ]);
    let computed = crc32c_zeroed(buf, crc_offset);
    if stored != computed {
        return Err(corrupt(
            field,
            format!("{:#010x}", computed),
            format!("{:#010x}", stored),
        ));
    }
    Ok(())
}

/// Whether to verify the CRC32c fields carried by v5 metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksums {
    /// Recognize the fields but don't check them.
    None,
    /// Verify every header read; mismatches are `Corrupt`.
    Enabled,
}

impl Default for Checksums {
    fn default() -> Checksums {
        Checksums::None
    }
}

/// Inode cache selection for `FileSystem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheConfig {
    None,
    /// Keep up to this many decoded inodes.
    Lru(usize),
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig::None
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub checksums: Checksums,
    /// Serve trailing zeros for files whose extent map falls short of
    /// `size`, instead of failing `Corrupt` at open.
    pub lenient: bool,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Fifo,
    CharacterDevice,
    Directory,
    BlockDevice,
    RegularFile,
    SymbolicLink,
    Socket,
}

impl FileType {
    /// From the `S_IFMT` bits of an inode's mode.
    pub fn from_mode(mode: u16) -> Option<FileType> {
        match mode & 0xf000 {
            0x1000 => Some(FileType::Fifo),
            0x2000 => Some(FileType::CharacterDevice),
            0x4000 => Some(FileType::Directory),
            0x6000 => Some(FileType::BlockDevice),
            0x8000 => Some(FileType::RegularFile),
            0xa000 => Some(FileType::SymbolicLink),
            0xc000 => Some(FileType::Socket),
            _ => None,
        }
    }

    /// From the one-byte type hint carried by directory entries.
    pub fn from_dir_hint(hint: u8) -> Option<FileType> {
        match hint {
            1 => Some(FileType::RegularFile),
            2 => Some(FileType::Directory),
            3 => Some(FileType::CharacterDevice),
            4 => Some(FileType::BlockDevice),
            5 => Some(FileType::Fifo),
            6 => Some(FileType::Socket),
            7 => Some(FileType::SymbolicLink),
            _ => None,
        }
    }
}

bitflags! {
    pub struct InodeFlags: u16 {
        const REALTIME     = 0x0001;
        const PREALLOC     = 0x0002;
        const NEWRTBM      = 0x0004;
        const IMMUTABLE    = 0x0008;
        const APPEND       = 0x0010;
        const SYNC         = 0x0020;
        const NOATIME      = 0x0040;
        const NODUMP       = 0x0080;
        const RTINHERIT    = 0x0100;
        const PROJINHERIT  = 0x0200;
        const NOSYMLINKS   = 0x0400;
        const EXTSIZE      = 0x0800;
        const EXTSZINHERIT = 0x1000;
        const NODEFRAG     = 0x2000;
        const FILESTREAM   = 0x4000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub epoch_secs: u32,
    pub nanos: u32,
}

/// Metadata decoded from an inode core.
#[derive(Debug, Clone)]
pub struct Stat {
    pub file_type: FileType,
    /// Raw mode word, type and permission bits together.
    pub mode: u16,
    /// Permission bits only.
    pub perms: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub nblocks: u64,
    pub atime: Time,
    pub mtime: Time,
    pub ctime: Time,
    pub crtime: Time,
    pub flags: InodeFlags,
}

/// What `stat` returns for a path.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub ino: u64,
    pub file_type: FileType,
    /// Raw mode bits, e.g. `0o100644` for a regular `rw-r--r--` file.
    pub mode: u32,
    pub size: u64,
    pub mtime: Time,
}

/// One directory entry; `.` and `..` are never surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u64,
    pub file_type: FileType,
    pub name: String,
}

/// The decoded data fork. The on-disk format code and the file type
/// together pick the variant; anything outside this set fails
/// `Unsupported` at load.
#[derive(Debug, Clone)]
pub enum InodeBody {
    /// Device node: no payload.
    Device,
    LocalDirectory(ShortformDir),
    /// Link target bytes, stored inline.
    LocalSymlink(Vec<u8>),
    ExtentsDirectory(Vec<BmbtIrec>),
    ExtentsFile(Vec<BmbtIrec>),
    /// Extent map recovered by walking the fork's b+tree.
    BtreeDirectory(Vec<BmbtIrec>),
    BtreeFile(Vec<BmbtIrec>),
}

#[derive(Debug, Clone)]
pub struct Inode {
    pub number: u64,
    pub stat: Stat,
    pub body: InodeBody,
    /// An attribute fork exists past the data fork; its contents are
    /// not decoded.
    pub attr_fork: bool,
}

/// Parse an image with explicit options. The primary superblock and
/// every allocation group's headers are validated up front.
pub fn open_image<R: ReadAt>(reader: R, options: &Options) -> Result<FileSystem<R>> {
    FileSystem::new_with_options(reader, options)
}

pub struct FileSystem<R: ReadAt> {
    inner: InnerReader<R>,
    superblock: Superblock,
    ags: Vec<Ag>,
    options: Options,
    cache: Box<dyn InodeCache>,
}

impl<R: ReadAt> FileSystem<R> {
    pub fn new(reader: R) -> Result<FileSystem<R>> {
        FileSystem::new_with_options(reader, &Options::default())
    }

    pub fn new_with_options(reader: R, options: &Options) -> Result<FileSystem<R>> {
        let inner = InnerReader::new(reader);

        // the superblock always fits in the smallest legal sector;
        // real sector geometry is known only after this parse
        let leading = inner.read_exact_at(0, 512)?;
        let superblock = Superblock::from_sector(&leading)?;

        let cache: Box<dyn InodeCache> = match options.cache {
            CacheConfig::None => Box::new(NoopCache),
            CacheConfig::Lru(capacity) => Box::new(LruInodeCache::new(capacity)),
        };

        let fs = FileSystem {
            inner,
            superblock,
            ags: Vec::new(),
            options: options.clone(),
            cache,
        };

        let mut ags = Vec::with_capacity(fs.superblock.ag_count as usize);
        for index in 0..fs.superblock.ag_count {
            ags.push(ags::parse_ag(
                &fs.inner,
                &fs.superblock,
                index,
                fs.options.checksums,
            )?);
        }

        Ok(FileSystem { ags, ..fs })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Headers of every allocation group, in index order.
    pub fn ags(&self) -> &[Ag] {
        &self.ags
    }

    pub fn root(&self) -> Result<Inode> {
        let root = self.load_inode(self.superblock.root_ino)?;
        if root.stat.file_type != FileType::Directory {
            return Err(corrupt(
                "root inode",
                "a directory",
                format!("{:?}", root.stat.file_type),
            ));
        }
        Ok(root)
    }

    /// Decode the inode behind a number, through the cache when one is
    /// configured.
    pub fn load_inode(&self, ino: u64) -> Result<Inode> {
        if let Some(inode) = self.cache.get(ino) {
            return Ok(inode);
        }

        if self.superblock.ag_index(ino) >= u64::from(self.superblock.ag_count) {
            return Err(corrupt(
                "inode number",
                format!("within {} allocation groups", self.superblock.ag_count),
                ino,
            ));
        }

        let data = self.inner.read_exact_at(
            self.superblock.inode_abs_offset(ino),
            self.superblock.inode_size as usize,
        )?;
        if self.options.checksums == Checksums::Enabled {
            verify_crc(&data, raw::RawInode::CRC_OFFSET, "inode crc")?;
        }

        let inode = parse::inode(self, ino, &data)?;
        self.cache.add(ino, &inode);
        Ok(inode)
    }

    /// Resolve a `/`-separated path from the root. Empty segments and
    /// `.` are skipped; every intermediate segment must name a
    /// directory.
    pub fn resolve_path(&self, path: &str) -> Result<DirEntry> {
        let mut entry = DirEntry {
            inode: self.superblock.root_ino,
            file_type: FileType::Directory,
            name: String::new(),
        };

        for component in path_components(path)? {
            let dir = self.load_inode(entry.inode)?;
            if dir.stat.file_type != FileType::Directory {
                return Err(Error::NotDirectory(path.to_string()));
            }
            entry = self
                .dir_entries(&dir)?
                .into_iter()
                .find(|e| e.name == component)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }

        Ok(entry)
    }

    pub fn stat(&self, path: &str) -> Result<FileInfo> {
        let entry = self.resolve_path(path)?;
        let inode = self.load_inode(entry.inode)?;
        Ok(FileInfo {
            ino: inode.number,
            file_type: inode.stat.file_type,
            mode: u32::from(inode.stat.mode),
            size: inode.stat.size,
            mtime: inode.stat.mtime,
        })
    }

    /// All entries of the directory at `path`, in on-disk order.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let entry = self.resolve_path(path)?;
        let inode = self.load_inode(entry.inode)?;
        self.dir_entries(&inode)
    }

    /// All entries of an already-loaded directory inode.
    pub fn dir_entries(&self, inode: &Inode) -> Result<Vec<DirEntry>> {
        match &inode.body {
            InodeBody::LocalDirectory(sf) => Ok(sf.entries.clone()),
            InodeBody::ExtentsDirectory(extents) | InodeBody::BtreeDirectory(extents) => {
                dirs::extents_dir_entries(self, inode.number, extents)
            }
            _ => Err(Error::NotDirectory(format!("inode {}", inode.number))),
        }
    }

    /// Open the regular file at `path` for streaming. Directories fail
    /// `IsDirectory`; symlinks and device nodes fail `Unsupported`.
    pub fn open(&self, path: &str) -> Result<TreeReader<'_, R>> {
        let entry = self.resolve_path(path)?;
        let inode = self.load_inode(entry.inode)?;
        self.open_inode(&inode)
    }

    pub fn open_inode(&self, inode: &Inode) -> Result<TreeReader<'_, R>> {
        match &inode.body {
            InodeBody::ExtentsFile(extents) | InodeBody::BtreeFile(extents) => {
                TreeReader::new(self, inode.number, inode.stat.size, extents.clone())
            }
            InodeBody::LocalDirectory(_)
            | InodeBody::ExtentsDirectory(_)
            | InodeBody::BtreeDirectory(_) => {
                Err(Error::IsDirectory(format!("inode {}", inode.number)))
            }
            InodeBody::LocalSymlink(_) => Err(Error::Unsupported(format!(
                "symlink open (inode {})",
                inode.number
            ))),
            InodeBody::Device => Err(Error::Unsupported(format!(
                "device open (inode {})",
                inode.number
            ))),
        }
    }

    /// The target string of the symlink at `path`.
    pub fn read_link(&self, path: &str) -> Result<String> {
        let entry = self.resolve_path(path)?;
        let inode = self.load_inode(entry.inode)?;
        match &inode.body {
            InodeBody::LocalSymlink(target) => {
                Ok(String::from_utf8_lossy(target).into_owned())
            }
            _ => Err(Error::Unsupported(format!(
                "read_link on {:?} (inode {})",
                inode.stat.file_type, inode.number
            ))),
        }
    }

    /// Depth-first walk below a directory inode. `visit` sees each
    /// entry's path, inode and directory entry; returning `false`
    /// skips descending into that subtree.
    pub fn walk<F>(&self, inode: &Inode, path: &str, visit: &mut F) -> Result<()>
    where
        F: FnMut(&FileSystem<R>, &str, &Inode, &DirEntry) -> Result<bool>,
    {
        self.walk_inner(inode, path, visit, 0)
    }

    fn walk_inner<F>(&self, inode: &Inode, path: &str, visit: &mut F, depth: usize) -> Result<()>
    where
        F: FnMut(&FileSystem<R>, &str, &Inode, &DirEntry) -> Result<bool>,
    {
        // a directory chain deeper than this is a cycle, not a tree
        if depth > 256 {
            return Err(corrupt("directory depth", "at most 256", format!("{:?}", path)));
        }

        for entry in self.dir_entries(inode)? {
            let child = self.load_inode(entry.inode)?;
            let child_path = if path.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", path, entry.name)
            };
            if visit(self, &child_path, &child, &entry)?
                && child.stat.file_type == FileType::Directory
            {
                self.walk_inner(&child, &child_path, visit, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Whole contents of the regular file at `path`.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        use std::io::Read;

        let mut reader = self.open(path)?;
        let mut buf = Vec::with_capacity(reader.size() as usize);
        reader
            .read_to_end(&mut buf)
            .map_err(|source| Error::Io { offset: 0, source })?;
        Ok(buf)
    }

    /// Give the image reader back; dropping the filesystem releases it
    /// just as well.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    /// Read `count` fs-blocks starting at an fs-block number.
    pub(crate) fn read_fs_blocks(&self, fs_block: u64, count: u64) -> Result<Vec<u8>> {
        let bytes = count.saturating_mul(u64::from(self.superblock.block_size));
        self.inner
            .read_exact_at(self.superblock.block_to_abs(fs_block), bytes as usize)
    }

    pub(crate) fn inner(&self) -> &InnerReader<R> {
        &self.inner
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }
}

fn path_components(path: &str) -> Result<Vec<&str>> {
    let mut components = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment.len() > 255 {
            return Err(Error::InvalidPath(format!(
                "component of {} bytes (max 255)",
                segment.len()
            )));
        }
        if segment.contains('\0') {
            return Err(Error::InvalidPath("component contains a nul byte".to_string()));
        }
        components.push(segment);
    }
    Ok(components)
}
