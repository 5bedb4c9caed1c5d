/// Reference: https://www.kernel.org/doc/html/latest/filesystems/ext4/index.html
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::DecodeError;

pub const EXT2_GOOD_OLD_INODE_SIZE: usize = 128;
pub const EXT3_NDIR_BLOCKS: usize = 12;
pub const EXT3_IND_BLOCK: usize = EXT3_NDIR_BLOCKS;
pub const EXT3_DIND_BLOCK: usize = EXT3_IND_BLOCK + 1;
pub const EXT3_TIND_BLOCK: usize = EXT3_DIND_BLOCK + 1;
pub const EXT3_N_BLOCKS: usize = EXT3_TIND_BLOCK + 1;

const S_IFMT: u16 = 0o170000;
const S_IFSOCK: u16 = 0o140000;
const S_IFLNK: u16 = 0o120000;
const S_IFREG: u16 = 0o100000;
const S_IFBLK: u16 = 0o060000;
const S_IFDIR: u16 = 0o040000;
const S_IFCHR: u16 = 0o020000;
const S_IFIFO: u16 = 0o010000;

/// Classic 128-byte ext2/ext3 inode.
///
/// `osd1` and `osd2` are OS-dependent unions. Nothing here interprets them;
/// they are kept as raw bytes so the fields after them stay at their offsets.
#[derive(Debug, Clone, Serialize)]
pub struct Inode {
    pub i_num: u64,
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_gid: u16,
    pub i_links_count: u16,
    /// 512-byte sectors, indirect blocks included.
    pub i_blocks: u32,
    pub i_flags: u32,
    pub osd1: [u8; 4],
    pub i_block: [u32; EXT3_N_BLOCKS],
    pub i_generation: u32,
    pub i_file_acl: u32,
    /// High 32 bits of the size for regular files on large_file filesystems.
    pub i_dir_acl: u32,
    pub i_faddr: u32,
    pub osd2: [u8; 12],
    pub i_extra_isize: u16,
}

/// Convert an ext-mode (includes file-type bits) into the familiar
/// 10-character string used by `ls -l`, e.g. "-rw-r--r--".
pub fn mode_to_string(mode: u16) -> String {
    const S_ISUID: u16 = 0o4000;
    const S_ISGID: u16 = 0o2000;
    const S_ISVTX: u16 = 0o1000;

    let file_ch = match mode & S_IFMT {
        S_IFSOCK => 's',
        S_IFLNK => 'l',
        S_IFREG => '-',
        S_IFBLK => 'b',
        S_IFDIR => 'd',
        S_IFCHR => 'c',
        S_IFIFO => 'p',
        _ => '?',
    };

    const PERMS: [(u16, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    let mut buf: Vec<char> = PERMS
        .iter()
        .map(|&(bit, ch)| if mode & bit != 0 { ch } else { '-' })
        .collect();

    // special bits
    let special = [(S_ISUID, 2, 's'), (S_ISGID, 5, 's'), (S_ISVTX, 8, 't')];
    for (bit, pos, ch) in special {
        if mode & bit != 0 {
            buf[pos] = if buf[pos] == 'x' {
                ch
            } else {
                ch.to_ascii_uppercase()
            };
        }
    }

    std::iter::once(file_ch).chain(buf).collect()
}

impl Inode {
    /// Decodes one inode record read from the inode table.
    ///
    /// `offset` is the absolute position the record was read from and only
    /// feeds the error report.
    pub fn from_bytes(i_num: u64, data: &[u8], offset: u64) -> Result<Self, DecodeError> {
        if data.len() < EXT2_GOOD_OLD_INODE_SIZE {
            return Err(DecodeError::ShortRead {
                offset,
                expected: EXT2_GOOD_OLD_INODE_SIZE,
            });
        }
        let le_u16 = |offset: usize| -> u16 { LittleEndian::read_u16(&data[offset..]) };
        let le_u32 = |offset: usize| -> u32 { LittleEndian::read_u32(&data[offset..]) };

        let mut i_block = [0u32; EXT3_N_BLOCKS];
        LittleEndian::read_u32_into(&data[0x28..0x64], &mut i_block);
        let mut osd1 = [0u8; 4];
        osd1.copy_from_slice(&data[0x24..0x28]);
        let mut osd2 = [0u8; 12];
        osd2.copy_from_slice(&data[0x74..0x80]);

        // Fields past the classic record only exist in larger inodes.
        let i_extra_isize = if data.len() >= EXT2_GOOD_OLD_INODE_SIZE + 2 {
            le_u16(0x80)
        } else {
            0
        };

        Ok(Inode {
            i_num,
            i_mode: le_u16(0x00),
            i_uid: le_u16(0x02),
            i_size: le_u32(0x04),
            i_atime: le_u32(0x08),
            i_ctime: le_u32(0x0C),
            i_mtime: le_u32(0x10),
            i_dtime: le_u32(0x14),
            i_gid: le_u16(0x18),
            i_links_count: le_u16(0x1A),
            i_blocks: le_u32(0x1C),
            i_flags: le_u32(0x20),
            osd1,
            i_block,
            i_generation: le_u32(0x64),
            i_file_acl: le_u32(0x68),
            i_dir_acl: le_u32(0x6C),
            i_faddr: le_u32(0x70),
            osd2,
            i_extra_isize,
        })
    }

    /// Returns the i_mode
    pub fn mode(&self) -> u16 {
        self.i_mode
    }

    /// Check if this inode is a regular file (S_IFREG).
    pub fn is_regular_file(&self) -> bool {
        (self.i_mode & S_IFMT) == S_IFREG
    }

    /// File size in bytes. `i_dir_acl` carries the high word for regular
    /// files when the filesystem has the large_file feature.
    pub fn size(&self, large_files: bool) -> u64 {
        if large_files && self.is_regular_file() {
            ((self.i_dir_acl as u64) << 32) | self.i_size as u64
        } else {
            self.i_size as u64
        }
    }

    /// Return the block pointers array: 12 direct, then the single, double
    /// and triple indirect roots.
    pub fn block_pointers(&self) -> &[u32; EXT3_N_BLOCKS] {
        &self.i_block
    }

    pub fn direct_pointers(&self) -> &[u32] {
        &self.i_block[..EXT3_NDIR_BLOCKS]
    }

    /// `i_blocks` converted from 512-byte sectors to filesystem blocks.
    ///
    /// This counts indirect blocks as well as data blocks.
    pub fn declared_blocks(&self, block_size: u64) -> u64 {
        self.i_blocks as u64 * 512 / block_size
    }
}
