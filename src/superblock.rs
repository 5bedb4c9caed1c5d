/// Reference: https://www.kernel.org/doc/html/v4.19/filesystems/ext4/ondisk/index.html#super-block
use byteorder::{ByteOrder, LittleEndian};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::DecodeError;

pub const SUPERBLOCK_OFFSET: u64 = 0x400;
pub const SUPERBLOCK_SIZE: usize = 0x400;
pub const EXT_MAGIC: u16 = 0xEF53;
pub const EXT4_FEATURE_INCOMPAT_64BIT: u32 = 0x80000;
pub const EXT3_FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x4;
pub const EXT2_FEATURE_RO_COMPAT_LARGE_FILE: u32 = 0x2;

const EXT2_GOOD_OLD_REV: u32 = 0;
const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;
const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;
// 1024 << 6 = 64 KiB, the largest block size the format allows.
const MAX_LOG_BLOCK_SIZE: u32 = 6;

#[derive(Debug, Clone, Serialize)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u64,
    pub s_r_blocks_count: u64,
    pub s_free_blocks_count: u64,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_log_frag_size: u32,
    pub s_blocks_per_group: u32,
    pub s_frags_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_mtime: u32,
    pub s_wtime: u32,
    pub s_mnt_count: u16,
    pub s_max_mnt_count: u16,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_errors: u16,
    pub s_minor_rev_level: u16,
    pub s_lastcheck: u32,
    pub s_checkinterval: u32,
    pub s_creator_os: u32,
    pub s_rev_level: u32,
    pub s_def_resuid: u16,
    pub s_def_resgid: u16,
    pub s_first_ino: u32,
    pub s_inode_size: u16,
    pub s_block_group_nr: u16,
    pub s_feature_compat: u32,
    pub s_feature_incompat: u32,
    pub s_feature_ro_compat: u32,
    pub s_uuid: [u8; 16],
    pub s_volume_name: String,
    pub s_last_mounted: String,
    pub s_algorithm_usage_bitmap: u32,
    pub s_prealloc_blocks: u8,
    pub s_prealloc_dir_blocks: u8,
    pub s_reserved_gdt_blocks: u16,
    pub s_journal_uuid: [u8; 16],
    pub s_journal_inum: u32,
    pub s_journal_dev: u32,
    pub s_last_orphan: u32,
    pub s_hash_seed: [u32; 4],
    pub s_def_hash_version: u8,
    pub s_default_mount_opts: u32,
    pub s_first_meta_bg: u32,
    pub s_mkfs_time: u32,
    pub s_jnl_blocks: [u32; 17],
    pub s_min_extra_isize: u16,
    pub s_want_extra_isize: u16,
    pub s_flags: u32,
    pub s_raid_stride: u16,
    pub s_mmp_interval: u16,
    pub s_mmp_block: u64,
    pub s_raid_stripe_width: u32,
    pub s_log_groups_per_flex: u8,
}

/// Fixed-width text fields are NUL padded on disk.
fn trimmed_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).to_string()
}

impl Superblock {
    /// Decodes the 1024-byte superblock record.
    ///
    /// The layout is byte-packed little-endian; every field is read at its
    /// absolute offset within the record rather than through a struct overlay.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(DecodeError::ShortRead {
                offset: SUPERBLOCK_OFFSET,
                expected: SUPERBLOCK_SIZE,
            });
        }
        let le_u16 = |offset: usize| -> u16 { LittleEndian::read_u16(&data[offset..]) };
        let le_u32 = |offset: usize| -> u32 { LittleEndian::read_u32(&data[offset..]) };
        let le_u8 = |offset: usize| -> u8 { data[offset] };

        let s_magic = le_u16(0x38);
        if s_magic != EXT_MAGIC {
            return Err(DecodeError::BadMagic {
                expected: EXT_MAGIC,
                actual: s_magic,
            });
        }

        let s_feature_incompat = le_u32(0x60);
        let has_64bit = (s_feature_incompat & EXT4_FEATURE_INCOMPAT_64BIT) != 0;
        let hi = |offset: usize| -> u64 {
            if has_64bit {
                (le_u32(offset) as u64) << 32
            } else {
                0
            }
        };

        let mut s_uuid = [0u8; 16];
        s_uuid.copy_from_slice(&data[0x68..0x78]);
        let mut s_journal_uuid = [0u8; 16];
        s_journal_uuid.copy_from_slice(&data[0xD0..0xE0]);
        let mut s_hash_seed = [0u32; 4];
        LittleEndian::read_u32_into(&data[0xEC..0xFC], &mut s_hash_seed);
        let mut s_jnl_blocks = [0u32; 17];
        LittleEndian::read_u32_into(&data[0x10C..0x150], &mut s_jnl_blocks);

        let sb = Self {
            s_inodes_count: le_u32(0x00),
            s_blocks_count: hi(0x150) | le_u32(0x04) as u64,
            s_r_blocks_count: hi(0x154) | le_u32(0x08) as u64,
            s_free_blocks_count: hi(0x158) | le_u32(0x0C) as u64,
            s_free_inodes_count: le_u32(0x10),
            s_first_data_block: le_u32(0x14),
            s_log_block_size: le_u32(0x18),
            s_log_frag_size: le_u32(0x1C),
            s_blocks_per_group: le_u32(0x20),
            s_frags_per_group: le_u32(0x24),
            s_inodes_per_group: le_u32(0x28),
            s_mtime: le_u32(0x2C),
            s_wtime: le_u32(0x30),
            s_mnt_count: le_u16(0x34),
            s_max_mnt_count: le_u16(0x36),
            s_magic,
            s_state: le_u16(0x3A),
            s_errors: le_u16(0x3C),
            s_minor_rev_level: le_u16(0x3E),
            s_lastcheck: le_u32(0x40),
            s_checkinterval: le_u32(0x44),
            s_creator_os: le_u32(0x48),
            s_rev_level: le_u32(0x4C),
            s_def_resuid: le_u16(0x50),
            s_def_resgid: le_u16(0x52),
            s_first_ino: le_u32(0x54),
            s_inode_size: le_u16(0x58),
            s_block_group_nr: le_u16(0x5A),
            s_feature_compat: le_u32(0x5C),
            s_feature_incompat,
            s_feature_ro_compat: le_u32(0x64),
            s_uuid,
            s_volume_name: trimmed_string(&data[0x78..0x88]),
            s_last_mounted: trimmed_string(&data[0x88..0xC8]),
            s_algorithm_usage_bitmap: le_u32(0xC8),
            s_prealloc_blocks: le_u8(0xCC),
            s_prealloc_dir_blocks: le_u8(0xCD),
            s_reserved_gdt_blocks: le_u16(0xCE),
            s_journal_uuid,
            s_journal_inum: le_u32(0xE0),
            s_journal_dev: le_u32(0xE4),
            s_last_orphan: le_u32(0xE8),
            s_hash_seed,
            s_def_hash_version: le_u8(0xFC),
            s_default_mount_opts: le_u32(0x100),
            s_first_meta_bg: le_u32(0x104),
            s_mkfs_time: le_u32(0x108),
            s_jnl_blocks,
            s_min_extra_isize: le_u16(0x15C),
            s_want_extra_isize: le_u16(0x15E),
            s_flags: le_u32(0x160),
            s_raid_stride: le_u16(0x164),
            s_mmp_interval: le_u16(0x166),
            s_mmp_block: LittleEndian::read_u64(&data[0x168..]),
            s_raid_stripe_width: le_u32(0x170),
            s_log_groups_per_flex: le_u8(0x174),
        };
        sb.validate()?;
        Ok(sb)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.s_log_block_size > MAX_LOG_BLOCK_SIZE {
            return Err(DecodeError::InvalidGeometry(format!(
                "s_log_block_size {} is out of range",
                self.s_log_block_size
            )));
        }
        if self.s_blocks_per_group == 0 {
            return Err(DecodeError::InvalidGeometry(
                "s_blocks_per_group is zero".to_string(),
            ));
        }
        if self.s_inodes_per_group == 0 {
            return Err(DecodeError::InvalidGeometry(
                "s_inodes_per_group is zero".to_string(),
            ));
        }
        if self.inode_size() < EXT2_GOOD_OLD_INODE_SIZE as usize {
            return Err(DecodeError::InvalidGeometry(format!(
                "inode size {} is smaller than {}",
                self.inode_size(),
                EXT2_GOOD_OLD_INODE_SIZE
            )));
        }
        Ok(())
    }

    pub fn has_journal(&self) -> bool {
        (self.s_feature_compat & EXT3_FEATURE_COMPAT_HAS_JOURNAL) != 0
    }

    pub fn has_large_files(&self) -> bool {
        (self.s_feature_ro_compat & EXT2_FEATURE_RO_COMPAT_LARGE_FILE) != 0
    }

    /// `2^(10 + s_log_block_size)`
    pub fn block_size(&self) -> u64 {
        1024 << self.s_log_block_size
    }

    pub fn blocks_count(&self) -> u64 {
        self.s_blocks_count
    }

    pub fn blocks_per_group(&self) -> u64 {
        self.s_blocks_per_group as u64
    }

    pub fn inodes_per_group(&self) -> usize {
        self.s_inodes_per_group as usize
    }

    /// Revision 0 filesystems have a fixed 128-byte inode and leave the field zeroed.
    pub fn inode_size(&self) -> usize {
        if self.s_rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE as usize
        } else {
            self.s_inode_size as usize
        }
    }

    pub fn first_ino(&self) -> usize {
        if self.s_rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_FIRST_INO as usize
        } else {
            self.s_first_ino as usize
        }
    }

    /// `ceil(s_blocks_count / s_blocks_per_group)`
    pub fn group_count(&self) -> u64 {
        self.s_blocks_count.div_ceil(self.blocks_per_group())
    }

    /// Number of blocks the bitmap of `group` describes. The last group holds
    /// the residual `s_blocks_count mod s_blocks_per_group`, where zero means
    /// the group is exactly full.
    pub fn blocks_in_group(&self, group: u64) -> u64 {
        let bpg = self.blocks_per_group();
        if group + 1 == self.group_count() {
            match self.s_blocks_count % bpg {
                0 => bpg,
                residual => residual,
            }
        } else {
            bpg
        }
    }

    /// Bytes read for one block bitmap.
    pub fn block_bitmap_len(&self) -> usize {
        self.blocks_per_group().div_ceil(8) as usize
    }

    /// Bytes read for one inode bitmap. The on-disk contract sizes it from the
    /// filesystem-wide inode count, not the per-group one.
    pub fn inode_bitmap_len(&self) -> usize {
        (self.s_inodes_count as usize).div_ceil(8)
    }

    /// Byte offset of the group descriptor table: the block right after the
    /// one holding the superblock.
    pub fn group_descriptor_offset(&self) -> u64 {
        let bs = self.block_size();
        (SUPERBLOCK_OFFSET / bs + 1) * bs
    }

    pub fn to_json(&self) -> Value {
        let format_time = |seconds: u32| {
            Utc.timestamp_opt(seconds as i64, 0)
                .single()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default()
        };
        json!({
            "inodes_count": self.s_inodes_count,
            "blocks_count": self.s_blocks_count,
            "free_blocks_count": self.s_free_blocks_count,
            "free_inodes_count": self.s_free_inodes_count,
            "first_data_block": self.s_first_data_block,
            "block_size": self.block_size(),
            "blocks_per_group": self.s_blocks_per_group,
            "inodes_per_group": self.s_inodes_per_group,
            "group_count": self.group_count(),
            "inode_size": self.inode_size(),
            "first_ino": self.first_ino(),
            "rev_level": self.s_rev_level,
            "magic": format!("0x{:04x}", self.s_magic),
            "volume_name": self.s_volume_name,
            "last_mounted": self.s_last_mounted,
            "uuid": self.s_uuid.iter().map(|b| format!("{:02x}", b)).collect::<String>(),
            "mtime": format_time(self.s_mtime),
            "wtime": format_time(self.s_wtime),
            "mkfs_time": format_time(self.s_mkfs_time),
            "lastcheck": format_time(self.s_lastcheck),
            "feature_compat": format!("0x{:08x}", self.s_feature_compat),
            "feature_incompat": format!("0x{:08x}", self.s_feature_incompat),
            "feature_ro_compat": format!("0x{:08x}", self.s_feature_ro_compat),
            "has_journal": self.has_journal(),
            "journal_inum": self.s_journal_inum,
        })
    }
}
