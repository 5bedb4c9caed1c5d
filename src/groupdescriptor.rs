use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::DecodeError;

/// Size of one ext2/ext3 block group descriptor.
pub const GROUP_DESCRIPTOR_SIZE: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct GroupDescriptor {
    // Block number of the block bitmap.
    pub bg_block_bitmap: u32,
    // Block number of the inode bitmap.
    pub bg_inode_bitmap: u32,
    // First block of the inode table.
    pub bg_inode_table: u32,
    pub bg_free_blocks_count: u16,
    pub bg_free_inodes_count: u16,
    pub bg_used_dirs_count: u16,
}

impl GroupDescriptor {
    /// Parses a group descriptor from a raw byte slice.
    ///
    /// `data` must contain at least 32 bytes; the trailing pad and reserved
    /// words are not decoded.
    pub fn from_bytes(data: &[u8]) -> Self {
        GroupDescriptor {
            bg_block_bitmap: LittleEndian::read_u32(&data[0x00..]),
            bg_inode_bitmap: LittleEndian::read_u32(&data[0x04..]),
            bg_inode_table: LittleEndian::read_u32(&data[0x08..]),
            bg_free_blocks_count: LittleEndian::read_u16(&data[0x0C..]),
            bg_free_inodes_count: LittleEndian::read_u16(&data[0x0E..]),
            bg_used_dirs_count: LittleEndian::read_u16(&data[0x10..]),
        }
    }

    /// Splits a contiguous descriptor table into `count` descriptors.
    ///
    /// `table_offset` is only used to report where a short table started.
    pub fn parse_table(
        data: &[u8],
        count: usize,
        table_offset: u64,
    ) -> Result<Vec<Self>, DecodeError> {
        let needed = count * GROUP_DESCRIPTOR_SIZE;
        if data.len() < needed {
            return Err(DecodeError::ShortRead {
                offset: table_offset,
                expected: needed,
            });
        }
        Ok(data[..needed]
            .chunks_exact(GROUP_DESCRIPTOR_SIZE)
            .map(GroupDescriptor::from_bytes)
            .collect())
    }

    pub fn block_bitmap(&self) -> u64 {
        self.bg_block_bitmap as u64
    }

    pub fn inode_bitmap(&self) -> u64 {
        self.bg_inode_bitmap as u64
    }

    pub fn inode_table(&self) -> u64 {
        self.bg_inode_table as u64
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_descriptor(block_bitmap: u32, inode_bitmap: u32, inode_table: u32) -> [u8; 32] {
        let mut gd = [0u8; GROUP_DESCRIPTOR_SIZE];
        gd[0x00..0x04].copy_from_slice(&block_bitmap.to_le_bytes());
        gd[0x04..0x08].copy_from_slice(&inode_bitmap.to_le_bytes());
        gd[0x08..0x0C].copy_from_slice(&inode_table.to_le_bytes());
        gd[0x0C..0x0E].copy_from_slice(&7u16.to_le_bytes());
        gd[0x0E..0x10].copy_from_slice(&9u16.to_le_bytes());
        gd[0x10..0x12].copy_from_slice(&2u16.to_le_bytes());
        gd
    }

    #[test]
    fn parses_table_in_group_order() {
        let mut table = Vec::new();
        table.extend_from_slice(&raw_descriptor(3, 4, 5));
        table.extend_from_slice(&raw_descriptor(8195, 8196, 8197));
        table.resize(1024, 0);

        let gds = GroupDescriptor::parse_table(&table, 2, 2048).unwrap();
        assert_eq!(gds.len(), 2);
        assert_eq!(gds[0].block_bitmap(), 3);
        assert_eq!(gds[0].inode_bitmap(), 4);
        assert_eq!(gds[0].inode_table(), 5);
        assert_eq!(gds[0].bg_free_blocks_count, 7);
        assert_eq!(gds[0].bg_free_inodes_count, 9);
        assert_eq!(gds[0].bg_used_dirs_count, 2);
        assert_eq!(gds[1].inode_table(), 8197);
    }

    #[test]
    fn short_table_is_an_error() {
        let table = raw_descriptor(3, 4, 5);
        let err = GroupDescriptor::parse_table(&table, 2, 2048).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ShortRead {
                offset: 2048,
                expected: 64
            }
        ));
    }
}
