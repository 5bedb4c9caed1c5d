use std::io::{ErrorKind, Read, Seek, SeekFrom};

pub mod bitmap;
pub mod error;
pub mod groupdescriptor;
pub mod inode;
pub mod report;
pub mod resolver;
pub mod sizedist;
pub mod stats;
pub mod superblock;

use bitmap::Bitmap;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use serde::Serialize;

pub use error::DecodeError;
use groupdescriptor::{GroupDescriptor, GROUP_DESCRIPTOR_SIZE};
use inode::Inode;
use resolver::{resolve_blocks, PointerSource};
use sizedist::SizeDistribution;
use stats::{count_segments, FragmentationStats, GroupSummary, InodeSegments};
use superblock::{Superblock, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};

/// Seek to `base + offset` and read exactly `len` bytes.
fn read_exact_at<R: Read + Seek>(
    body: &mut R,
    base: u64,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, DecodeError> {
    let decode_error = |source: std::io::Error| {
        if source.kind() == ErrorKind::UnexpectedEof {
            DecodeError::ShortRead {
                offset,
                expected: len,
            }
        } else {
            DecodeError::Io { offset, source }
        }
    };
    let absolute = base
        .checked_add(offset)
        .ok_or(DecodeError::OffsetOverflow { base, offset })?;
    body.seek(SeekFrom::Start(absolute)).map_err(decode_error)?;
    let mut buf = vec![0u8; len];
    body.read_exact(&mut buf).map_err(decode_error)?;
    Ok(buf)
}

/// Everything one pass over the volume produced.
#[derive(Debug, Serialize)]
pub struct Analysis {
    pub block_size: u64,
    pub stats: FragmentationStats,
    pub sizes: SizeDistribution,
}

/// Struct representing an ext2/ext3 filesystem image.
pub struct ExtFS<T: Read + Seek> {
    pub superblock: Superblock,
    body: T,
    /// Total length of `body` in bytes, partition offset included.
    body_len: u64,
    partition_offset: u64,
    group_descriptors: Option<Vec<GroupDescriptor>>,
}

impl<T: Read + Seek> ExtFS<T> {
    /// Create a new ExtFS instance given any type that implements `Read` and `Seek`.
    pub fn new(body: T) -> Result<Self, DecodeError> {
        Self::with_offset(body, 0)
    }

    /// Same as [`ExtFS::new`] for a filesystem starting `partition_offset`
    /// bytes into `body`. Every offset reported in errors is relative to it.
    pub fn with_offset(mut body: T, partition_offset: u64) -> Result<Self, DecodeError> {
        let body_len = body
            .seek(SeekFrom::End(0))
            .map_err(|source| DecodeError::Io { offset: 0, source })?;
        let sb_buf = read_exact_at(&mut body, partition_offset, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)?;
        let superblock = Superblock::from_bytes(&sb_buf)?;
        info!(
            "Superblock: {} blocks of {} bytes, {} groups, {} inodes",
            superblock.blocks_count(),
            superblock.block_size(),
            superblock.group_count(),
            superblock.s_inodes_count
        );
        Ok(ExtFS {
            superblock,
            body,
            body_len,
            partition_offset,
            group_descriptors: None,
        })
    }

    /// Reads `len` bytes at `offset`, refusing before allocating when the
    /// image is too short to hold them.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, DecodeError> {
        let end = self
            .partition_offset
            .checked_add(offset)
            .and_then(|start| start.checked_add(len as u64));
        match end {
            Some(end) if end <= self.body_len => {}
            Some(_) => {
                return Err(DecodeError::ShortRead {
                    offset,
                    expected: len,
                })
            }
            None => {
                return Err(DecodeError::OffsetOverflow {
                    base: self.partition_offset,
                    offset,
                })
            }
        }
        read_exact_at(&mut self.body, self.partition_offset, offset, len)
    }

    /// Load all of the group descriptors into the ExtFS struct.
    pub fn load_group_descriptors(&mut self) -> Result<(), DecodeError> {
        let count = self.superblock.group_count() as usize;
        let offset = self.superblock.group_descriptor_offset();
        let len = count.checked_mul(GROUP_DESCRIPTOR_SIZE).ok_or_else(|| {
            DecodeError::InvalidGeometry(format!("{} group descriptors do not fit in memory", count))
        })?;
        let buffer = self.read_at(offset, len)?;
        let group_descs = GroupDescriptor::parse_table(&buffer, count, offset)?;
        debug!("Loaded {} group descriptors at 0x{:x}", count, offset);
        self.group_descriptors = Some(group_descs);
        Ok(())
    }

    /// Retrieve the loaded group descriptors, if any.
    pub fn get_bg_descriptors(&self) -> Option<&[GroupDescriptor]> {
        self.group_descriptors.as_deref()
    }

    /// Helper to read one filesystem block into a Vec.
    fn read_block(&mut self, block_num: u64) -> Result<Vec<u8>, DecodeError> {
        let blocks_count = self.superblock.blocks_count();
        if block_num >= blocks_count {
            return Err(DecodeError::BlockOutOfRange {
                block: block_num,
                blocks_count,
            });
        }
        let block_size = self.superblock.block_size();
        self.read_at(block_num * block_size, block_size as usize)
    }

    /// Read the inode at zero-based `index` of the inode table starting at
    /// block `inode_table`.
    pub fn read_inode(
        &mut self,
        inode_table: u64,
        index: usize,
        inode_num: u64,
    ) -> Result<Inode, DecodeError> {
        let isz = self.superblock.inode_size();
        let offset = inode_table * self.superblock.block_size() + (index * isz) as u64;
        let buf = self.read_at(offset, isz)?;
        Inode::from_bytes(inode_num, &buf, offset)
    }

    /// Data blocks of `inode` in the order the pointer trees list them.
    pub fn inode_blocks(&mut self, inode: &Inode) -> Result<Vec<u64>, DecodeError> {
        let block_size = self.superblock.block_size();
        resolve_blocks(self, inode, block_size)
    }

    /// Walk every group in ascending order and every allocated, non-reserved
    /// inode within it, collecting allocation and fragmentation statistics.
    ///
    /// Errors on the superblock, descriptors or bitmaps abort the pass. A
    /// single unreadable inode is recorded in the stats and skipped.
    pub fn analyze(&mut self) -> Result<Analysis, DecodeError> {
        if self.group_descriptors.is_none() {
            self.load_group_descriptors()?;
        }
        let descriptors = self.group_descriptors.clone().unwrap_or_default();

        let mut stats = FragmentationStats::default();
        let mut sizes = SizeDistribution::default();
        for (group, gd) in descriptors.iter().enumerate() {
            self.scan_group(group as u64, gd, &mut stats, &mut sizes)?;
        }

        info!(
            "Scanned {} groups: {} free segments, {} used segments, {} inode failures",
            descriptors.len(),
            stats.free_segments,
            stats.used_segments,
            stats.failures.len()
        );
        Ok(Analysis {
            block_size: self.superblock.block_size(),
            stats,
            sizes,
        })
    }

    fn scan_group(
        &mut self,
        group: u64,
        gd: &GroupDescriptor,
        stats: &mut FragmentationStats,
        sizes: &mut SizeDistribution,
    ) -> Result<(), DecodeError> {
        let block_size = self.superblock.block_size();
        let block_count = self.superblock.blocks_in_group(group);
        let inodes_per_group = self.superblock.inodes_per_group();

        let raw = self.read_at(
            gd.block_bitmap() * block_size,
            self.superblock.block_bitmap_len(),
        )?;
        let block_bitmap = Bitmap::new(&raw, block_count as usize)?;
        let used_blocks = stats.record_block_bitmap(&block_bitmap);

        let raw = self.read_at(
            gd.inode_bitmap() * block_size,
            self.superblock.inode_bitmap_len(),
        )?;
        let inode_bitmap = Bitmap::new(&raw, inodes_per_group)?;
        let used_inodes = stats.record_inode_bitmap(&inode_bitmap);

        let summary = GroupSummary {
            group,
            block_count,
            used_blocks,
            free_blocks: block_count - used_blocks,
            used_inodes,
            free_inodes: inodes_per_group as u64 - used_inodes,
        };
        debug!("Group {}: {:?}", group, summary);
        if summary.free_blocks != gd.bg_free_blocks_count as u64 {
            warn!(
                "Group {}: block bitmap has {} free blocks, descriptor says {}",
                group, summary.free_blocks, gd.bg_free_blocks_count
            );
        }
        if summary.free_inodes != gd.bg_free_inodes_count as u64 {
            warn!(
                "Group {}: inode bitmap has {} free inodes, descriptor says {}",
                group, summary.free_inodes, gd.bg_free_inodes_count
            );
        }
        stats.record_group(summary);

        let large_files = self.superblock.has_large_files();
        let first_ino = self.superblock.first_ino();
        // In-group indices below s_first_ino are reserved in every group.
        for index in inode_bitmap.used_indices().skip_while(|&i| i < first_ino) {
            let inode_num = group * inodes_per_group as u64 + index as u64 + 1;
            let resolved = self
                .read_inode(gd.inode_table(), index, inode_num)
                .and_then(|inode| self.inode_blocks(&inode).map(|blocks| (inode, blocks)));
            match resolved {
                Ok((inode, blocks)) => {
                    let size = inode.size(large_files);
                    if inode.is_regular_file() {
                        sizes.record(size);
                    }
                    stats.record_inode(InodeSegments {
                        inode: inode_num,
                        mode: inode.mode(),
                        size,
                        blocks: blocks.len(),
                        segments: count_segments(&blocks),
                    });
                }
                Err(err) => {
                    warn!("Inode {}: {}", inode_num, err);
                    stats.record_failure(inode_num, &err);
                }
            }
        }
        Ok(())
    }
}

impl<T: Read + Seek> PointerSource for ExtFS<T> {
    /// Read a block of 4-byte little-endian pointers from an indirect block.
    fn read_pointers(&mut self, block_num: u64) -> Result<Vec<u32>, DecodeError> {
        let block_data = self.read_block(block_num)?;
        let mut pointers = vec![0u32; block_data.len() / 4];
        LittleEndian::read_u32_into(&block_data, &mut pointers);
        Ok(pointers)
    }
}
