use exhume_extfrag::stats::Metric;
use exhume_extfrag::{DecodeError, ExtFS};
use std::io::Cursor;

const BLOCK_SIZE: usize = 1024;
const BLOCKS_COUNT: u32 = 120;
const BLOCKS_PER_GROUP: u32 = 64;
const INODES_COUNT: u32 = 32;
const INODES_PER_GROUP: u32 = 16;
const INODE_SIZE: usize = 128;

// Group 0 metadata: bitmaps in blocks 3 and 4, inode table in 5..7.
// Group 1 metadata: bitmaps in blocks 65 and 66, inode table in 67..69.
const GROUPS: [(u32, u32, u32); 2] = [(3, 4, 5), (65, 66, 67)];

struct ImageBuilder {
    data: Vec<u8>,
}

impl ImageBuilder {
    fn new() -> Self {
        let mut image = ImageBuilder {
            data: vec![0u8; BLOCKS_COUNT as usize * BLOCK_SIZE],
        };
        image.superblock();
        image.descriptors();
        image
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn superblock(&mut self) {
        let sb = 1024;
        self.put_u32(sb + 0x00, INODES_COUNT);
        self.put_u32(sb + 0x04, BLOCKS_COUNT);
        self.put_u32(sb + 0x14, 1);
        self.put_u32(sb + 0x18, 0);
        self.put_u32(sb + 0x20, BLOCKS_PER_GROUP);
        self.put_u32(sb + 0x24, BLOCKS_PER_GROUP);
        self.put_u32(sb + 0x28, INODES_PER_GROUP);
        self.put_u16(sb + 0x38, 0xEF53);
        self.put_u32(sb + 0x4C, 1);
        self.put_u32(sb + 0x54, 11);
        self.put_u16(sb + 0x58, INODE_SIZE as u16);
    }

    fn descriptors(&mut self) {
        for (group, (block_bitmap, inode_bitmap, inode_table)) in GROUPS.iter().enumerate() {
            let gd = 2 * BLOCK_SIZE + group * 32;
            self.put_u32(gd, *block_bitmap);
            self.put_u32(gd + 0x04, *inode_bitmap);
            self.put_u32(gd + 0x08, *inode_table);
        }
    }

    fn set_block_bits(&mut self, group: usize, bits: impl Iterator<Item = usize>) {
        let base = GROUPS[group].0 as usize * BLOCK_SIZE;
        for bit in bits {
            self.data[base + bit / 8] |= 1 << (bit % 8);
        }
    }

    fn set_inode_bits(&mut self, group: usize, bits: impl Iterator<Item = usize>) {
        let base = GROUPS[group].1 as usize * BLOCK_SIZE;
        for bit in bits {
            self.data[base + bit / 8] |= 1 << (bit % 8);
        }
    }

    fn inode(&mut self, group: usize, index: usize, mode: u16, size: u32, pointers: &[u32], sectors: u32) {
        let at = GROUPS[group].2 as usize * BLOCK_SIZE + index * INODE_SIZE;
        self.put_u16(at, mode);
        self.put_u32(at + 0x04, size);
        self.put_u16(at + 0x1A, 1);
        self.put_u32(at + 0x1C, sectors);
        for (i, ptr) in pointers.iter().enumerate() {
            self.put_u32(at + 0x28 + i * 4, *ptr);
        }
    }

    fn pointer_block(&mut self, block: usize, pointers: &[u32]) {
        for (i, ptr) in pointers.iter().enumerate() {
            self.put_u32(block * BLOCK_SIZE + i * 4, *ptr);
        }
    }

    /// Two groups: group 0 uses blocks 0..40, group 1 uses 10..30, so one free
    /// run crosses the group boundary. Group 1 only has 56 blocks; its padding
    /// bits are set and must be ignored.
    fn populated() -> Self {
        let mut image = ImageBuilder::new();
        image.set_block_bits(0, 0..40);
        image.set_block_bits(1, (10..30).chain(56..64));

        image.set_inode_bits(0, 0..13);
        image.set_inode_bits(1, [3, 12].into_iter());

        // Regular file, five contiguous blocks.
        image.inode(0, 11, 0x81A4, 5000, &[20, 21, 22, 23, 24], 10);

        // Regular file through a single indirect block with a hole.
        let mut pointers: Vec<u32> = (25..37).collect();
        pointers.push(37);
        image.inode(0, 12, 0x81A4, 14336, &pointers, 32);
        image.pointer_block(37, &[38, 39, 0, 100]);

        // Directory with two scattered blocks.
        image.inode(1, 12, 0x41ED, 2048, &[80, 82], 4);
        image
    }

    fn into_fs(self) -> ExtFS<Cursor<Vec<u8>>> {
        ExtFS::new(Cursor::new(self.data)).unwrap()
    }
}

#[test]
fn full_pass_statistics() {
    let mut fs = ImageBuilder::populated().into_fs();
    let analysis = fs.analyze().unwrap();
    let stats = &analysis.stats;

    assert_eq!(stats.used_blocks, 60);
    assert_eq!(stats.free_blocks, 60);
    assert_eq!(stats.used_blocks + stats.free_blocks, BLOCKS_COUNT as u64);
    assert_eq!(stats.free_segments, 2);

    assert_eq!(stats.used_inodes, 15);
    assert_eq!(stats.free_inodes, 17);

    let segments: Vec<(u64, u64)> = stats.inodes.iter().map(|e| (e.inode, e.segments)).collect();
    assert_eq!(segments, vec![(12, 1), (13, 3), (29, 2)]);
    assert_eq!(stats.used_segments, 6);
    assert!(stats.failures.is_empty());

    assert_eq!(stats.avg_free_extent(1024), Metric::Defined(30720.0));
    assert_eq!(stats.avg_used_extent(1024), Metric::Defined(10240.0));
    assert_eq!(stats.inode_fragmentation_ratio(), Metric::Defined(0.4));

    // Only the two regular files are sampled.
    assert_eq!(analysis.sizes.len(), 2);
    assert_eq!(analysis.sizes.fraction_below(4096), Metric::Defined(0.0));
    assert_eq!(analysis.sizes.fraction_below(8192), Metric::Defined(0.5));
    assert_eq!(analysis.sizes.fraction_below(16384), Metric::Defined(1.0));
}

#[test]
fn per_group_counts_cover_every_block() {
    let mut fs = ImageBuilder::populated().into_fs();
    let analysis = fs.analyze().unwrap();
    let groups = &analysis.stats.groups;

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].block_count, 64);
    assert_eq!(groups[1].block_count, 56);
    for group in groups {
        assert_eq!(group.used_blocks + group.free_blocks, group.block_count);
        assert_eq!(group.used_inodes + group.free_inodes, INODES_PER_GROUP as u64);
    }
    let total: u64 = groups.iter().map(|g| g.block_count).sum();
    assert_eq!(total, BLOCKS_COUNT as u64);
}

#[test]
fn indirect_list_keeps_encounter_order() {
    let mut fs = ImageBuilder::populated().into_fs();
    fs.load_group_descriptors().unwrap();
    let inode = fs.read_inode(5, 12, 13).unwrap();
    let blocks = fs.inode_blocks(&inode).unwrap();

    let mut expected: Vec<u64> = (25..37).collect();
    expected.extend([38, 39, 100]);
    assert_eq!(blocks, expected);
}

#[test]
fn damaged_inode_does_not_abort_the_pass() {
    let mut image = ImageBuilder::populated();
    image.set_inode_bits(1, [13].into_iter());
    let mut pointers = vec![90u32];
    pointers.resize(12, 0);
    pointers.push(5000);
    image.inode(1, 13, 0x81A4, 40000, &pointers, 80);

    let mut fs = image.into_fs();
    let analysis = fs.analyze().unwrap();
    let stats = &analysis.stats;

    assert_eq!(stats.failures.len(), 1);
    assert_eq!(stats.failures[0].inode, 30);
    assert!(stats.failures[0].error.contains("5000"));
    assert_eq!(stats.used_inodes, 16);
    assert_eq!(stats.used_segments, 6);
    assert_eq!(analysis.sizes.len(), 2);
}

#[test]
fn reserved_indices_are_skipped_in_every_group() {
    let mut image = ImageBuilder::populated();
    // Garbage in a reserved slot of group 1 must never be resolved.
    image.inode(1, 3, 0x81A4, 1, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9999], 1000);
    let mut fs = image.into_fs();
    let analysis = fs.analyze().unwrap();
    assert!(analysis.stats.failures.is_empty());
    assert!(analysis.stats.inodes.iter().all(|e| e.inode != 20));
}

#[test]
fn no_used_inodes_gives_undefined_ratio() {
    let mut fs = ImageBuilder::new().into_fs();
    let analysis = fs.analyze().unwrap();
    assert_eq!(analysis.stats.used_inodes, 0);
    assert_eq!(analysis.stats.inode_fragmentation_ratio(), Metric::Undefined);
    assert_eq!(analysis.stats.avg_used_extent(1024), Metric::Undefined);
    // Every block is free and the run spans both groups.
    assert_eq!(analysis.stats.free_segments, 1);
    assert!(analysis.sizes.is_empty());
}

#[test]
fn bad_magic_is_rejected() {
    let mut image = ImageBuilder::new();
    image.put_u16(1024 + 0x38, 0);
    let err = ExtFS::new(Cursor::new(image.data)).err().unwrap();
    assert!(matches!(err, DecodeError::BadMagic { actual: 0, .. }));
}

#[test]
fn truncated_image_is_a_short_read() {
    let err = ExtFS::new(Cursor::new(vec![0u8; 1500])).err().unwrap();
    assert!(matches!(
        err,
        DecodeError::ShortRead {
            offset: 1024,
            expected: 1024
        }
    ));
}

#[test]
fn partition_offset_shifts_every_read() {
    let image = ImageBuilder::populated();
    let mut disk = vec![0u8; 4096];
    disk.extend_from_slice(&image.data);
    let mut fs = ExtFS::with_offset(Cursor::new(disk), 4096).unwrap();
    let analysis = fs.analyze().unwrap();
    assert_eq!(analysis.stats.free_segments, 2);
    assert_eq!(analysis.stats.used_segments, 6);
}

#[test]
fn oversized_descriptor_table_is_a_short_read() {
    // One block per group over 2^32 - 1 blocks asks for a 128 GiB table.
    let mut image = ImageBuilder::new();
    image.put_u32(1024 + 0x04, 0xFFFF_FFFF);
    image.put_u32(1024 + 0x20, 1);
    let mut fs = image.into_fs();
    assert_eq!(fs.superblock.group_count(), 0xFFFF_FFFF);
    let err = fs.analyze().err().unwrap();
    assert!(matches!(err, DecodeError::ShortRead { offset: 2048, .. }));
}

#[test]
fn partition_offset_overflow_is_an_error() {
    let image = ImageBuilder::populated();
    let err = ExtFS::with_offset(Cursor::new(image.data), u64::MAX)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        DecodeError::OffsetOverflow {
            base: u64::MAX,
            offset: 1024
        }
    ));
}

#[test]
fn inode_bitmap_read_spans_volume_inode_count() {
    // 8200 inodes make each inode bitmap read 1025 bytes, one byte into
    // the block after the bitmap. Only the first 16 bits are observed.
    let mut image = ImageBuilder::populated();
    image.put_u32(1024, 8200);
    let mut fs = image.into_fs();
    let analysis = fs.analyze().unwrap();
    assert_eq!(analysis.stats.used_inodes, 15);
    assert_eq!(analysis.stats.free_inodes, 17);
    assert_eq!(analysis.stats.used_segments, 6);
    assert_eq!(analysis.stats.free_segments, 2);
}

#[test]
fn inode_bitmap_read_past_image_end_is_a_short_read() {
    // Group 1's inode bitmap sits at block 66; 54 blocks remain after it.
    let remaining = (BLOCKS_COUNT as usize - 66) * BLOCK_SIZE;
    let mut image = ImageBuilder::populated();
    image.put_u32(1024, (remaining as u32 + 1) * 8);
    let mut fs = image.into_fs();
    let err = fs.analyze().err().unwrap();
    assert!(matches!(
        err,
        DecodeError::ShortRead { offset, expected }
            if offset == 66 * BLOCK_SIZE as u64 && expected == remaining + 1
    ));
}
