use crate::error::DecodeError;
use crate::inode::{Inode, EXT3_DIND_BLOCK, EXT3_IND_BLOCK, EXT3_NDIR_BLOCKS, EXT3_TIND_BLOCK};

/// Anything that can hand back the contents of an indirect block as
/// little-endian 32-bit block pointers.
pub trait PointerSource {
    fn read_pointers(&mut self, block_num: u64) -> Result<Vec<u32>, DecodeError>;
}

/// Recursively collect the block numbers from an indirect node at the given level.
/// level=1 => singly-indirect, level=2 => doubly-indirect, level=3 => triply-indirect.
///
/// Zero pointers are holes and are never followed.
fn collect_indirect_blocks<S: PointerSource>(
    source: &mut S,
    block_num: u64,
    level: u32,
    results: &mut Vec<u64>,
) -> Result<(), DecodeError> {
    let pointers = source.read_pointers(block_num)?;
    for &blk in pointers.iter().filter(|&&blk| blk != 0) {
        if level == 1 {
            results.push(blk as u64);
        } else {
            collect_indirect_blocks(source, blk as u64, level - 1, results)?;
        }
    }
    Ok(())
}

/// Rebuilds the data block list of `inode` in encounter order: the direct
/// pointers, then the single, double and triple indirect trees.
///
/// Each tree is only walked when the sector count in `i_blocks` says the
/// file reaches past the capacity of the previous ones. That count includes
/// the indirect blocks themselves, so the thresholds are approximate.
pub fn resolve_blocks<S: PointerSource>(
    source: &mut S,
    inode: &Inode,
    block_size: u64,
) -> Result<Vec<u64>, DecodeError> {
    let declared = inode.declared_blocks(block_size);
    let per_block = block_size / 4;

    let mut blocks: Vec<u64> = inode
        .direct_pointers()
        .iter()
        .filter(|&&blk| blk != 0)
        .map(|&blk| blk as u64)
        .collect();

    let direct = EXT3_NDIR_BLOCKS as u64;
    let trees = [
        (EXT3_IND_BLOCK, 1, direct),
        (EXT3_DIND_BLOCK, 2, direct + per_block),
        (EXT3_TIND_BLOCK, 3, direct + per_block + per_block * per_block),
    ];
    for (slot, level, threshold) in trees {
        if declared <= threshold {
            break;
        }
        let root = inode.block_pointers()[slot];
        if root != 0 {
            collect_indirect_blocks(source, root as u64, level, &mut blocks)?;
        }
    }
    Ok(blocks)
}
