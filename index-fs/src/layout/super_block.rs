use crate::{DataBlock, MAGIC, SECTOR_BITS, SECTOR_SIZE};

use super::{set_word, word};

/// 卷头，位于 0 号扇区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    magic: u32,
    /// 卷的总扇区数
    pub total_sectors: u32,
    /// 空闲位图占用的扇区数，位图紧跟在卷头之后
    pub bitmap_sectors: u32,
}

impl SuperBlock {
    pub fn new(total_sectors: u32) -> Self {
        Self {
            magic: MAGIC,
            total_sectors,
            bitmap_sectors: (total_sectors as usize).div_ceil(SECTOR_BITS) as u32,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn decode(block: &DataBlock) -> Self {
        Self {
            magic: word(block, 0),
            total_sectors: word(block, 1),
            bitmap_sectors: word(block, 2),
        }
    }

    pub fn encode(&self) -> DataBlock {
        let mut block = [0; SECTOR_SIZE];
        set_word(&mut block, 0, self.magic);
        set_word(&mut block, 1, self.total_sectors);
        set_word(&mut block, 2, self.bitmap_sectors);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry() {
        assert_eq!(SuperBlock::new(4096).bitmap_sectors, 1);
        assert_eq!(SuperBlock::new(4097).bitmap_sectors, 2);

        let sb = SuperBlock::new(16384);
        let decoded = SuperBlock::decode(&sb.encode());
        assert!(decoded.is_valid());
        assert_eq!(decoded, sb);
        assert!(!SuperBlock::decode(&[0; SECTOR_SIZE]).is_valid());
    }
}
