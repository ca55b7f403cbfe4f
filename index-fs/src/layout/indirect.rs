//! 索引块与地址转换
//!
//! - 直接索引：描述符内的 [`DIRECT_COUNT`] 个扇区号，每个都指向一个数据块
//! - 一级索引：整个块连续存储扇区号，每个都指向一个数据块
//! - 二级索引：整个块连续存储扇区号，每个都指向一个一级索引块
//!
//! 一级索引块与二级索引块之下的各个块布局相同，都是 [`IndirectBlock`]。

use crate::{DataBlock, Error, Result, SECTOR_SIZE, SectorId};

use super::{set_word, word};

/// 索引块的编号容量
pub const INDIRECT_COUNT: usize = SECTOR_SIZE / 4;

/// 直接索引可编号数量，使描述符恰好占满一个扇区
pub const DIRECT_COUNT: usize = 123;
/// 用上一级索引时的编号容量
pub(crate) const INDIRECT_CAP: usize = DIRECT_COUNT + INDIRECT_COUNT;
/// 用上二级索引时的编号容量
const DOUBLE_INDIRECT_CAP: usize = INDIRECT_CAP + INDIRECT_COUNT * INDIRECT_COUNT;

/// 文件大小上限(字节)
pub const MAX_FILE_SIZE: usize = DOUBLE_INDIRECT_CAP * SECTOR_SIZE;

/// 索引块，整个块连续存储扇区号
pub type IndirectBlock = [SectorId; INDIRECT_COUNT];

/// 字节偏移所在数据块的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLocation {
    /// 描述符的直接索引
    Direct(usize),
    /// 一级索引块内的下标
    Indirect(usize),
    /// 二级索引块内的下标，及其所指一级索引块内的下标
    DoubleIndirect { outer: usize, inner: usize },
}

/// 计算字节偏移落在哪一级索引的哪个位置
pub fn locate(offset: usize) -> Result<BlockLocation> {
    let index = offset / SECTOR_SIZE;

    if index < DIRECT_COUNT {
        Ok(BlockLocation::Direct(index))
    } else if index < INDIRECT_CAP {
        // 剔去直接索引的部分
        Ok(BlockLocation::Indirect(index - DIRECT_COUNT))
    } else if index < DOUBLE_INDIRECT_CAP {
        // 剔去使用了一级索引的部分
        let index = index - INDIRECT_CAP;
        Ok(BlockLocation::DoubleIndirect {
            outer: index / INDIRECT_COUNT,
            inner: index % INDIRECT_COUNT,
        })
    } else {
        Err(Error::OutOfRange)
    }
}

/// 索引块内第 `index` 项
#[inline]
pub(crate) fn entry(block: &DataBlock, index: usize) -> SectorId {
    SectorId::new(word(block, index))
}

#[inline]
pub(crate) fn set_entry(block: &mut DataBlock, index: usize, sector: SectorId) {
    set_word(block, index, sector.into());
}

/// 解出整个索引块
pub(crate) fn decode(block: &DataBlock) -> IndirectBlock {
    core::array::from_fn(|index| entry(block, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers() {
        assert_eq!(locate(0), Ok(BlockLocation::Direct(0)));
        assert_eq!(locate(122 * 512 + 511), Ok(BlockLocation::Direct(122)));
        assert_eq!(locate(123 * 512), Ok(BlockLocation::Indirect(0)));
        assert_eq!(locate(250 * 512 + 1), Ok(BlockLocation::Indirect(127)));
        assert_eq!(
            locate(123 * 512 + 128 * 512),
            Ok(BlockLocation::DoubleIndirect { outer: 0, inner: 0 })
        );
        assert_eq!(
            locate((251 + 128 * 3 + 5) * 512),
            Ok(BlockLocation::DoubleIndirect { outer: 3, inner: 5 })
        );
        assert_eq!(
            locate(MAX_FILE_SIZE - 1),
            Ok(BlockLocation::DoubleIndirect {
                outer: 127,
                inner: 127
            })
        );
        assert_eq!(locate(MAX_FILE_SIZE), Err(Error::OutOfRange));
    }

    #[test]
    fn entries() {
        let mut block = [0u8; SECTOR_SIZE];
        set_entry(&mut block, 0, SectorId::new(7));
        set_entry(&mut block, 127, SectorId::new(0x0102_0304));

        assert_eq!(&block[..4], &[7, 0, 0, 0]);
        assert_eq!(&block[508..], &[4, 3, 2, 1]);
        let decoded = decode(&block);
        assert_eq!(decoded[127], SectorId::new(0x0102_0304));
        assert!(decoded[1..127].iter().all(|id| id.is_none()));
    }
}
