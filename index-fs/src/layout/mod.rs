//! # 磁盘数据结构层
//!
//! 卷的布局：
//!
//! 卷头(0) | 空闲位图(1..=n) | 描述符、索引块与数据块混合分配
//!
//! 所有磁盘结构都恰好占满一个扇区，字段一律按小端 `u32` 存放。

mod indirect;
mod inode;
mod super_block;

pub use self::{
    indirect::{BlockLocation, DIRECT_COUNT, INDIRECT_COUNT, IndirectBlock, MAX_FILE_SIZE, locate},
    inode::{DiskInode, DiskInodeKind},
    super_block::SuperBlock,
};

use crate::DataBlock;

/// 读出块内第 `index` 个字
#[inline]
fn word(block: &DataBlock, index: usize) -> u32 {
    let start = index * 4;
    u32::from_le_bytes([
        block[start],
        block[start + 1],
        block[start + 2],
        block[start + 3],
    ])
}

/// 写入块内第 `index` 个字
#[inline]
fn set_word(block: &mut DataBlock, index: usize, value: u32) {
    let start = index * 4;
    block[start..start + 4].copy_from_slice(&value.to_le_bytes());
}
