#![no_std]

extern crate alloc;

/* index-fs 的整体架构，自上而下 */

// 文件系统层：卷的格式化、描述符的创建与打开表
mod efs;

// 索引节点层：打开的文件句柄，负责文件读写与增长
mod vfs;

// 空闲扇区管理：位图分配器
mod free_map;

// 磁盘数据结构层：描述符、索引块与卷头的布局
mod layout;

// 块缓存层：内存上的扇区缓存，CLOCK 置换
mod block_cache;

mod error;
mod sector;

pub use block_dev::BlockDevice;

pub use self::{
    block_cache::BufferCache,
    efs::IndexFileSystem,
    error::{Error, Result},
    free_map::{FreeMap, SectorAllocator},
    layout::{
        BlockLocation, DIRECT_COUNT, DiskInode, DiskInodeKind, INDIRECT_COUNT, IndirectBlock,
        MAX_FILE_SIZE, SuperBlock, locate,
    },
    sector::SectorId,
    vfs::{Inode, Stat, StatKind},
};

/// 卷头魔数
pub const MAGIC: u32 = 0x4958_4653;
/// 描述符魔数
pub const INODE_MAGIC: u32 = 0x494e_4f44;
pub const SECTOR_SIZE: usize = block_dev::BLOCK_SIZE;
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;
/// 缓存槽位数，固定不变
pub const CACHE_CAPACITY: usize = 64;

pub type DataBlock = [u8; SECTOR_SIZE];
