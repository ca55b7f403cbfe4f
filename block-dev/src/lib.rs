//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 每次调用只读写一个块，且视为原子操作。

#![no_std]

extern crate alloc;

mod ram_disk;

use core::any::Any;
use core::fmt;

pub use self::ram_disk::RamDisk;

/// 块大小，与扇区大小一致
pub const BLOCK_SIZE: usize = 512;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any + fmt::Debug {
    /// 读出一整块，`buf` 的长度必须为 [`BLOCK_SIZE`]
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error>;

    /// 写入一整块，`buf` 的长度必须为 [`BLOCK_SIZE`]
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error>;

    /// 设备的总块数
    fn num_blocks(&self) -> usize;

    /// 把设备自身的缓冲落盘，没有缓冲的设备无需实现
    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 块号超出设备容量
    OutOfBounds { block_id: usize },
    /// 缓冲区长度不是一个块
    BadBuffer { len: usize },
    /// 底层读写失败
    Io { block_id: usize },
    /// 设备缓冲落盘失败
    Flush,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { block_id } => write!(f, "block {block_id} is out of bounds"),
            Self::BadBuffer { len } => write!(f, "buffer of {len} bytes is not a block"),
            Self::Io { block_id } => write!(f, "I/O failure on block {block_id}"),
            Self::Flush => f.write_str("failed to flush device"),
        }
    }
}
