use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{BLOCK_SIZE, BlockDevice, Error};

/// 以内存模拟的块设备
#[derive(Debug)]
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    blocks: usize,
}

impl RamDisk {
    pub fn new(blocks: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; blocks * BLOCK_SIZE]),
            blocks,
        }
    }

    /// 以现成的镜像构造，镜像长度向下取整到块
    pub fn from_image(mut image: Vec<u8>) -> Self {
        let blocks = image.len() / BLOCK_SIZE;
        image.truncate(blocks * BLOCK_SIZE);
        Self {
            data: Mutex::new(image),
            blocks,
        }
    }

    /// 导出整个镜像
    pub fn image(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn check(&self, block_id: usize, len: usize) -> Result<usize, Error> {
        if block_id >= self.blocks {
            return Err(Error::OutOfBounds { block_id });
        }
        if len != BLOCK_SIZE {
            return Err(Error::BadBuffer { len });
        }
        Ok(block_id * BLOCK_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error> {
        let start = self.check(block_id, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error> {
        let start = self.check(block_id, buf.len())?;
        self.data.lock()[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.blocks
    }
}
