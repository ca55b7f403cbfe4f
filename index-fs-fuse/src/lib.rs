
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard};

use block_dev::{BLOCK_SIZE, BlockDevice, Error};

/// 以宿主机上的镜像文件模拟的块设备
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    blocks: usize,
}

impl BlockFile {
    /// 块数取自文件长度，不足一块的尾部忽略
    pub fn new(file: File) -> io::Result<Self> {
        let blocks = file.metadata()?.len() as usize / BLOCK_SIZE;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    fn seek_to(&self, block_id: usize, len: usize) -> Result<MutexGuard<'_, File>, Error> {
        if block_id >= self.blocks {
            return Err(Error::OutOfBounds { block_id });
        }
        if len != BLOCK_SIZE {
            return Err(Error::BadBuffer { len });
        }

        let mut file = self.file.lock().map_err(|_| Error::Io { block_id })?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .map_err(|_| Error::Io { block_id })?;
        Ok(file)
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error> {
        self.seek_to(block_id, buf.len())?
            .read_exact(buf)
            .map_err(|_| Error::Io { block_id })
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error> {
        self.seek_to(block_id, buf.len())?
            .write_all(buf)
            .map_err(|_| Error::Io { block_id })
    }

    fn num_blocks(&self) -> usize {
        self.blocks
    }

    fn flush(&self) -> Result<(), Error> {
        let file = self.file.lock().map_err(|_| Error::Flush)?;
        file.sync_all().map_err(|_| Error::Flush)
    }
}

/// 把引擎错误转成宿主机的 I/O 错误
pub fn io_error(e: index_fs::Error) -> io::Error {
    io::Error::other(e.to_string())
}
