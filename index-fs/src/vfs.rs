//! # 索引节点层
//!
//! [`Inode`] 是打开的文件句柄，由 [`IndexFileSystem`](crate::IndexFileSystem)
//! 的打开表按描述符扇区去重；同一文件被多次打开时共享同一个句柄并累加打开计数。
//!
//! 描述符本身不在句柄里缓存，每次操作都经由块缓存重新读取并校验魔数。

use alloc::sync::Arc;

use enumflags2::bitflags;
use log::{debug, warn};
use spin::Mutex;

use crate::free_map::SectorAllocator;
use crate::{
    BufferCache, DiskInode, DiskInodeKind, Error, MAX_FILE_SIZE, Result, SECTOR_SIZE, SectorId,
};

pub struct Inode {
    /// 描述符所在扇区，同时是句柄的身份
    sector: SectorId,
    state: Mutex<InodeState>,
    /// 增长锁：串行化长度扩展与扇区分配
    extend_lock: Mutex<()>,
    cache: Arc<BufferCache>,
    allocator: Arc<dyn SectorAllocator>,
}

#[derive(Debug, Default)]
struct InodeState {
    open_count: u32,
    /// 最后一次关闭时释放存储
    removed: bool,
    /// 大于 0 时禁止写入
    deny_write_count: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// 描述符扇区号
    pub inode: u64,
    pub kind: StatKind,
    /// 文件长度
    pub size: u64,
    /// 占用的数据块与索引块数
    pub blocks: u64,
    /// 块大小
    pub block_size: u64,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
}

impl Inode {
    pub(crate) fn new(
        sector: SectorId,
        cache: Arc<BufferCache>,
        allocator: Arc<dyn SectorAllocator>,
    ) -> Self {
        Self {
            sector,
            state: Mutex::new(InodeState {
                open_count: 1,
                ..Default::default()
            }),
            extend_lock: Mutex::new(()),
            cache,
            allocator,
        }
    }

    /// 描述符扇区号
    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.sector
    }

    /// 再打开一次，返回同一句柄
    pub fn reopen(self: &Arc<Self>) -> Arc<Self> {
        self.state.lock().open_count += 1;
        Arc::clone(self)
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    pub fn length(&self) -> Result<usize> {
        Ok(self.disk_inode()?.length as usize)
    }

    pub fn is_dir(&self) -> Result<bool> {
        Ok(self.disk_inode()?.is_dir())
    }

    /// 标记删除，存储在最后一次关闭时释放
    pub fn mark_deleted(&self) {
        self.state.lock().removed = true;
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// 禁止写入，每个打开者至多调用一次
    pub fn deny_write(&self) {
        let mut state = self.state.lock();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// 解除 [`Inode::deny_write`]，须在关闭前调用
    pub fn allow_write(&self) {
        let mut state = self.state.lock();
        assert!(state.deny_write_count > 0);
        state.deny_write_count -= 1;
    }

    /// 从 `offset` 处读出数据填充 `buf`，读到文件末尾为止
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.disk_inode()?.read_at(offset, buf, &self.cache)
    }

    /// 把 `buf` 写到 `offset` 处，必要时先增长文件。
    ///
    /// 会增长文件的写入在增长锁内完成“扩展-写入”全过程；
    /// 不增长文件的写入只在读取描述符时持锁。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        if self.state.lock().deny_write_count > 0 {
            return Err(Error::WriteDenied);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(Error::OutOfRange)?;

        let extend_guard = self.extend_lock.lock();
        let mut disk_inode = self.disk_inode()?;

        if end > disk_inode.length as usize {
            disk_inode.expand_to(self.sector, end, &self.cache, &*self.allocator)?;
            return disk_inode.write_at(offset, buf, &self.cache);
        }

        drop(extend_guard);
        disk_inode.write_at(offset, buf, &self.cache)
    }

    pub fn stat(&self) -> Result<Stat> {
        let disk_inode = self.disk_inode()?;
        let size = disk_inode.length as usize;
        Ok(Stat {
            inode: u32::from(self.sector) as u64,
            kind: disk_inode.kind.into(),
            size: size as u64,
            blocks: DiskInode::count_total_sectors(size) as u64,
            block_size: SECTOR_SIZE as u64,
        })
    }

    /// 读取并校验描述符
    pub fn disk_inode(&self) -> Result<DiskInode> {
        load_disk_inode(&self.cache, self.sector)
    }
}

impl Inode {
    /// 减少打开计数，返回剩余计数
    pub(crate) fn drop_ref(&self) -> u32 {
        let mut state = self.state.lock();
        assert!(state.open_count > 0);
        state.open_count -= 1;
        assert!(state.deny_write_count <= state.open_count);
        state.open_count
    }

    /// 释放数据块、索引块以及描述符自身
    pub(crate) fn release(&self) -> Result<()> {
        let disk_inode = self.disk_inode()?;
        disk_inode.release_all(&self.cache, &*self.allocator)?;
        self.allocator.release(self.sector, 1)?;
        debug!(
            "descriptor at sector {} deleted, {} byte(s) released",
            self.sector, disk_inode.length
        );
        Ok(())
    }
}

pub(crate) fn load_disk_inode(cache: &BufferCache, sector: SectorId) -> Result<DiskInode> {
    let disk_inode = cache.map(sector, DiskInode::decode)?;
    if !disk_inode.is_valid() {
        warn!("corrupt descriptor at sector {sector}");
        return Err(Error::CorruptDescriptor);
    }
    Ok(disk_inode)
}

impl From<DiskInodeKind> for StatKind {
    #[inline]
    fn from(kind: DiskInodeKind) -> Self {
        match kind {
            DiskInodeKind::Directory => Self::DIR,
            DiskInodeKind::File => Self::FILE,
        }
    }
}
