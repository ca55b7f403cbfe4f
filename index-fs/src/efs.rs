//! # 文件系统层
//!
//! 构建出卷的布局并使用：卷头、空闲位图，以及打开文件表。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use block_dev::BlockDevice;
use log::{debug, warn};
use spin::Mutex;

use crate::vfs::load_disk_inode;
use crate::{
    BufferCache, DiskInode, DiskInodeKind, Error, FreeMap, Inode, Result, SectorAllocator,
    SectorId, SuperBlock,
};

pub struct IndexFileSystem {
    cache: Arc<BufferCache>,
    allocator: Arc<dyn SectorAllocator>,
    /// 打开表，每个描述符扇区至多一个句柄
    open_inodes: Mutex<BTreeMap<SectorId, Arc<Inode>>>,
}

impl IndexFileSystem {
    /// 在设备的前 `total_sectors` 个扇区上建立新卷
    pub fn format(device: Arc<dyn BlockDevice>, total_sectors: u32) -> Result<Arc<Self>> {
        if total_sectors as usize > device.num_blocks() {
            warn!(
                "{total_sectors} sectors requested on a device of {} blocks",
                device.num_blocks()
            );
            return Err(Error::BadGeometry);
        }

        let cache = Arc::new(BufferCache::new(device));
        let super_block = SuperBlock::new(total_sectors);
        let free_map = FreeMap::format(cache.clone(), &super_block)?;
        cache.write(SectorId::NONE, &super_block.encode(), 0)?;
        cache.flush_all()?;
        debug!(
            "volume formatted: {total_sectors} sectors, {} bitmap sector(s)",
            super_block.bitmap_sectors
        );

        Ok(Self::with_allocator(cache, Arc::new(free_map)))
    }

    /// 打开设备上已有的卷
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Arc<Self>> {
        let cache = Arc::new(BufferCache::new(device));
        let super_block = cache.map(SectorId::NONE, SuperBlock::decode)?;
        if !super_block.is_valid() {
            warn!("no volume found on device");
            return Err(Error::CorruptVolume);
        }
        let free_map = FreeMap::open(cache.clone(), &super_block);

        Ok(Self::with_allocator(cache, Arc::new(free_map)))
    }

    /// 使用外部提供的分配器
    pub fn with_allocator(
        cache: Arc<BufferCache>,
        allocator: Arc<dyn SectorAllocator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            allocator,
            open_inodes: Mutex::new(BTreeMap::new()),
        })
    }

    #[inline]
    pub fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    /// 分配描述符扇区并创建文件，返回描述符扇区号。
    ///
    /// 失败时本次取得的扇区全部归还。
    pub fn create(&self, length: usize, kind: DiskInodeKind) -> Result<SectorId> {
        let sector = self.allocator.allocate(1)?;
        if let Err(e) = self.create_at(sector, length, kind) {
            if let Err(e) = self.allocator.release(sector, 1) {
                warn!("descriptor sector {sector} leaked: {e}");
            }
            return Err(e);
        }
        Ok(sector)
    }

    /// 在已分配的 `sector` 上写入新描述符，并预先分配 `length` 字节的存储。
    ///
    /// 预分配失败时描述符保持为空文件，本次取得的数据块与索引块全部归还。
    pub fn create_at(&self, sector: SectorId, length: usize, kind: DiskInodeKind) -> Result<()> {
        let mut disk_inode = DiskInode::new(kind);
        self.cache.write(sector, &disk_inode.encode(), 0)?;
        if length > 0 {
            disk_inode.expand_to(sector, length, &self.cache, &*self.allocator)?;
        }
        debug!("descriptor created at sector {sector}, {length} byte(s)");
        Ok(())
    }

    /// 打开描述符；已打开则累加打开计数并返回同一句柄
    pub fn open_inode(&self, sector: SectorId) -> Result<Arc<Inode>> {
        let mut open_inodes = self.open_inodes.lock();
        if let Some(inode) = open_inodes.get(&sector) {
            return Ok(inode.reopen());
        }

        load_disk_inode(&self.cache, sector)?;
        let inode = Arc::new(Inode::new(
            sector,
            self.cache.clone(),
            self.allocator.clone(),
        ));
        open_inodes.insert(sector, inode.clone());

        Ok(inode)
    }

    /// 关闭句柄；最后一次关闭时移出打开表，若已标记删除则释放全部存储
    pub fn close_inode(&self, inode: Arc<Inode>) -> Result<()> {
        let mut open_inodes = self.open_inodes.lock();
        if inode.drop_ref() > 0 {
            return Ok(());
        }
        let closed = open_inodes.remove(&inode.inumber());
        assert!(closed.is_some_and(|closed| Arc::ptr_eq(&closed, &inode)));
        drop(open_inodes);

        if inode.is_removed() {
            inode.release()?;
        }
        Ok(())
    }

    /// 当前打开的描述符个数
    pub fn open_count(&self) -> usize {
        self.open_inodes.lock().len()
    }

    /// 写回所有脏扇区
    pub fn flush_all(&self) -> Result<()> {
        self.cache.flush_all()
    }

    /// 关机：写回所有脏扇区并让设备落盘
    pub fn shutdown(&self) -> Result<()> {
        let open = self.open_count();
        if open > 0 {
            warn!("shutting down with {open} file(s) still open");
        }
        self.cache.flush_all()?;
        self.cache.device().flush()?;
        Ok(())
    }
}
