#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use block_dev::{BLOCK_SIZE, BlockDevice, Error, RamDisk};
use index_fs::{BufferCache, FreeMap, IndexFileSystem, SectorAllocator, SectorId, SuperBlock};

/// 统计读写次数的内存盘，可以随时让读写失败
#[derive(Debug)]
pub struct TestDisk {
    inner: RamDisk,
    reads: AtomicUsize,
    writes: AtomicUsize,
    broken: AtomicBool,
    /// 块号不小于它的读取失败
    bad_reads_from: AtomicUsize,
}

impl TestDisk {
    pub fn new(blocks: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: RamDisk::new(blocks),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
            bad_reads_from: AtomicUsize::new(usize::MAX),
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    /// 从 `block_id` 起的块都读不出来
    pub fn fail_reads_from(&self, block_id: usize) {
        self.bad_reads_from.store(block_id, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.set_broken(false);
        self.fail_reads_from(usize::MAX);
    }

    /// 绕过缓存直接读设备
    pub fn raw(&self, block_id: usize) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        self.inner.read_block(block_id, &mut buf).unwrap();
        buf
    }
}

impl BlockDevice for TestDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error> {
        if self.broken.load(Ordering::SeqCst)
            || block_id >= self.bad_reads_from.load(Ordering::SeqCst)
        {
            return Err(Error::Io { block_id });
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_block(block_id, buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Io { block_id });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_block(block_id, buf)
    }

    fn num_blocks(&self) -> usize {
        self.inner.num_blocks()
    }
}

/// 新建卷，同时返回位图分配器以便检查空闲扇区数
pub fn volume(total: u32) -> (Arc<TestDisk>, Arc<IndexFileSystem>, Arc<FreeMap>) {
    let disk = TestDisk::new(total as usize);
    let cache = Arc::new(BufferCache::new(disk.clone()));
    let super_block = SuperBlock::new(total);
    let free_map = Arc::new(FreeMap::format(cache.clone(), &super_block).unwrap());
    cache
        .write(SectorId::NONE, &super_block.encode(), 0)
        .unwrap();
    let fs = IndexFileSystem::with_allocator(cache, free_map.clone());
    (disk, fs, free_map)
}

/// 下一次分配会拿到的扇区
pub fn next_free(free_map: &FreeMap) -> SectorId {
    let sector = free_map.allocate(1).unwrap();
    free_map.release(sector, 1).unwrap();
    sector
}

/// 可辨认的填充数据
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
