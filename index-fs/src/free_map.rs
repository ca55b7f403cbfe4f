//! 空闲扇区管理
//!
//! [`SectorAllocator`] 是描述符层所依赖的分配器接口；
//! [`FreeMap`] 是它的位图实现，位图本身也存放在卷上，经由块缓存读写。

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{trace, warn};
use spin::Mutex;

use crate::{BufferCache, Error, Result, SECTOR_BITS, SECTOR_SIZE, SectorId, SuperBlock};

/// 扇区分配器
pub trait SectorAllocator: Send + Sync {
    /// 分配 `count` 个连续扇区，返回首个扇区号
    fn allocate(&self, count: usize) -> Result<SectorId>;

    /// 归还从 `sector` 起的 `count` 个扇区
    fn release(&self, sector: SectorId, count: usize) -> Result<()>;
}

/// 位图区域，一位对应卷上的一个扇区
pub struct FreeMap {
    cache: Arc<BufferCache>,
    /// 位图的起始扇区
    start: SectorId,
    /// 位图占用扇区数
    sectors: usize,
    /// 位图所指示的总扇区数
    total: usize,
    /// 查找与置位须是原子的
    lock: Mutex<()>,
}

impl FreeMap {
    /// 在卷上建立全空的位图，卷头与位图自身所在扇区标记为已用
    pub fn format(cache: Arc<BufferCache>, super_block: &SuperBlock) -> Result<Self> {
        // 至少要剩下一个可分配的扇区
        if super_block.total_sectors <= 1 + super_block.bitmap_sectors {
            return Err(Error::BadGeometry);
        }
        let free_map = Self::open(cache, super_block);
        for i in 0..free_map.sectors as u32 {
            free_map.cache.write(free_map.start + i, &[0; SECTOR_SIZE], 0)?;
        }
        free_map.mark(0, 1 + free_map.sectors, true)?;

        Ok(free_map)
    }

    pub fn open(cache: Arc<BufferCache>, super_block: &SuperBlock) -> Self {
        Self {
            cache,
            start: SectorId::new(1),
            sectors: super_block.bitmap_sectors as usize,
            total: super_block.total_sectors as usize,
            lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.total
    }

    /// 空闲扇区数
    pub fn free_count(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        let mut free = 0;
        for block_index in 0..self.sectors {
            let bits = self.bits_in(block_index);
            free += self.cache.map(self.start + block_index as u32, |bitmap| {
                (0..bits).filter(|&bit| !is_set(bitmap, bit)).count()
            })?;
        }
        Ok(free)
    }

    pub fn is_used(&self, sector: SectorId) -> Result<bool> {
        let id = sector.block();
        assert!(id < self.total);
        self.cache
            .map(self.start + (id / SECTOR_BITS) as u32, |bitmap| {
                is_set(bitmap, id % SECTOR_BITS)
            })
    }
}

impl FreeMap {
    /// 第 `block_index` 个位图块里有效的位数
    #[inline]
    fn bits_in(&self, block_index: usize) -> usize {
        (self.total - block_index * SECTOR_BITS).min(SECTOR_BITS)
    }

    /// 把 `[start, start + count)` 标记为已用或空闲。
    ///
    /// 分配的扇区一定空闲，归还的扇区一定已分配。
    fn mark(&self, start: usize, count: usize, used: bool) -> Result<()> {
        assert!(start + count <= self.total);
        for id in start..start + count {
            let bit = id % SECTOR_BITS;
            self.cache
                .map_mut(self.start + (id / SECTOR_BITS) as u32, |bitmap| {
                    assert_ne!(is_set(bitmap, bit), used, "sector {id} flipped twice");
                    bitmap[bit / 8] ^= 1 << (bit % 8);
                })?;
        }
        Ok(())
    }
}

impl SectorAllocator for FreeMap {
    /// 首次适配：找到第一段足够长的空闲位
    fn allocate(&self, count: usize) -> Result<SectorId> {
        assert!(count > 0);
        let _guard = self.lock.lock();

        let mut run_start = 0;
        let mut run_len = 0;
        for block_index in 0..self.sectors {
            let base = block_index * SECTOR_BITS;
            let bits = self.bits_in(block_index);

            let found = self.cache.map(self.start + block_index as u32, |bitmap| {
                for bit in 0..bits {
                    if is_set(bitmap, bit) {
                        run_len = 0;
                        continue;
                    }
                    if run_len == 0 {
                        run_start = base + bit;
                    }
                    run_len += 1;
                    if run_len == count {
                        return true;
                    }
                }
                false
            })?;

            if found {
                self.mark(run_start, count, true)?;
                trace!("allocated {count} sector(s) at {run_start}");
                return Ok(SectorId::new(run_start as u32));
            }
        }

        warn!("free map exhausted, {count} sector(s) requested");
        Err(Error::AllocationExhausted)
    }

    fn release(&self, sector: SectorId, count: usize) -> Result<()> {
        let _guard = self.lock.lock();
        self.mark(sector.block(), count, false)?;
        trace!("released {count} sector(s) at {sector}");
        Ok(())
    }
}

#[inline]
fn is_set(bitmap: &[u8], bit: usize) -> bool {
    bitmap[bit / 8] & (1 << (bit % 8)) != 0
}

/// 预先从分配器取出的一批扇区。
///
/// 文件增长前先一次性拿齐所需扇区，拿不齐就全部归还。
pub(crate) struct Reservation<'a> {
    backing: &'a dyn SectorAllocator,
    /// 逆序存放，从尾部取出即按分配顺序
    sectors: Mutex<Vec<SectorId>>,
    /// 已经交出去的扇区
    taken: Mutex<Vec<SectorId>>,
}

impl<'a> Reservation<'a> {
    pub fn take(backing: &'a dyn SectorAllocator, count: usize) -> Result<Self> {
        let mut sectors = Vec::with_capacity(count);
        for _ in 0..count {
            match backing.allocate(1) {
                Ok(sector) => sectors.push(sector),
                Err(e) => {
                    release_each(backing, sectors);
                    return Err(e);
                }
            }
        }
        sectors.reverse();

        Ok(Self {
            backing,
            sectors: Mutex::new(sectors),
            taken: Mutex::new(Vec::with_capacity(count)),
        })
    }

    /// 增长成功：归还没有用掉的扇区
    pub fn finish(self) {
        release_each(self.backing, self.sectors.into_inner());
    }

    /// 增长失败：连同已经交出去的扇区一并归还。
    ///
    /// 调用者须保证已交出的扇区不再被任何索引项引用。
    pub fn abort(self) {
        let Self {
            backing,
            sectors,
            taken,
        } = self;
        let mut sectors = sectors.into_inner();
        sectors.extend(taken.into_inner());
        release_each(backing, sectors);
    }
}

impl SectorAllocator for Reservation<'_> {
    fn allocate(&self, count: usize) -> Result<SectorId> {
        assert_eq!(count, 1);
        let sector = self
            .sectors
            .lock()
            .pop()
            .ok_or(Error::AllocationExhausted)?;
        self.taken.lock().push(sector);
        Ok(sector)
    }

    fn release(&self, sector: SectorId, count: usize) -> Result<()> {
        self.backing.release(sector, count)
    }
}

/// 逐个归还，失败的只记日志
fn release_each(backing: &dyn SectorAllocator, sectors: Vec<SectorId>) {
    for sector in sectors {
        if let Err(e) = backing.release(sector, 1) {
            warn!("sector {sector} leaked: {e}");
        }
    }
}
