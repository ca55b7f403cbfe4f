//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的槽位，
//! 把即将操作的扇区复制到槽位中；对扇区的读写都发生在槽位上，
//! 脏槽位要等到被换出或者 [`BufferCache::flush_all`] 时才写回设备。
//!
//! ## 置换策略：CLOCK
//!
//! 一根时钟指针在槽位数组上循环：
//! - 指向无效槽位，直接选中；
//! - 指向访问位为 1 的槽位，清零并前进（给它第二次机会）；
//! - 指向访问位为 0 的槽位，写回（若脏）、作废后选中。
//!
//! 访问位在每次读写后置 1，刚装入时为 0。
//!
//! ## 锁
//!
//! - 每个槽位一把锁，保护它的元信息与数据；
//! - 时钟指针的锁同时是全局锁，查找与换出都在它之下进行，
//!   拿到目标槽位的锁之后才释放，所以槽位不会在拷贝途中被换走。
//!
//! 持有槽位锁的线程绝不去拿全局锁。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use enumflags2::{BitFlags, bitflags};
use log::{trace, warn};
use spin::{Mutex, MutexGuard};

use crate::{CACHE_CAPACITY, DataBlock, Result, SECTOR_SIZE, SectorId};

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotFlag {
    /// 槽位上存有某个扇区
    Valid = 0b001,
    /// 数据尚未写回设备
    Dirty = 0b010,
    /// CLOCK 访问位
    Accessed = 0b100,
}

/// 内存中的一个缓存槽位
struct Slot {
    /// 仅在 `Valid` 时有意义
    sector: SectorId,
    flags: BitFlags<SlotFlag>,
    data: DataBlock,
}

pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    slots: Box<[Mutex<Slot>]>,
    /// 时钟指针，兼作查找与换出的全局锁
    hand: Mutex<usize>,
}

impl BufferCache {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let slots: Vec<Mutex<Slot>> = (0..CACHE_CAPACITY)
            .map(|_| {
                Mutex::new(Slot {
                    sector: SectorId::NONE,
                    flags: BitFlags::empty(),
                    data: [0; SECTOR_SIZE],
                })
            })
            .collect();

        Self {
            device,
            slots: slots.into_boxed_slice(),
            hand: Mutex::new(0),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// 从扇区的 `offset` 处读出 `buf.len()` 字节
    pub fn read(&self, sector: SectorId, buf: &mut [u8], offset: usize) -> Result<()> {
        self.map(sector, |data| {
            buf.copy_from_slice(&data[offset..offset + buf.len()]);
        })
    }

    /// 把 `buf` 写到扇区的 `offset` 处，槽位标脏
    pub fn write(&self, sector: SectorId, buf: &[u8], offset: usize) -> Result<()> {
        self.map_mut(sector, |data| {
            data[offset..offset + buf.len()].copy_from_slice(buf);
        })
    }

    /// 在槽位锁内读取扇区数据并处理。
    ///
    /// `f` 里不能再访问缓存，否则会与查找互相等待。
    pub fn map<V>(&self, sector: SectorId, f: impl FnOnce(&DataBlock) -> V) -> Result<V> {
        let mut slot = self.acquire(sector)?;
        let value = f(&slot.data);
        slot.flags |= SlotFlag::Accessed;
        Ok(value)
    }

    /// 在槽位锁内修改扇区数据，限制同 [`BufferCache::map`]
    pub fn map_mut<V>(&self, sector: SectorId, f: impl FnOnce(&mut DataBlock) -> V) -> Result<V> {
        let mut slot = self.acquire(sector)?;
        let value = f(&mut slot.data);
        slot.flags |= SlotFlag::Dirty | SlotFlag::Accessed;
        Ok(value)
    }

    /// 把第 `index` 个槽位写回设备并清除脏位；无效槽位什么也不做
    pub fn flush(&self, index: usize) -> Result<()> {
        let mut slot = self.slots[index].lock();
        if slot.flags.contains(SlotFlag::Valid) {
            slot.write_back(&*self.device)?;
        }
        Ok(())
    }

    /// 写回所有脏槽位。
    ///
    /// 单个槽位失败不会中断其余槽位，返回遇到的第一个错误。
    pub fn flush_all(&self) -> Result<()> {
        let mut result = Ok(());
        for slot in self.slots.iter() {
            let mut slot = slot.lock();
            if slot.flags.contains(SlotFlag::Valid | SlotFlag::Dirty) {
                if let Err(e) = slot.write_back(&*self.device) {
                    warn!("failed to flush sector {}: {e}", slot.sector);
                    result = result.and(Err(e));
                }
            }
        }
        result
    }

    /// 若扇区在缓存中且为脏，写回之
    pub fn sync(&self, sector: SectorId) -> Result<()> {
        let slot = {
            let _hand = self.hand.lock();
            self.lookup(sector)
        };
        match slot {
            Some(mut slot) if slot.flags.contains(SlotFlag::Dirty) => slot.write_back(&*self.device),
            _ => Ok(()),
        }
    }

    /// 扇区是否在缓存中，不装入也不触碰访问位
    pub fn contains(&self, sector: SectorId) -> bool {
        let _hand = self.hand.lock();
        self.lookup(sector).is_some()
    }
}

impl BufferCache {
    /// 取得存有 `sector` 的槽位，未命中则换出一个槽位并从设备装入
    fn acquire(&self, sector: SectorId) -> Result<MutexGuard<'_, Slot>> {
        let mut hand = self.hand.lock();

        if let Some(slot) = self.lookup(sector) {
            return Ok(slot);
        }

        let mut slot = self.select_victim(&mut hand)?;
        // 装入失败时槽位保持无效，不缓存垃圾数据
        self.device.read_block(sector.block(), &mut slot.data)?;
        slot.sector = sector;
        slot.flags = SlotFlag::Valid.into();
        trace!("sector {sector} loaded");

        Ok(slot)
    }

    /// 线性扫描查找扇区，调用者须持有全局锁
    fn lookup(&self, sector: SectorId) -> Option<MutexGuard<'_, Slot>> {
        self.slots.iter().find_map(|slot| {
            let slot = slot.lock();
            (slot.flags.contains(SlotFlag::Valid) && slot.sector == sector).then_some(slot)
        })
    }

    /// CLOCK 选出一个空槽位，调用者须持有全局锁
    fn select_victim(&self, hand: &mut usize) -> Result<MutexGuard<'_, Slot>> {
        loop {
            let index = *hand;
            let mut slot = self.slots[index].lock();

            if !slot.flags.contains(SlotFlag::Valid) {
                *hand = (index + 1) % CACHE_CAPACITY;
                return Ok(slot);
            }

            if slot.flags.contains(SlotFlag::Accessed) {
                slot.flags.remove(SlotFlag::Accessed);
                *hand = (index + 1) % CACHE_CAPACITY;
                continue;
            }

            // 写回失败时槽位保持原样，指针也不动
            if slot.flags.contains(SlotFlag::Dirty) {
                slot.write_back(&*self.device)?;
            }
            trace!("sector {} evicted from slot {index}", slot.sector);
            slot.flags = BitFlags::empty();
            *hand = (index + 1) % CACHE_CAPACITY;

            return Ok(slot);
        }
    }
}

impl Slot {
    fn write_back(&mut self, device: &dyn BlockDevice) -> Result<()> {
        device.write_block(self.sector.block(), &self.data)?;
        self.flags.remove(SlotFlag::Dirty);
        Ok(())
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            warn!("dirty sectors lost on drop: {e}");
        }
    }
}
