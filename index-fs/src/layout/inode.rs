//! 磁盘上的文件描述符
//!
//! 描述符恰好占满一个扇区：
//!
//! length | magic | is_dir | direct[123] | indirect | double_indirect
//!
//! 文件只增不减，且增长总是紧接着原有长度，所以索引中的扇区号是连续分配的：
//! 某一项为 0 说明其后各项也都为 0。

use log::{debug, warn};

use crate::free_map::{Reservation, SectorAllocator};
use crate::{BufferCache, DataBlock, Error, INODE_MAGIC, Result, SECTOR_SIZE, SectorId};

use super::indirect::{
    self, BlockLocation, DIRECT_COUNT, INDIRECT_CAP, INDIRECT_COUNT, MAX_FILE_SIZE, locate,
};
use super::{set_word, word};

const ZERO_BLOCK: DataBlock = [0; SECTOR_SIZE];

/// 各字段在块内的字下标
const LENGTH: usize = 0;
const MAGIC: usize = 1;
const KIND: usize = 2;
const DIRECT: usize = 3;
const INDIRECT: usize = DIRECT + DIRECT_COUNT;
const DOUBLE_INDIRECT: usize = INDIRECT + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    /// 文件长度(字节)，只增不减
    pub length: u32,
    magic: u32,
    pub kind: DiskInodeKind,
    /// 直接索引，存储容量：DIRECT_COUNT * SECTOR_SIZE 字节
    direct: [SectorId; DIRECT_COUNT],
    /// 指向一个一级索引块
    indirect: SectorId,
    /// 指向一个二级索引块
    double_indirect: SectorId,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DiskInodeKind {
    #[default]
    File,
    Directory,
}

impl DiskInode {
    pub fn new(kind: DiskInodeKind) -> Self {
        Self {
            length: 0,
            magic: INODE_MAGIC,
            kind,
            direct: [SectorId::NONE; DIRECT_COUNT],
            indirect: SectorId::NONE,
            double_indirect: SectorId::NONE,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == DiskInodeKind::Directory
    }

    #[inline]
    pub fn direct(&self) -> &[SectorId] {
        &self.direct
    }

    #[inline]
    pub fn indirect(&self) -> SectorId {
        self.indirect
    }

    #[inline]
    pub fn double_indirect(&self) -> SectorId {
        self.double_indirect
    }

    pub fn decode(block: &DataBlock) -> Self {
        Self {
            length: word(block, LENGTH),
            magic: word(block, MAGIC),
            kind: match word(block, KIND) {
                0 => DiskInodeKind::File,
                _ => DiskInodeKind::Directory,
            },
            direct: core::array::from_fn(|i| SectorId::new(word(block, DIRECT + i))),
            indirect: SectorId::new(word(block, INDIRECT)),
            double_indirect: SectorId::new(word(block, DOUBLE_INDIRECT)),
        }
    }

    pub fn encode(&self) -> DataBlock {
        let mut block = ZERO_BLOCK;
        set_word(&mut block, LENGTH, self.length);
        set_word(&mut block, MAGIC, self.magic);
        set_word(&mut block, KIND, self.is_dir() as u32);
        for (i, &sector) in self.direct.iter().enumerate() {
            set_word(&mut block, DIRECT + i, sector.into());
        }
        set_word(&mut block, INDIRECT, self.indirect.into());
        set_word(&mut block, DOUBLE_INDIRECT, self.double_indirect.into());
        block
    }

    /// 字节偏移所在数据块的扇区号，偏移必须落在文件长度之内
    pub fn block_id(&self, offset: usize, cache: &BufferCache) -> Result<SectorId> {
        if offset >= self.length as usize {
            return Err(Error::PastEnd);
        }

        match locate(offset)? {
            BlockLocation::Direct(index) => Ok(self.direct[index]),
            BlockLocation::Indirect(index) => {
                cache.map(self.indirect, |block| indirect::entry(block, index))
            }
            BlockLocation::DoubleIndirect { outer, inner } => {
                let inner_block =
                    cache.map(self.double_indirect, |block| indirect::entry(block, outer))?;
                cache.map(inner_block, |block| indirect::entry(block, inner))
            }
        }
    }

    /// 把新扇区登记到 `location`。
    ///
    /// 首次用到一级或二级索引时，先分配并清零索引块，再填写其中的项。
    pub fn register(
        &mut self,
        sector: SectorId,
        location: BlockLocation,
        cache: &BufferCache,
        allocator: &dyn SectorAllocator,
    ) -> Result<()> {
        match location {
            BlockLocation::Direct(index) => self.direct[index] = sector,
            BlockLocation::Indirect(index) => {
                if self.indirect.is_none() {
                    self.indirect = new_index_block(cache, allocator)?;
                }
                cache.map_mut(self.indirect, |block| {
                    indirect::set_entry(block, index, sector)
                })?;
            }
            BlockLocation::DoubleIndirect { outer, inner } => {
                if self.double_indirect.is_none() {
                    self.double_indirect = new_index_block(cache, allocator)?;
                }

                let mut inner_block =
                    cache.map(self.double_indirect, |block| indirect::entry(block, outer))?;
                if inner_block.is_none() {
                    inner_block = new_index_block(cache, allocator)?;
                    cache.map_mut(self.double_indirect, |block| {
                        indirect::set_entry(block, outer, inner_block)
                    })?;
                }

                cache.map_mut(inner_block, |block| {
                    indirect::set_entry(block, inner, sector)
                })?;
            }
        }

        Ok(())
    }

    /// 把文件扩展到覆盖闭区间 `[start, end]`，`start` 必须等于当前长度。
    ///
    /// 长度先行更新，随后逐扇区分配、登记并清零新扇区。
    pub fn extend(
        &mut self,
        start: usize,
        end: usize,
        cache: &BufferCache,
        allocator: &dyn SectorAllocator,
    ) -> Result<()> {
        assert!(start <= end);
        assert_eq!(start, self.length as usize, "extension must be contiguous");
        if end >= MAX_FILE_SIZE {
            return Err(Error::OutOfRange);
        }

        self.length = (end + 1) as u32;

        let mut offset = start;
        while offset <= end {
            let sector_offset = offset % SECTOR_SIZE;
            // 不在扇区开头，说明该扇区已经分配过了
            if sector_offset == 0 {
                let sector = allocator.allocate(1)?;
                self.register(sector, locate(offset)?, cache, allocator)?;
                cache.write(sector, &ZERO_BLOCK, 0)?;
            }
            offset += SECTOR_SIZE - sector_offset;
        }

        Ok(())
    }

    /// 把文件增长到 `new_length` 字节，并把描述符写回 `home` 扇区。
    ///
    /// 所需的数据块与索引块一次性预留。任何一步失败，描述符都保持原样，
    /// 已登记到原有索引块里的项被清零，本次取得的扇区全部归还。
    pub fn expand_to(
        &mut self,
        home: SectorId,
        new_length: usize,
        cache: &BufferCache,
        allocator: &dyn SectorAllocator,
    ) -> Result<()> {
        let old_length = self.length as usize;
        assert!(new_length > old_length);
        if new_length > MAX_FILE_SIZE {
            return Err(Error::OutOfRange);
        }

        let needed =
            Self::count_total_sectors(new_length) - Self::count_total_sectors(old_length);
        let reservation = Reservation::take(allocator, needed)?;
        let original = self.clone();

        let result = self
            .extend(old_length, new_length - 1, cache, &reservation)
            .and_then(|()| cache.write(home, &self.encode(), 0));
        if let Err(e) = result {
            *self = original;
            match self.unregister(old_length, new_length, cache) {
                Ok(()) => reservation.abort(),
                Err(clear_err) => {
                    // 残留的索引项可能仍指向已交出的扇区，只归还未用的
                    warn!("stale index entries of growth {old_length} -> {new_length}: {clear_err}");
                    reservation.finish();
                }
            }
            return Err(e);
        }

        reservation.finish();
        debug!("file grown {old_length} -> {new_length} with {needed} sector(s)");
        Ok(())
    }

    /// 清掉 `[old_length, new_length)` 的数据块在原有索引块里登记过的项。
    ///
    /// `self` 须是增长前的描述符；本次新建的索引块随扇区一起归还，不必清理。
    fn unregister(&self, old_length: usize, new_length: usize, cache: &BufferCache) -> Result<()> {
        let old_sectors = Self::count_data_sectors(old_length);
        // 增长前已经存在的一级索引块（二级索引之下）个数
        let old_inner_blocks = old_sectors
            .saturating_sub(INDIRECT_CAP)
            .div_ceil(INDIRECT_COUNT);

        for index in old_sectors..Self::count_data_sectors(new_length) {
            match locate(index * SECTOR_SIZE)? {
                BlockLocation::Direct(_) => {}
                BlockLocation::Indirect(index) => {
                    if !self.indirect.is_none() {
                        cache.map_mut(self.indirect, |block| {
                            indirect::set_entry(block, index, SectorId::NONE)
                        })?;
                    }
                }
                BlockLocation::DoubleIndirect { outer, inner } => {
                    if self.double_indirect.is_none() {
                        break;
                    }
                    if outer < old_inner_blocks {
                        let inner_block = cache
                            .map(self.double_indirect, |block| indirect::entry(block, outer))?;
                        cache.map_mut(inner_block, |block| {
                            indirect::set_entry(block, inner, SectorId::NONE)
                        })?;
                    } else if inner == 0 {
                        cache.map_mut(self.double_indirect, |block| {
                            indirect::set_entry(block, outer, SectorId::NONE)
                        })?;
                    }
                }
            }
        }

        Ok(())
    }

    /// 归还文件占用的全部数据块与索引块，描述符自身的扇区由调用者归还
    pub fn release_all(&self, cache: &BufferCache, allocator: &dyn SectorAllocator) -> Result<()> {
        for &sector in allocated(&self.direct) {
            allocator.release(sector, 1)?;
        }

        if !self.indirect.is_none() {
            release_index_block(self.indirect, cache, allocator)?;
        }

        if !self.double_indirect.is_none() {
            let outer = cache.map(self.double_indirect, indirect::decode)?;
            for &inner_block in allocated(&outer) {
                release_index_block(inner_block, cache, allocator)?;
            }
            allocator.release(self.double_indirect, 1)?;
        }

        Ok(())
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，返回读到的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8], cache: &BufferCache) -> Result<usize> {
        let end = offset.saturating_add(buf.len()).min(self.length as usize);
        let mut start = offset;
        let mut read_size = 0;

        while start < end {
            // 当前扇区的末地址(字节)
            let current_block_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let block_read_size = current_block_end - start;

            cache.read(
                self.block_id(start, cache)?,
                &mut buf[read_size..read_size + block_read_size],
                start % SECTOR_SIZE,
            )?;

            read_size += block_read_size;
            start = current_block_end;
        }

        Ok(read_size)
    }

    /// 向已分配的范围内写入`buf`，超出长度的部分不写
    pub fn write_at(&self, offset: usize, buf: &[u8], cache: &BufferCache) -> Result<usize> {
        let end = offset.saturating_add(buf.len()).min(self.length as usize);
        let mut start = offset;
        let mut written_size = 0;

        while start < end {
            let current_block_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let block_write_size = current_block_end - start;

            cache.write(
                self.block_id(start, cache)?,
                &buf[written_size..written_size + block_write_size],
                start % SECTOR_SIZE,
            )?;

            written_size += block_write_size;
            start = current_block_end;
        }

        Ok(written_size)
    }

    /// 计算容纳指定数据量需要多少个**数据块**
    #[inline]
    pub fn count_data_sectors(length: usize) -> usize {
        length.div_ceil(SECTOR_SIZE)
    }

    /// 计算容纳指定数据量需要多少个 **数据块** 和 **索引块**
    pub fn count_total_sectors(length: usize) -> usize {
        let data_sectors = Self::count_data_sectors(length);
        let mut total = data_sectors;

        // 超出直接索引，使用一级索引块
        if data_sectors > DIRECT_COUNT {
            total += 1;
        }

        // 超出一级索引，使用二级索引块及其下的一级索引块
        if data_sectors > INDIRECT_CAP {
            total += 1 + (data_sectors - INDIRECT_CAP).div_ceil(INDIRECT_COUNT);
        }

        total
    }
}

/// 分配一个清零的索引块
fn new_index_block(cache: &BufferCache, allocator: &dyn SectorAllocator) -> Result<SectorId> {
    let sector = allocator.allocate(1)?;
    cache.write(sector, &ZERO_BLOCK, 0)?;
    Ok(sector)
}

/// 归还索引块所指的数据块，再归还索引块本身
fn release_index_block(
    index_block: SectorId,
    cache: &BufferCache,
    allocator: &dyn SectorAllocator,
) -> Result<()> {
    let entries = cache.map(index_block, indirect::decode)?;
    for &sector in allocated(&entries) {
        allocator.release(sector, 1)?;
    }
    allocator.release(index_block, 1)
}

/// 连续分配的前提下，遇到第一个 0 项即可停止
fn allocated(entries: &[SectorId]) -> impl Iterator<Item = &SectorId> {
    entries.iter().take_while(|sector| !sector.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(DOUBLE_INDIRECT + 1, SECTOR_SIZE / 4);

        let mut disk_inode = DiskInode::new(DiskInodeKind::Directory);
        disk_inode.length = 1000;
        disk_inode.direct[0] = SectorId::new(9);
        disk_inode.double_indirect = SectorId::new(11);

        let block = disk_inode.encode();
        assert_eq!(&block[..12], &[232, 3, 0, 0, 0x44, 0x4f, 0x4e, 0x49, 1, 0, 0, 0]);
        assert_eq!(&block[508..], &[11, 0, 0, 0]);
        assert_eq!(DiskInode::decode(&block), disk_inode);
        assert!(!DiskInode::decode(&ZERO_BLOCK).is_valid());
    }

    #[test]
    fn count() {
        assert_eq!(DiskInode::count_total_sectors(0), 0);
        assert_eq!(DiskInode::count_total_sectors(1), 1);
        assert_eq!(DiskInode::count_total_sectors(123 * 512), 123);
        assert_eq!(DiskInode::count_total_sectors(123 * 512 + 1), 125);
        assert_eq!(DiskInode::count_total_sectors(251 * 512), 252);
        assert_eq!(DiskInode::count_total_sectors(251 * 512 + 1), 255);
        assert_eq!(DiskInode::count_total_sectors(MAX_FILE_SIZE), 16635 + 1 + 1 + 128);
    }
}
