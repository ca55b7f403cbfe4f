use derive_more::{Display, From, Into};

/// 扇区号。
///
/// 0 号扇区由分配器保留，所以在索引结构中 0 表示“未分配”。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[repr(transparent)]
pub struct SectorId(u32);

impl SectorId {
    pub const NONE: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// 扇区号即块设备的块号
    #[inline]
    pub const fn block(self) -> usize {
        self.0 as usize
    }
}

impl core::ops::Add<u32> for SectorId {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}
