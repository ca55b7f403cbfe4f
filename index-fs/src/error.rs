use derive_more::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Error {
    /// 分配器没有空闲扇区了
    #[display(fmt = "no free sector left")]
    AllocationExhausted,
    /// 偏移超出三级索引的寻址上限
    #[display(fmt = "offset beyond the addressable range")]
    OutOfRange,
    /// 偏移处尚无数据，调用者应先扩展文件
    #[display(fmt = "offset past the end of file")]
    PastEnd,
    #[display(fmt = "device: {}", _0)]
    Device(block_dev::Error),
    /// 描述符魔数不符
    #[display(fmt = "corrupt file descriptor")]
    CorruptDescriptor,
    /// 卷头魔数不符
    #[display(fmt = "corrupt volume header")]
    CorruptVolume,
    /// 卷的大小与设备不符，或小到放不下卷头与位图
    #[display(fmt = "volume geometry does not fit the device")]
    BadGeometry,
    /// 文件当前禁止写入
    #[display(fmt = "writes are denied")]
    WriteDenied,
}

impl From<block_dev::Error> for Error {
    fn from(e: block_dev::Error) -> Self {
        Self::Device(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
