use core::str;

use crate::layout;
use crate::SectorId;
use crate::NAME_MAX;

/// 目录项：目录文件的内容就是它的数组
#[derive(Clone)]
#[repr(C)]
pub struct DirEntry {
    /// 所指inode的扇区
    sector: SectorId,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX + 1],
    /// 0即空槽，可复用
    in_use: u8,
}

impl DirEntry {
    /// 目录项大小恒为20字节
    pub const SIZE: usize = 20;

    #[inline]
    pub fn new(name: &str, sector: SectorId) -> Self {
        let bytes = name.as_bytes();
        assert!(!bytes.is_empty() && bytes.len() <= NAME_MAX);
        let mut name = [0; NAME_MAX + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self {
            sector,
            name,
            in_use: 1,
        }
    }

    /// 空槽位，抹除目录项时整体写回
    #[inline]
    pub fn empty() -> Self {
        Self {
            sector: SectorId::NONE,
            name: [0; NAME_MAX + 1],
            in_use: 0,
        }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.name.len());
        str::from_utf8(&self.name[..len]).unwrap()
    }

    #[inline]
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        layout::bytes_of(self)
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        layout::bytes_of_mut(self)
    }
}
