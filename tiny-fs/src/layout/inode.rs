//! 磁盘上的inode与间接索引块。
//!
//! inode恰好占一个扇区，内含10个直接槽、10个一级索引槽和
//! 1个二级索引槽；索引块整个扇区连续存储128个扇区号。
//! 分配在逻辑上连续：直接槽填满才动用一级索引，
//! 一个索引组填满才进入下一组。
//!
//! ## 索引编码
//!
//! - 逻辑扇区号模组容量，得到组内槽位
//! - 逻辑扇区号除以组容量，得到组的位置

use crate::free_map::FreeMap;
use crate::layout;
use crate::BlockCache;
use crate::SectorId;
use crate::MAGIC;
use crate::SECTOR_SIZE;

/// 间接索引块的编号容量
pub const INDIRECT_SLOTS: usize = SECTOR_SIZE / core::mem::size_of::<SectorId>();
/// 间接索引块
pub type IndirectBlock = [SectorId; INDIRECT_SLOTS];

/// 直接索引槽数
pub const DIRECT_COUNT: usize = 10;
/// 一级索引槽数
pub const INDIRECT_COUNT: usize = 10;
/// 直接索引时的编号容量
pub const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
pub const INDIRECT_CAP: usize = DIRECT_CAP + INDIRECT_COUNT * INDIRECT_SLOTS;
/// 用上二级索引时的编号容量
pub const DOUBLE_CAP: usize = INDIRECT_CAP + INDIRECT_SLOTS * INDIRECT_SLOTS;

/// 磁盘上的inode，恰好一个扇区
#[repr(C)]
pub struct DiskInode {
    /// 连续分配时代的遗留字段，恒为NONE
    start: SectorId,
    // 布局要求有符号4字节
    length: i32,
    magic: u32,
    unused: [u32; 103],
    /// 父目录的inode扇区；NONE表示这是普通文件
    parent_dir: SectorId,
    direct: [SectorId; DIRECT_COUNT],
    indirect: [SectorId; INDIRECT_COUNT],
    double_indirect: SectorId,
}

impl DiskInode {
    pub fn new(length: usize, parent: SectorId) -> Self {
        Self {
            start: SectorId::NONE,
            length: length as i32,
            magic: MAGIC,
            unused: [0; 103],
            parent_dir: parent,
            direct: [SectorId::NONE; DIRECT_COUNT],
            indirect: [SectorId::NONE; INDIRECT_COUNT],
            double_indirect: SectorId::NONE,
        }
    }

    #[inline]
    pub fn length(&self) -> usize {
        assert!(self.length >= 0);
        self.length as usize
    }

    #[inline]
    pub fn set_length(&mut self, length: usize) {
        self.length = length as i32;
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        !self.parent_dir.is_none()
    }

    #[inline]
    pub fn parent(&self) -> SectorId {
        self.parent_dir
    }

    #[inline]
    pub fn magic_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// 容纳指定数据量需要多少个**数据扇区**
    #[inline]
    pub fn sectors(bytes: usize) -> usize {
        bytes.div_ceil(SECTOR_SIZE)
    }

    /// 文件内字节偏移所在的设备扇区。
    /// 写前分配的纪律保证 `pos < length` 时必有值。
    pub fn byte_to_sector(&self, pos: usize, cache: &BlockCache) -> Option<SectorId> {
        if self.length <= 0 {
            return None;
        }

        if pos < DIRECT_CAP * SECTOR_SIZE {
            self.direct[pos / SECTOR_SIZE].validate()
        } else if pos < INDIRECT_CAP * SECTOR_SIZE {
            // 剔去直接索引的部分
            let pos = pos - DIRECT_CAP * SECTOR_SIZE;
            let group = self.indirect[pos / (INDIRECT_SLOTS * SECTOR_SIZE)].validate()?;
            let group = read_index(cache, group);
            group[pos % (INDIRECT_SLOTS * SECTOR_SIZE) / SECTOR_SIZE].validate()
        } else if pos < self.length() {
            // 剔去一级索引的部分
            let pos = pos - INDIRECT_CAP * SECTOR_SIZE;
            let double = read_index(cache, self.double_indirect.validate()?);
            let group = double[pos / (INDIRECT_SLOTS * SECTOR_SIZE)].validate()?;
            let group = read_index(cache, group);
            group[pos % (INDIRECT_SLOTS * SECTOR_SIZE) / SECTOR_SIZE].validate()
        } else {
            None
        }
    }

    /// 把第 `start..sectors` 个逻辑扇区扩充进索引，
    /// 新数据扇区全部经缓存清零。
    ///
    /// 正在填充的索引组持有在存副本，组满或分配结束时写回；
    /// 二级索引块在首次跨入该区域时才分配。
    /// 空闲表耗尽时返回false，已分配的扇区不回滚。
    pub fn allocate(
        &mut self,
        sectors: usize,
        start: usize,
        cache: &BlockCache,
        free_map: &FreeMap,
    ) -> bool {
        assert!(sectors <= DOUBLE_CAP);

        // 断点落在组中途时，先取回磁盘上的部分内容
        let mut group: IndirectBlock = [SectorId::NONE; INDIRECT_SLOTS];
        if (DIRECT_CAP..INDIRECT_CAP).contains(&start) {
            if let Some(sec) = self.indirect[(start - DIRECT_CAP) / INDIRECT_SLOTS].validate() {
                cache.read(sec, layout::bytes_of_mut(&mut group));
            }
        }

        let mut double: IndirectBlock = [SectorId::NONE; INDIRECT_SLOTS];
        if let Some(sec) = self.double_indirect.validate() {
            cache.read(sec, layout::bytes_of_mut(&mut double));
            if start >= INDIRECT_CAP {
                if let Some(sec) = double[(start - INDIRECT_CAP) / INDIRECT_SLOTS].validate() {
                    cache.read(sec, layout::bytes_of_mut(&mut group));
                }
            }
        }

        let zeros = [0u8; SECTOR_SIZE];
        for i in start..sectors {
            if i < DIRECT_CAP {
                /******************** 直接索引 ********************/
                let Some(sec) = free_map.allocate(1) else {
                    return false;
                };
                assert!(self.direct[i].is_none());
                self.direct[i] = sec;
                cache.write(sec, &zeros);
            } else if i < INDIRECT_CAP {
                /******************** 一级索引 ********************/
                let index = i - DIRECT_CAP;
                let (grp, slot) = (index / INDIRECT_SLOTS, index % INDIRECT_SLOTS);

                // 槽位0即进入新组，分配它的索引块
                if slot == 0 {
                    let Some(sec) = free_map.allocate(1) else {
                        return false;
                    };
                    self.indirect[grp] = sec;
                    group = [SectorId::NONE; INDIRECT_SLOTS];
                }

                let Some(sec) = free_map.allocate(1) else {
                    return false;
                };
                assert!(group[slot].is_none());
                group[slot] = sec;
                cache.write(sec, &zeros);

                // 组满或分配结束时写回索引块
                if slot == INDIRECT_SLOTS - 1 || i == sectors - 1 {
                    cache.write(self.indirect[grp], layout::bytes_of(&group));
                }
            } else {
                /******************** 二级索引 ********************/
                // 首次跨入二级区域
                if self.double_indirect.is_none() {
                    let Some(sec) = free_map.allocate(1) else {
                        return false;
                    };
                    self.double_indirect = sec;
                }

                let index = i - INDIRECT_CAP;
                let (grp, slot) = (index / INDIRECT_SLOTS, index % INDIRECT_SLOTS);

                if slot == 0 {
                    let Some(sec) = free_map.allocate(1) else {
                        return false;
                    };
                    double[grp] = sec;
                    group = [SectorId::NONE; INDIRECT_SLOTS];
                }

                let Some(sec) = free_map.allocate(1) else {
                    return false;
                };
                assert!(group[slot].is_none());
                group[slot] = sec;
                cache.write(sec, &zeros);

                if slot == INDIRECT_SLOTS - 1 || i == sectors - 1 {
                    cache.write(double[grp], layout::bytes_of(&group));
                }
                if i == sectors - 1 {
                    cache.write(self.double_indirect, layout::bytes_of(&double));
                }
            }
        }
        true
    }

    /// 归还全部数据扇区与索引扇区。
    /// 分配在逻辑上连续，因此每张表都停在第一个NONE槽。
    /// inode自身的扇区由调用方先行归还。
    pub fn release(&self, cache: &BlockCache, free_map: &FreeMap) {
        for slot in self.direct {
            let Some(sec) = slot.validate() else {
                return;
            };
            free_map.release(sec, 1);
        }

        for slot in self.indirect {
            let Some(sec) = slot.validate() else {
                return;
            };
            let group = read_index(cache, sec);
            let full = release_group(&group, free_map);
            free_map.release(sec, 1);
            if !full {
                return;
            }
        }

        let Some(sec) = self.double_indirect.validate() else {
            return;
        };
        let double = read_index(cache, sec);
        for slot in double {
            let Some(grp_sec) = slot.validate() else {
                break;
            };
            let group = read_index(cache, grp_sec);
            let full = release_group(&group, free_map);
            free_map.release(grp_sec, 1);
            if !full {
                break;
            }
        }
        free_map.release(sec, 1);
    }
}

/// 经缓存取回一个索引块
fn read_index(cache: &BlockCache, sector: SectorId) -> IndirectBlock {
    let mut block: IndirectBlock = [SectorId::NONE; INDIRECT_SLOTS];
    cache.read(sector, layout::bytes_of_mut(&mut block));
    block
}

/// 归还组内数据扇区，返回组是否填满
fn release_group(group: &IndirectBlock, free_map: &FreeMap) -> bool {
    for slot in group {
        let Some(sec) = slot.validate() else {
            return false;
        };
        free_map.release(sec, 1);
    }
    true
}
