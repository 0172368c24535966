//! # 空闲表层
//!
//! 以位图记录每个扇区的分配情况，置位即已占用。
//! 位图本体持久化在0号扇区inode的普通文件里，
//! 挂载时读入内存，停机或格式化时写回。

use spin::Mutex;

use crate::inode::InodeTable;
use crate::filesys::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};
use crate::SectorId;

/// 组内位数
const GROUP_BITS: usize = u64::BITS as usize;

/// 空闲扇区位图
pub struct FreeMap {
    /// u64一组的位图
    bits: Mutex<Vec<u64>>,
    /// 设备扇区总数
    sectors: usize,
}

impl FreeMap {
    /// 新生位图：只有空闲表文件与根目录两个保留扇区被占用
    pub fn new(sectors: usize) -> Self {
        let groups = sectors.div_ceil(GROUP_BITS);
        let mut bits = vec![0; groups];
        // 末组越界的位永久置位，分配扫描便无需关心设备边界
        for sector in sectors..groups * GROUP_BITS {
            bits[sector / GROUP_BITS] |= 1 << (sector % GROUP_BITS);
        }

        let map = Self {
            bits: Mutex::new(bits),
            sectors,
        };
        map.mark(FREE_MAP_SECTOR);
        map.mark(ROOT_DIR_SECTOR);
        map
    }

    /// 分配 `count` 个连续扇区并返回首扇区号；空间用尽则返回空
    pub fn allocate(&self, count: usize) -> Option<SectorId> {
        assert!(count > 0);
        let mut bits = self.bits.lock();

        if count == 1 {
            // 单扇区：按组定位第一个空位
            for (at, group) in bits.iter_mut().enumerate() {
                if *group != u64::MAX {
                    let bit = group.trailing_ones() as usize;
                    *group |= 1 << bit;
                    return Some(SectorId::new((at * GROUP_BITS + bit) as u32));
                }
            }
            return None;
        }

        // 连续区间：线性扫描
        let mut run = 0;
        for sector in 0..self.sectors {
            if bits[sector / GROUP_BITS] & (1 << (sector % GROUP_BITS)) == 0 {
                run += 1;
            } else {
                run = 0;
            }
            if run == count {
                let start = sector + 1 - count;
                for s in start..=sector {
                    bits[s / GROUP_BITS] |= 1 << (s % GROUP_BITS);
                }
                return Some(SectorId::new(start as u32));
            }
        }
        None
    }

    /// 归还自 `start` 起的 `count` 个扇区
    pub fn release(&self, start: SectorId, count: usize) {
        let mut bits = self.bits.lock();
        let start = usize::from(start);
        assert!(start + count <= self.sectors);

        for sector in start..start + count {
            let mask = 1 << (sector % GROUP_BITS);
            // 归还的扇区一定处于已分配状态
            assert_ne!(bits[sector / GROUP_BITS] & mask, 0);
            bits[sector / GROUP_BITS] &= !mask;
        }
    }

    /// 已占用的扇区数
    pub fn used(&self) -> usize {
        let bits = self.bits.lock();
        let phantom = bits.len() * GROUP_BITS - self.sectors;
        bits.iter().map(|group| group.count_ones() as usize).sum::<usize>() - phantom
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.sectors
    }
}

/// 持久化：位图文件的创建、读入与写回
impl FreeMap {
    /// 格式化时建立位图文件并写入当前内容
    pub fn create(&self, inodes: &InodeTable) {
        assert!(
            inodes.create(FREE_MAP_SECTOR, self.file_len(), SectorId::NONE),
            "free map creation failed"
        );
        self.flush(inodes);
    }

    /// 挂载时从位图文件读入
    pub fn open(&self, inodes: &InodeTable) {
        let inode = inodes.open(FREE_MAP_SECTOR);
        let mut bytes = vec![0u8; self.file_len()];
        assert_eq!(inode.read_at(0, &mut bytes), bytes.len());
        inode.close();

        let mut bits = self.bits.lock();
        for (group, chunk) in bits.iter_mut().zip(bytes.chunks_exact(8)) {
            *group = u64::from_le_bytes(chunk.try_into().unwrap());
        }
    }

    /// 把位图写回其文件。文件在格式化时已定长，不会触发增长。
    pub fn flush(&self, inodes: &InodeTable) {
        let bytes: Vec<u8> = self
            .bits
            .lock()
            .iter()
            .flat_map(|group| group.to_le_bytes())
            .collect();

        let inode = inodes.open(FREE_MAP_SECTOR);
        assert_eq!(inode.write_at(0, &bytes), bytes.len());
        inode.close();
    }
}

impl FreeMap {
    fn mark(&self, sector: SectorId) {
        let mut bits = self.bits.lock();
        let sector = usize::from(sector);
        let mask = 1 << (sector % GROUP_BITS);
        assert_eq!(bits[sector / GROUP_BITS] & mask, 0);
        bits[sector / GROUP_BITS] |= mask;
    }

    /// 位图文件的字节长度，按组对齐
    fn file_len(&self) -> usize {
        self.bits.lock().len() * 8
    }
}
