//! # 索引节点层
//!
//! [`Inode`] 是磁盘inode在内存中的化身，带打开计数、删除标记
//! 与拒写计数；[`InodeTable`] 是打开inode列表，保证同一扇区
//! 全局只有一个 [`Inode`] 对象，重复打开即复用。
//!
//! 被标记删除的inode由最后一个关闭者回收全部扇区。

use std::sync::{Arc, RwLock, Weak};

use spin::Mutex;

use crate::free_map::FreeMap;
use crate::layout;
use crate::layout::DiskInode;
use crate::BlockCache;
use crate::SectorId;
use crate::SECTOR_SIZE;

/// 打开inode列表
pub struct InodeTable {
    cache: Arc<BlockCache>,
    free_map: Arc<FreeMap>,
    inodes: Mutex<Vec<Arc<Inode>>>,
    me: Weak<InodeTable>,
}

/// 内存中的inode
pub struct Inode {
    /// 磁盘上的落脚扇区，也是inode的编号
    sector: SectorId,
    cache: Arc<BlockCache>,
    free_map: Arc<FreeMap>,
    table: Weak<InodeTable>,
    inner: RwLock<InodeInner>,
}

struct InodeInner {
    open_count: u32,
    /// 置位后，最后一次关闭即回收
    removed: bool,
    /// 非零期间写入一律短写0字节
    deny_write_count: u32,
    /// 磁盘inode的在存副本
    disk: DiskInode,
}

impl InodeTable {
    pub fn new(cache: Arc<BlockCache>, free_map: Arc<FreeMap>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            cache,
            free_map,
            inodes: Mutex::new(Vec::new()),
            me: me.clone(),
        })
    }

    /// 在 `sector` 上建立长度为 `length` 的新inode，
    /// 数据扇区全部预先分配并清零。
    ///
    /// 无论成败inode扇区都会写出；失败时由调用方归还该扇区。
    pub fn create(&self, sector: SectorId, length: usize, parent: SectorId) -> bool {
        let mut disk = DiskInode::new(length, parent);
        let ok = disk.allocate(DiskInode::sectors(length), 0, &self.cache, &self.free_map);
        self.cache.write(sector, layout::bytes_of(&disk));
        ok
    }

    /// 打开 `sector` 上的inode；已打开则复用并增加计数
    pub fn open(&self, sector: SectorId) -> Arc<Inode> {
        let mut inodes = self.inodes.lock();
        if let Some(inode) = inodes.iter().find(|inode| inode.sector == sector) {
            inode.inner.write().unwrap().open_count += 1;
            return Arc::clone(inode);
        }

        let mut disk = DiskInode::new(0, SectorId::NONE);
        self.cache.read(sector, layout::bytes_of_mut(&mut disk));
        assert!(disk.magic_valid(), "not an inode: sector {}", u32::from(sector));

        let inode = Arc::new(Inode {
            sector,
            cache: Arc::clone(&self.cache),
            free_map: Arc::clone(&self.free_map),
            table: self.me.clone(),
            inner: RwLock::new(InodeInner {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
                disk,
            }),
        });
        inodes.push(Arc::clone(&inode));
        inode
    }
}

impl Inode {
    /// 再次打开，与 [`Inode::close`] 一一配对
    pub fn reopen(&self) {
        self.inner.write().unwrap().open_count += 1;
    }

    /// 关闭。最后一个关闭者把inode移出列表；
    /// 若已标记删除，先归还inode扇区，再归还数据与索引扇区。
    pub fn close(&self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut inodes = table.inodes.lock();
        let mut inner = self.inner.write().unwrap();
        inner.open_count -= 1;
        if inner.open_count > 0 {
            return;
        }
        inodes.retain(|inode| inode.sector != self.sector);
        drop(inodes);

        if inner.removed {
            self.free_map.release(self.sector, 1);
            inner.disk.release(&self.cache, &self.free_map);
        }
    }

    /// 标记删除；扇区推迟到最后一次关闭时回收
    pub fn remove(&self) {
        self.inner.write().unwrap().removed = true;
    }

    /// 从 `offset` 读入 `buf`，返回实际读到的字节数；
    /// 越过文件末尾即短读
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let inner = self.inner.read().unwrap();
        inner.read_at(offset, buf, &self.cache)
    }

    /// 把 `buf` 写到 `offset` 处，返回实际写入的字节数。
    ///
    /// 写越末尾则先增长文件，空洞部分填零；
    /// 空间耗尽或拒写期间短写0字节。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut inner = self.inner.write().unwrap();
        inner.write_at(self.sector, offset, buf, &self.cache, &self.free_map)
    }

    pub fn deny_write(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.deny_write_count += 1;
        assert!(inner.deny_write_count <= inner.open_count);
    }

    pub fn allow_write(&self) {
        let mut inner = self.inner.write().unwrap();
        assert!(inner.deny_write_count > 0);
        inner.deny_write_count -= 1;
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.inner.read().unwrap().disk.length()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.inner.read().unwrap().disk.is_dir()
    }

    /// 父目录的inode扇区
    #[inline]
    pub fn parent(&self) -> SectorId {
        self.inner.read().unwrap().disk.parent()
    }

    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.sector
    }

    #[inline]
    pub fn open_count(&self) -> u32 {
        self.inner.read().unwrap().open_count
    }

    pub(crate) fn table(&self) -> Arc<InodeTable> {
        self.table.upgrade().unwrap()
    }
}

impl InodeInner {
    fn read_at(&self, offset: usize, buf: &mut [u8], cache: &BlockCache) -> usize {
        let end = (offset + buf.len()).min(self.disk.length());
        if offset >= end {
            return 0;
        }

        let mut pos = offset;
        let mut read = 0;
        let mut bounce = [0u8; SECTOR_SIZE];
        while pos < end {
            let sector = self.disk.byte_to_sector(pos, cache).unwrap();
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(end - pos);

            if chunk == SECTOR_SIZE {
                // 整扇区直接进调用方缓冲
                cache.read(sector, &mut buf[read..read + SECTOR_SIZE]);
            } else {
                cache.read(sector, &mut bounce);
                buf[read..read + chunk].copy_from_slice(&bounce[sector_off..sector_off + chunk]);
            }

            pos += chunk;
            read += chunk;
        }
        read
    }

    fn write_at(
        &mut self,
        sector: SectorId,
        offset: usize,
        buf: &[u8],
        cache: &BlockCache,
        free_map: &FreeMap,
    ) -> usize {
        if self.deny_write_count > 0 || buf.is_empty() {
            return 0;
        }

        let end = offset + buf.len();
        if end > self.disk.length() {
            let sectors = DiskInode::sectors(end);
            let start = DiskInode::sectors(self.disk.length());
            if !self.disk.allocate(sectors, start, cache, free_map) {
                // 增长失败按短写处理，长度保持原样；
                // 取回磁盘上的原像，分到一半的扇区不回收
                cache.read(sector, layout::bytes_of_mut(&mut self.disk));
                return 0;
            }
            self.disk.set_length(end);
            cache.write(sector, layout::bytes_of(&self.disk));
        }

        let mut pos = offset;
        let mut written = 0;
        let mut bounce = [0u8; SECTOR_SIZE];
        while pos < end {
            let sector = self.disk.byte_to_sector(pos, cache).unwrap();
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(end - pos);

            if chunk == SECTOR_SIZE {
                cache.write(sector, &buf[written..written + SECTOR_SIZE]);
            } else {
                // 读改写半个扇区
                cache.read(sector, &mut bounce);
                bounce[sector_off..sector_off + chunk]
                    .copy_from_slice(&buf[written..written + chunk]);
                cache.write(sector, &bounce);
            }

            pos += chunk;
            written += chunk;
        }
        written
    }
}
