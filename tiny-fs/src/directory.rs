//! # 目录层
//!
//! 目录就是一个inode，文件内容为定长目录项的数组。
//! 查找、追加、删除都是对这个文件的顺序扫描；
//! `.` 与 `..` 不落盘，由路径解析借助父目录链接处理。

use std::sync::Arc;

use crate::inode::{Inode, InodeTable};
use crate::layout::DirEntry;
use crate::SectorId;
use crate::NAME_MAX;

/// 打开的目录
pub struct Dir {
    inode: Arc<Inode>,
    /// [`Dir::read_entry`] 的游标，字节偏移
    pos: usize,
}

impl Dir {
    /// 在 `sector` 上建立可容纳 `entries` 个目录项的空目录。
    /// 根目录的父目录是它自己。
    pub fn create(
        sector: SectorId,
        entries: usize,
        parent: SectorId,
        inodes: &InodeTable,
    ) -> bool {
        inodes.create(sector, entries * DirEntry::SIZE, parent)
    }

    /// 把一个已打开的inode包装成目录句柄，接管其打开计数
    pub fn open(inode: Arc<Inode>) -> Self {
        assert!(inode.is_dir());
        Self { inode, pos: 0 }
    }

    /// 复制句柄，游标归零
    pub fn reopen(&self) -> Self {
        self.inode.reopen();
        Self {
            inode: Arc::clone(&self.inode),
            pos: 0,
        }
    }

    /// 按名字查找目录项，返回其inode扇区
    pub fn lookup(&self, name: &str) -> Option<SectorId> {
        let mut entry = DirEntry::empty();
        for offset in (0..self.inode.length()).step_by(DirEntry::SIZE) {
            assert_eq!(
                self.inode.read_at(offset, entry.as_bytes_mut()),
                DirEntry::SIZE
            );
            if entry.in_use() && entry.name() == name {
                return Some(entry.sector());
            }
        }
        None
    }

    /// 登记新目录项。名字越限、重名即失败。
    pub fn add(&self, name: &str, sector: SectorId) -> bool {
        if name.is_empty() || name.len() > NAME_MAX || self.lookup(name).is_some() {
            return false;
        }

        // 复用空槽位，没有就在文件末尾追加
        let mut slot = self.inode.length();
        let mut entry = DirEntry::empty();
        for offset in (0..self.inode.length()).step_by(DirEntry::SIZE) {
            assert_eq!(
                self.inode.read_at(offset, entry.as_bytes_mut()),
                DirEntry::SIZE
            );
            if !entry.in_use() {
                slot = offset;
                break;
            }
        }

        let entry = DirEntry::new(name, sector);
        self.inode.write_at(slot, entry.as_bytes()) == DirEntry::SIZE
    }

    /// 删除目录项并标记其inode待回收。
    /// 相对项与非空目录不可删除。
    pub fn remove(&self, name: &str) -> bool {
        if name == "." || name == ".." {
            return false;
        }

        let mut entry = DirEntry::empty();
        let mut found = None;
        for offset in (0..self.inode.length()).step_by(DirEntry::SIZE) {
            assert_eq!(
                self.inode.read_at(offset, entry.as_bytes_mut()),
                DirEntry::SIZE
            );
            if entry.in_use() && entry.name() == name {
                found = Some((offset, entry.sector()));
                break;
            }
        }
        let Some((offset, sector)) = found else {
            return false;
        };

        let target = self.inode.table().open(sector);
        if target.is_dir() && !is_empty(&target) {
            target.close();
            return false;
        }

        assert_eq!(
            self.inode.write_at(offset, DirEntry::empty().as_bytes()),
            DirEntry::SIZE
        );
        target.remove();
        target.close();
        true
    }

    /// 给出下一个在用目录项的名字并推进游标
    pub fn read_entry(&mut self) -> Option<String> {
        let mut entry = DirEntry::empty();
        while self.pos < self.inode.length() {
            assert_eq!(
                self.inode.read_at(self.pos, entry.as_bytes_mut()),
                DirEntry::SIZE
            );
            self.pos += DirEntry::SIZE;
            if entry.in_use() {
                return Some(entry.name().to_owned());
            }
        }
        None
    }

    /// 父目录的inode扇区
    #[inline]
    pub fn parent(&self) -> SectorId {
        self.inode.parent()
    }

    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.inode.inumber()
    }

    /// 交出inode并增加其打开计数
    pub(crate) fn reopen_inode(&self) -> Arc<Inode> {
        self.inode.reopen();
        Arc::clone(&self.inode)
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        self.inode.close();
    }
}

fn is_empty(inode: &Inode) -> bool {
    let mut entry = DirEntry::empty();
    for offset in (0..inode.length()).step_by(DirEntry::SIZE) {
        assert_eq!(inode.read_at(offset, entry.as_bytes_mut()), DirEntry::SIZE);
        if entry.in_use() {
            return false;
        }
    }
    true
}
