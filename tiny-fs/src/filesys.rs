//! # 文件系统层
//!
//! 把底下各层拼装起来：缓冲区、空闲表、打开inode列表与
//! 后台落盘线程同属一个 [`Filesys`] 服务对象，没有环境全局量。
//!
//! 路径自当前目录或根出发逐目录解析；创建、删除、切换目录
//! 三类修改操作由一把锁串行化，只读操作不受其约束。

use std::sync::{Arc, Mutex};

use log::info;

use crate::directory::Dir;
use crate::file::File;
use crate::free_map::FreeMap;
use crate::inode::InodeTable;
use crate::BlockCache;
use crate::BlockDevice;
use crate::FlusherHandle;
use crate::Path;
use crate::SectorId;
use crate::NAME_MAX;

/// 空闲表文件的inode扇区
pub const FREE_MAP_SECTOR: SectorId = SectorId::new(0);
/// 根目录的inode扇区
pub const ROOT_DIR_SECTOR: SectorId = SectorId::new(1);

/// 根目录的初始目录项容量
const ROOT_DIR_ENTRIES: usize = 16;
/// 子目录的初始目录项容量
const SUBDIR_ENTRIES: usize = 4;

/// 文件系统服务
pub struct Filesys {
    cache: Arc<BlockCache>,
    free_map: Arc<FreeMap>,
    inodes: Arc<InodeTable>,
    flusher: Option<FlusherHandle>,
    /// 串行化目录修改类操作
    mutating: Mutex<()>,
}

/// 打开路径的结果：普通文件或目录
pub enum OpenNode {
    File(File),
    Dir(Dir),
}

impl Filesys {
    /// 装配各层并挂载；`format` 要求先格式化设备
    pub fn init(device: Arc<dyn BlockDevice>, format: bool) -> Self {
        let cache = BlockCache::new(Arc::clone(&device));
        let free_map = Arc::new(FreeMap::new(device.total_blocks()));
        let inodes = InodeTable::new(Arc::clone(&cache), Arc::clone(&free_map));
        let flusher = cache.spawn_flusher();

        let fs = Self {
            cache,
            free_map,
            inodes,
            flusher: Some(flusher),
            mutating: Mutex::new(()),
        };
        if format {
            fs.format();
        }
        fs.free_map.open(&fs.inodes);
        info!("file system mounted, {} sectors", fs.free_map.capacity());
        fs
    }

    /// 停机：撤掉落盘线程，写回空闲表与全部脏块
    pub fn done(self) {
        // 收尾在Drop里，这里只是把时机挑明
    }

    /// 在 `path` 处建立 `size` 字节的文件，数据扇区预先分配并清零
    pub fn create(&self, path: &str, size: usize, cwd: Option<&Dir>) -> bool {
        self.make_entry(path, cwd, Some(size))
    }

    /// 在 `path` 处建立空目录
    pub fn mkdir(&self, path: &str, cwd: Option<&Dir>) -> bool {
        self.make_entry(path, cwd, None)
    }

    /// 打开文件或目录
    pub fn open(&self, path: &str, cwd: Option<&Dir>) -> Option<OpenNode> {
        if path.is_empty() {
            return None;
        }
        let (prefix, name) = path.parent_file();
        let dir = self.resolve_dir(prefix, cwd)?;

        let inode = match name {
            "" | "." => dir.reopen_inode(),
            ".." => self.inodes.open(dir.parent()),
            name => {
                let sector = dir.lookup(name)?;
                self.inodes.open(sector)
            }
        };

        Some(if inode.is_dir() {
            OpenNode::Dir(Dir::open(inode))
        } else {
            OpenNode::File(File::new(inode))
        })
    }

    /// 删除文件或空目录。打开中的inode等最后一个关闭者回收。
    pub fn remove(&self, path: &str, cwd: Option<&Dir>) -> bool {
        let _guard = self.mutating.lock().unwrap();

        let (prefix, name) = path.parent_file();
        if name.is_empty() || name == "." || name == ".." {
            return false;
        }
        let Some(dir) = self.resolve_dir(prefix, cwd) else {
            return false;
        };
        dir.remove(name)
    }

    /// 切换当前目录：整条路径都必须是目录
    pub fn chdir(&self, path: &str, cwd: Option<&Dir>) -> Option<Dir> {
        let _guard = self.mutating.lock().unwrap();

        if path.is_empty() {
            return None;
        }
        self.resolve_dir(path, cwd)
    }

    /// 打开根目录
    pub fn root_dir(&self) -> Dir {
        Dir::open(self.inodes.open(ROOT_DIR_SECTOR))
    }

    /// 已占用的扇区数，诊断用
    pub fn used_sectors(&self) -> usize {
        self.free_map.used()
    }

    pub fn total_sectors(&self) -> usize {
        self.free_map.capacity()
    }
}

impl Filesys {
    fn format(&self) {
        info!("formatting file system");
        self.free_map.create(&self.inodes);
        assert!(
            Dir::create(ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR, &self.inodes),
            "root directory creation failed"
        );
        self.free_map.flush(&self.inodes);
    }

    /// 逐组件走到 `path` 指向的目录。
    /// 绝对路径从根出发，否则从当前目录出发；根的`..`原地不动。
    fn resolve_dir(&self, path: &str, cwd: Option<&Dir>) -> Option<Dir> {
        let mut dir = match cwd {
            Some(cwd) if path.is_relative() => cwd.reopen(),
            _ => self.root_dir(),
        };

        for component in path.split('/').filter(|c| !c.is_empty()) {
            match component {
                "." => {}
                ".." => {
                    if dir.inumber() != ROOT_DIR_SECTOR {
                        dir = Dir::open(self.inodes.open(dir.parent()));
                    }
                }
                name => {
                    let sector = dir.lookup(name)?;
                    let inode = self.inodes.open(sector);
                    if !inode.is_dir() {
                        inode.close();
                        return None;
                    }
                    dir = Dir::open(inode);
                }
            }
        }
        Some(dir)
    }

    fn make_entry(&self, path: &str, cwd: Option<&Dir>, file_size: Option<usize>) -> bool {
        let _guard = self.mutating.lock().unwrap();

        let (prefix, name) = path.parent_file();
        if name.is_empty() || name == "." || name == ".." || name.len() > NAME_MAX {
            return false;
        }
        let Some(dir) = self.resolve_dir(prefix, cwd) else {
            return false;
        };
        let Some(sector) = self.free_map.allocate(1) else {
            return false;
        };

        let created = match file_size {
            Some(size) => self.inodes.create(sector, size, SectorId::NONE),
            None => Dir::create(sector, SUBDIR_ENTRIES, dir.inumber(), &self.inodes),
        };
        let success = created && dir.add(name, sector);
        if !success {
            // inode扇区收回；建到一半的数据扇区随之成为孤儿
            self.free_map.release(sector, 1);
        }
        success
    }
}

impl Drop for Filesys {
    fn drop(&mut self) {
        let Some(flusher) = self.flusher.take() else {
            return;
        };
        flusher.stop();
        self.free_map.flush(&self.inodes);
        self.cache.flush();
        info!("file system shut down");
    }
}

impl OpenNode {
    #[inline]
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir(_))
    }

    pub fn inumber(&self) -> SectorId {
        match self {
            Self::File(file) => file.inumber(),
            Self::Dir(dir) => dir.inumber(),
        }
    }

    pub fn into_file(self) -> Option<File> {
        match self {
            Self::File(file) => Some(file),
            Self::Dir(_) => None,
        }
    }

    pub fn into_dir(self) -> Option<Dir> {
        match self {
            Self::File(_) => None,
            Self::Dir(dir) => Some(dir),
        }
    }
}
