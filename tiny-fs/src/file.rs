//! 打开文件句柄：自带读写游标与拒写状态。
//! 句柄丢弃即关闭inode。

use std::sync::Arc;

use crate::inode::Inode;
use crate::SectorId;

pub struct File {
    inode: Arc<Inode>,
    pos: usize,
    deny_write: bool,
}

impl File {
    /// 包装一个已打开的inode，接管其打开计数
    pub(crate) fn new(inode: Arc<Inode>) -> Self {
        assert!(!inode.is_dir());
        Self {
            inode,
            pos: 0,
            deny_write: false,
        }
    }

    /// 自游标处读取并推进游标
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read = self.inode.read_at(self.pos, buf);
        self.pos += read;
        read
    }

    /// 自游标处写入并推进游标
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let written = self.inode.write_at(self.pos, buf);
        self.pos += written;
        written
    }

    /// 定点读取，不动游标
    #[inline]
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(offset, buf)
    }

    /// 定点写入，不动游标
    #[inline]
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.inode.write_at(offset, buf)
    }

    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.inode.length()
    }

    /// 冻结写入。每个句柄至多生效一次，关闭时自动解除。
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }

    #[inline]
    pub fn inumber(&self) -> SectorId {
        self.inode.inumber()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.deny_write {
            self.inode.allow_write();
        }
        self.inode.close();
    }
}
