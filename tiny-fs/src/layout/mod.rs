//! # 磁盘数据结构层
//!
//! 磁盘上只有三种结构：inode、索引块、目录项数组。
//! 全部是固定布局的`repr(C)`类型，整体进出缓冲区。

mod dir_entry;
mod inode;

use core::mem;
use core::ptr;
use core::slice;

pub use dir_entry::DirEntry;
pub use inode::{DiskInode, IndirectBlock};
pub use inode::{DIRECT_CAP, DIRECT_COUNT, DOUBLE_CAP, INDIRECT_CAP, INDIRECT_COUNT, INDIRECT_SLOTS};

/// 磁盘结构的字节视图。仅限本层中无填充的`repr(C)`类型。
pub(crate) fn bytes_of<T>(value: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(ptr::from_ref(value).cast(), mem::size_of::<T>()) }
}

pub(crate) fn bytes_of_mut<T>(value: &mut T) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(ptr::from_mut(value).cast(), mem::size_of::<T>()) }
}
