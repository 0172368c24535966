//! 测试用内存盘，顺带记录每个扇区的设备I/O次数

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tiny_fs::{BlockDevice, SECTOR_SIZE};

pub struct MemDisk {
    sectors: Vec<Mutex<[u8; SECTOR_SIZE]>>,
    reads: Vec<AtomicUsize>,
    writes: Vec<AtomicUsize>,
}

#[allow(dead_code)]
impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: (0..sectors).map(|_| Mutex::new([0; SECTOR_SIZE])).collect(),
            reads: (0..sectors).map(|_| AtomicUsize::new(0)).collect(),
            writes: (0..sectors).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// 该扇区被设备读了几次
    pub fn reads(&self, sector: usize) -> usize {
        self.reads[sector].load(Ordering::SeqCst)
    }

    /// 该扇区被设备写了几次
    pub fn writes(&self, sector: usize) -> usize {
        self.writes[sector].load(Ordering::SeqCst)
    }

    /// 设备上的当前内容
    pub fn content(&self, sector: usize) -> [u8; SECTOR_SIZE] {
        *self.sectors[sector].lock().unwrap()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&*self.sectors[block_id].lock().unwrap());
        self.reads[block_id].fetch_add(1, Ordering::SeqCst);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.sectors[block_id].lock().unwrap().copy_from_slice(buf);
        self.writes[block_id].fetch_add(1, Ordering::SeqCst);
    }

    fn total_blocks(&self) -> usize {
        self.sectors.len()
    }
}
