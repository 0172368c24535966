//! # 缓冲区层
//!
//! 固定容量的扇区缓存池，坐落在索引节点层与块设备之间。
//! 上层对设备的读写都经过缓存，且**操作扇区时一定在缓冲区当中**。
//!
//! 缓存采取**写回**策略：写操作只置脏位，不触碰设备；
//! 脏块由后台落盘线程周期性写出，或在驱逐、停机时写出。
//! 每次加载都会派出帮手线程预读下一扇区。
//!
//! ## 槽位同步
//!
//! 每个槽位有两套彼此独立的状态：
//!
//! - 身份(`sector`字段)：认领在LRU锁内进行；清空身份的一方先在
//!   槽位锁内确认槽位无人使用。查找扫描本身有竞争，
//!   命中后须在槽位锁内复核；
//! - 读写协议(`flags` + `readers`)：写者独占，读者并行，
//!   加载中(BUSY)双方都等。

use core::array;
use core::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

use enumflags2::{bitflags, BitFlags};
use log::debug;
use spin::Mutex as SpinMutex;

use crate::sync::Semaphore;
use crate::BlockDevice;
use crate::DataBlock;
use crate::SectorId;
use crate::SECTOR_SIZE;

/// 缓存槽位总数
pub const MAX_CACHE_SIZE: usize = 64;

/// 后台落盘的间隔
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// 空闲槽位的身份标记
const RAW_NONE: u32 = u32::MAX;

/// 槽位状态位；空集即VALID
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufFlag {
    /// 已认领，设备I/O进行中
    Busy = 0b001,
    /// 缓存内容新于磁盘
    Dirty = 0b010,
    /// 写者独占中
    Writer = 0b100,
}

struct BufState {
    flags: BitFlags<BufFlag>,
    readers: u32,
}

/// 缓存槽位。
///
/// 数据区不设锁，由读写协议守护：BUSY期间认领者独占，
/// WRITER期间写者独占，`readers > 0` 期间只有读者。
struct BufEntry {
    /// 槽位身份，[`RAW_NONE`] 表示空闲
    sector: AtomicU32,
    state: Mutex<BufState>,
    rw: Condvar,
    data: UnsafeCell<DataBlock>,
}

unsafe impl Sync for BufEntry {}

/// 扇区缓存池
pub struct BlockCache {
    device: Arc<dyn BlockDevice>,
    entries: [BufEntry; MAX_CACHE_SIZE],
    /// LRU顺序的占用槽位索引，队首最久未用
    lru: SpinMutex<VecDeque<usize>>,
    me: Weak<BlockCache>,
}

/// 后台落盘线程的句柄
pub struct FlusherHandle {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    thread: thread::JoinHandle<()>,
}

impl BlockCache {
    pub fn new(device: Arc<dyn BlockDevice>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            device,
            entries: array::from_fn(|_| BufEntry::new()),
            lru: SpinMutex::new(VecDeque::with_capacity(MAX_CACHE_SIZE)),
            me: me.clone(),
        })
    }

    /// 读出整个扇区到 `dst`
    pub fn read(&self, sector: SectorId, dst: &mut [u8]) {
        assert_eq!(dst.len(), SECTOR_SIZE);
        loop {
            let index = match self.lookup(sector) {
                Some(index) => index,
                None => self.load(sector),
            };
            // 等待期间槽位可能易主，失败则重新定位
            if !self.acquire_read(index, sector) {
                continue;
            }
            dst.copy_from_slice(unsafe { &*self.entries[index].data.get() });
            self.release_read(index);
            self.promote(index);
            return;
        }
    }

    /// 以 `src` 覆写整个扇区，只置脏位不落盘
    pub fn write(&self, sector: SectorId, src: &[u8]) {
        assert_eq!(src.len(), SECTOR_SIZE);
        loop {
            let index = match self.lookup(sector) {
                Some(index) => index,
                None => self.load(sector),
            };
            if !self.acquire_write(index, sector) {
                continue;
            }
            unsafe { &mut *self.entries[index].data.get() }.copy_from_slice(src);
            self.release_write(index);
            self.promote(index);
            return;
        }
    }

    /// 后台落盘：以读者身份写出每个脏块，释放读锁时清除脏位
    pub fn write_behind(&self) {
        for index in 0..MAX_CACHE_SIZE {
            let entry = &self.entries[index];
            let raw = entry.sector.load(Ordering::Acquire);
            if raw == RAW_NONE {
                continue;
            }

            let mut state = entry.state.lock().unwrap();
            while state.flags.intersects(BufFlag::Writer | BufFlag::Busy) {
                if entry.sector.load(Ordering::Acquire) != raw {
                    break;
                }
                state = entry.rw.wait(state).unwrap();
            }
            if entry.sector.load(Ordering::Acquire) != raw
                || !state.flags.contains(BufFlag::Dirty)
            {
                continue;
            }
            state.readers += 1;
            drop(state);

            self.device
                .write_block(raw as usize, unsafe { &*entry.data.get() });

            let mut state = entry.state.lock().unwrap();
            state.readers -= 1;
            state.flags.remove(BufFlag::Dirty);
            if state.readers == 0 {
                entry.rw.notify_all();
            }
        }
    }

    /// 停机收尾：无条件写出所有脏块并释放其槽位。
    /// 落盘只在各槽位自己的锁内进行，LRU队列事后修剪。
    pub fn flush(&self) {
        for index in 0..MAX_CACHE_SIZE {
            let entry = &self.entries[index];
            let mut state = entry.state.lock().unwrap();
            if !state.flags.contains(BufFlag::Dirty) {
                continue;
            }
            let raw = entry.sector.load(Ordering::Acquire);
            self.device
                .write_block(raw as usize, unsafe { &*entry.data.get() });
            state.flags = BitFlags::empty();
            entry.sector.store(RAW_NONE, Ordering::Release);
            drop(state);

            let mut lru = self.lru.lock();
            if let Some(at) = lru.iter().position(|&i| i == index) {
                lru.remove(at);
            }
        }
    }

    /// 启动周期落盘线程
    pub fn spawn_flusher(&self) -> FlusherHandle {
        let cache = self.me.upgrade().unwrap();
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("flusher".into())
            .spawn(move || {
                let (stopped, wake) = &*flag;
                let mut guard = stopped.lock().unwrap();
                loop {
                    let (next, _) = wake.wait_timeout(guard, FLUSH_INTERVAL).unwrap();
                    guard = next;
                    if *guard {
                        return;
                    }
                    drop(guard);
                    cache.write_behind();
                    guard = stopped.lock().unwrap();
                }
            })
            .unwrap();
        FlusherHandle { shutdown, thread }
    }
}

impl BlockCache {
    /// 线性扫描定位扇区。扫描本身有竞争，命中的槽位须在
    /// 加锁后复核身份。
    fn lookup(&self, sector: SectorId) -> Option<usize> {
        let raw = u32::from(sector);
        (0..MAX_CACHE_SIZE).find(|&i| self.entries[i].sector.load(Ordering::Acquire) == raw)
    }

    /// 缓存未命中：认领槽位、派出预读帮手、从设备加载
    fn load(&self, sector: SectorId) -> usize {
        let (index, fresh) = self.claim(sector);
        if !fresh {
            // 他人正在加载同一扇区，读写路径自会等其发布
            return index;
        }

        // 帮手认领到槽位就举手，发起者不等它读完磁盘
        let next = sector + 1;
        let mut handshake = None;
        if usize::from(next) < self.device.total_blocks() {
            let sema = Arc::new(Semaphore::new(0));
            let cache = self.me.upgrade().unwrap();
            let claimed = Arc::clone(&sema);
            let spawned = thread::Builder::new()
                .name("read-ahead".into())
                .spawn(move || cache.read_ahead(next, claimed));
            // 预读尽力而为，线程起不来就算了
            if spawned.is_ok() {
                handshake = Some(sema);
            }
        }

        self.fill(index, sector);

        if let Some(sema) = handshake {
            sema.down();
        }
        index
    }

    /// 预读帮手：目标已在缓存或认领完成即举手
    fn read_ahead(&self, sector: SectorId, claimed: Arc<Semaphore>) {
        if self.lookup(sector).is_some() {
            claimed.up();
            return;
        }
        let (index, fresh) = self.claim(sector);
        claimed.up();
        if fresh {
            self.fill(index, sector);
        }
    }

    /// 为 `sector` 认领空闲槽位，返回 `(索引, 是否由本次认领)`。
    /// 认领始终在LRU锁内进行，与牺牲者的挑选互斥。
    fn claim(&self, sector: SectorId) -> (usize, bool) {
        let raw = u32::from(sector);
        loop {
            let mut lru = self.lru.lock();

            // 并发加载竞争：他人抢先认领了同一扇区
            if let Some(index) =
                (0..MAX_CACHE_SIZE).find(|&i| self.entries[i].sector.load(Ordering::Acquire) == raw)
            {
                return (index, false);
            }

            for (index, entry) in self.entries.iter().enumerate() {
                let Ok(mut state) = entry.state.try_lock() else {
                    continue;
                };
                if entry.sector.load(Ordering::Acquire) != RAW_NONE {
                    continue;
                }
                debug_assert!(state.flags.is_empty() && state.readers == 0);
                state.flags.insert(BufFlag::Busy);
                entry.sector.store(raw, Ordering::Release);
                lru.push_back(index);
                return (index, true);
            }

            // 没有空闲槽位，驱逐后重试
            drop(lru);
            self.evict();
        }
    }

    /// 从设备读入已认领的槽位并发布。BUSY期间数据为认领者独占。
    fn fill(&self, index: usize, sector: SectorId) {
        let entry = &self.entries[index];
        self.device
            .read_block(usize::from(sector), unsafe { &mut *entry.data.get() });
        let mut state = entry.state.lock().unwrap();
        state.flags.remove(BufFlag::Busy);
        entry.rw.notify_all();
    }

    /// 自最久未用端起挑选驱逐对象，使用中的槽位跳过；
    /// 全员在用时让出CPU重扫。
    ///
    /// 牺牲者在LRU锁内以BUSY占住并摘出队列，脏块落盘放在锁外，
    /// 设备I/O期间其余槽位的认领与晋升不受阻塞。
    fn evict(&self) {
        loop {
            let mut victim = None;
            {
                let mut lru = self.lru.lock();
                for (at, &index) in lru.iter().enumerate() {
                    let entry = &self.entries[index];
                    let Ok(mut state) = entry.state.try_lock() else {
                        continue;
                    };
                    if state.readers > 0
                        || state.flags.intersects(BufFlag::Writer | BufFlag::Busy)
                    {
                        continue;
                    }
                    // 占住槽位，出锁后别人既认领不到也用不了
                    state.flags.insert(BufFlag::Busy);
                    victim = Some((at, index, state.flags.contains(BufFlag::Dirty)));
                    break;
                }
                if let Some((at, _, _)) = victim {
                    lru.remove(at);
                }
            }

            let Some((_, index, dirty)) = victim else {
                thread::yield_now();
                continue;
            };

            let entry = &self.entries[index];
            let raw = entry.sector.load(Ordering::Acquire);
            if dirty {
                self.device
                    .write_block(raw as usize, unsafe { &*entry.data.get() });
            }

            let mut state = entry.state.lock().unwrap();
            state.flags = BitFlags::empty();
            entry.sector.store(RAW_NONE, Ordering::Release);
            entry.rw.notify_all();
            debug!("evicted sector {raw}");
            return;
        }
    }

    /// 读者入场。等待期间槽位易主则返回false，调用方重新定位。
    fn acquire_read(&self, index: usize, sector: SectorId) -> bool {
        let entry = &self.entries[index];
        let raw = u32::from(sector);
        let mut state = entry.state.lock().unwrap();
        loop {
            if entry.sector.load(Ordering::Acquire) != raw {
                return false;
            }
            if !state.flags.intersects(BufFlag::Writer | BufFlag::Busy) {
                break;
            }
            state = entry.rw.wait(state).unwrap();
        }
        state.readers += 1;
        true
    }

    fn release_read(&self, index: usize) {
        let entry = &self.entries[index];
        let mut state = entry.state.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            entry.rw.notify_all();
        }
    }

    /// 写者入场：等到既无读者也无写者
    fn acquire_write(&self, index: usize, sector: SectorId) -> bool {
        let entry = &self.entries[index];
        let raw = u32::from(sector);
        let mut state = entry.state.lock().unwrap();
        loop {
            if entry.sector.load(Ordering::Acquire) != raw {
                return false;
            }
            if state.readers == 0 && !state.flags.intersects(BufFlag::Writer | BufFlag::Busy) {
                break;
            }
            state = entry.rw.wait(state).unwrap();
        }
        state.flags.insert(BufFlag::Writer);
        true
    }

    fn release_write(&self, index: usize) {
        let entry = &self.entries[index];
        let mut state = entry.state.lock().unwrap();
        state.flags.remove(BufFlag::Writer);
        state.flags.insert(BufFlag::Dirty);
        entry.rw.notify_all();
    }

    /// 移到最近使用端。槽位若已被释放则不在队列中，
    /// 留待下次认领时重新入队。
    fn promote(&self, index: usize) {
        let mut lru = self.lru.lock();
        if let Some(at) = lru.iter().position(|&i| i == index) {
            lru.remove(at);
            lru.push_back(index);
        }
    }
}

impl BufEntry {
    fn new() -> Self {
        Self {
            sector: AtomicU32::new(RAW_NONE),
            state: Mutex::new(BufState {
                flags: BitFlags::empty(),
                readers: 0,
            }),
            rw: Condvar::new(),
            data: UnsafeCell::new([0; SECTOR_SIZE]),
        }
    }
}

impl FlusherHandle {
    /// 通知落盘线程退出并等其归来
    pub fn stop(self) {
        let (stopped, wake) = &*self.shutdown;
        *stopped.lock().unwrap() = true;
        wake.notify_all();
        self.thread.join().unwrap();
    }
}
