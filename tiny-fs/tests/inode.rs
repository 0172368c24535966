mod common;

use std::sync::Arc;

use common::MemDisk;
use tiny_fs::{
    BlockCache, FreeMap, InodeTable, SectorId, DIRECT_CAP, INDIRECT_CAP, INDIRECT_SLOTS,
    SECTOR_SIZE,
};

fn setup(sectors: usize) -> (Arc<FreeMap>, Arc<InodeTable>) {
    let disk = Arc::new(MemDisk::new(sectors));
    let cache = BlockCache::new(disk);
    let free_map = Arc::new(FreeMap::new(sectors));
    let inodes = InodeTable::new(cache, Arc::clone(&free_map));
    (free_map, inodes)
}

#[test]
fn grow_across_index_boundaries() {
    let (free_map, inodes) = setup(4096);
    let sector = free_map.allocate(1).unwrap();
    assert!(inodes.create(sector, 0, SectorId::NONE));
    let inode = inodes.open(sector);
    assert_eq!(inode.length(), 0);

    // 写满直接索引的最后一字节
    let direct_end = DIRECT_CAP * SECTOR_SIZE;
    assert_eq!(inode.write_at(direct_end - 1, &[0xAA]), 1);
    assert_eq!(inode.length(), direct_end);

    // 跨进第二张一级索引
    let second_group = (DIRECT_CAP + INDIRECT_SLOTS) * SECTOR_SIZE;
    assert_eq!(inode.write_at(second_group, &[0xBB]), 1);
    assert_eq!(inode.length(), second_group + 1);

    // 跨进二级索引区域
    let double_start = INDIRECT_CAP * SECTOR_SIZE;
    assert_eq!(inode.write_at(double_start, &[0xCC]), 1);
    assert_eq!(inode.length(), double_start + 1);

    // 读回写入的字节
    let mut byte = [0u8];
    assert_eq!(inode.read_at(direct_end - 1, &mut byte), 1);
    assert_eq!(byte[0], 0xAA);
    assert_eq!(inode.read_at(second_group, &mut byte), 1);
    assert_eq!(byte[0], 0xBB);
    assert_eq!(inode.read_at(double_start, &mut byte), 1);
    assert_eq!(byte[0], 0xCC);

    // 空洞读出来全是零
    let mut gap = [0xFFu8; SECTOR_SIZE];
    assert_eq!(inode.read_at(5 * SECTOR_SIZE, &mut gap), SECTOR_SIZE);
    assert!(gap.iter().all(|&b| b == 0));
    let mut gap = [0xFFu8; SECTOR_SIZE];
    assert_eq!(inode.read_at(direct_end, &mut gap), SECTOR_SIZE);
    assert!(gap.iter().all(|&b| b == 0));

    // 越过末尾即短读
    assert_eq!(inode.read_at(double_start + 1, &mut byte), 0);

    inode.close();
}

#[test]
fn release_returns_every_sector() {
    let (free_map, inodes) = setup(2048);
    let baseline = free_map.used();

    // 跨进一级索引区域的文件
    let sector = free_map.allocate(1).unwrap();
    assert!(inodes.create(sector, 300_000, SectorId::NONE));
    assert!(free_map.used() > baseline);

    let inode = inodes.open(sector);
    inode.remove();
    inode.close();

    // 数据扇区、索引扇区连同inode扇区全部归还
    assert_eq!(free_map.used(), baseline);
}

#[test]
fn hole_write_zero_fills() {
    let (free_map, inodes) = setup(256);
    let sector = free_map.allocate(1).unwrap();
    assert!(inodes.create(sector, 0, SectorId::NONE));
    let inode = inodes.open(sector);

    assert_eq!(inode.write_at(5000, b"X"), 1);
    assert_eq!(inode.length(), 5001);

    let mut gap = vec![0xFFu8; 5000];
    assert_eq!(inode.read_at(0, &mut gap), 5000);
    assert!(gap.iter().all(|&b| b == 0));

    inode.close();
}

#[test]
fn exhausted_free_map_means_short_write() {
    let (free_map, inodes) = setup(128);
    let sector = free_map.allocate(1).unwrap();
    assert!(inodes.create(sector, 0, SectorId::NONE));
    let inode = inodes.open(sector);

    // 设备装不下这么多扇区，增长失败，长度不动
    let huge = vec![0x42u8; 130 * SECTOR_SIZE];
    assert_eq!(inode.write_at(0, &huge), 0);
    assert_eq!(inode.length(), 0);

    inode.close();
}

#[test]
fn deny_write_short_writes() {
    let (free_map, inodes) = setup(256);
    let sector = free_map.allocate(1).unwrap();
    assert!(inodes.create(sector, SECTOR_SIZE, SectorId::NONE));
    let inode = inodes.open(sector);

    inode.deny_write();
    assert_eq!(inode.write_at(0, b"nope"), 0);

    inode.allow_write();
    assert_eq!(inode.write_at(0, b"fine"), 4);

    inode.close();
}

#[test]
fn same_sector_opens_share_one_inode() {
    let (free_map, inodes) = setup(256);
    let sector = free_map.allocate(1).unwrap();
    assert!(inodes.create(sector, 0, SectorId::NONE));

    let first = inodes.open(sector);
    let second = inodes.open(sector);
    assert!(Arc::ptr_eq(&first, &second));

    first.close();
    second.close();
}
