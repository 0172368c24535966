//! 文件系统整机场景，跑在文件充当的块设备上

use std::fs;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use tiny_fs::{Filesys, OpenNode, Path, ROOT_DIR_SECTOR, SECTOR_SIZE};

use crate::BlockFile;

struct Scratch {
    path: PathBuf,
    device: Arc<BlockFile>,
}

/// 临时目录里的定长磁盘镜像
fn scratch(name: &str, sectors: usize) -> Scratch {
    let path = std::env::temp_dir().join(format!(
        "tiny-fs-{name}-{}.img",
        std::process::id()
    ));
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    fd.set_len((sectors * SECTOR_SIZE) as u64).unwrap();

    Scratch {
        path,
        device: Arc::new(BlockFile(Mutex::new(fd))),
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn open_file(fs: &Filesys, path: &str) -> tiny_fs::File {
    match fs.open(path, None) {
        Some(OpenNode::File(file)) => file,
        _ => panic!("no such file: {path}"),
    }
}

#[test]
fn create_write_read() {
    let scratch = scratch("rw", 1024);
    let fs = Filesys::init(scratch.device.clone(), true);

    assert!(fs.create("/f", 0, None));
    let mut file = open_file(&fs, "/f");
    assert_eq!(file.write(b"hello, tiny-fs"), 14);

    let mut read = [0u8; 32];
    assert_eq!(file.read_at(0, &mut read[..14]), 14);
    assert_eq!(&read[..14], b"hello, tiny-fs");
    assert_eq!(file.length(), 14);
    assert_eq!(file.tell(), 14);

    drop(file);
    fs.done();
}

#[test]
fn grow_across_boundaries() {
    let scratch = scratch("grow", 2048);
    let fs = Filesys::init(scratch.device.clone(), true);

    assert!(fs.create("/g", 0, None));
    let file = open_file(&fs, "/g");

    // 写满直接索引
    assert_eq!(file.write_at(10 * SECTOR_SIZE - 1, &[0xA5]), 1);
    assert_eq!(file.length(), 10 * SECTOR_SIZE);

    // 跨进第二张一级索引
    let second_group = (10 + 128) * SECTOR_SIZE;
    assert_eq!(file.write_at(second_group, &[0x5A]), 1);
    assert_eq!(file.length(), second_group + 1);

    let mut byte = [0u8];
    assert_eq!(file.read_at(10 * SECTOR_SIZE - 1, &mut byte), 1);
    assert_eq!(byte[0], 0xA5);
    assert_eq!(file.read_at(second_group, &mut byte), 1);
    assert_eq!(byte[0], 0x5A);

    // 空洞全零
    assert_eq!(file.read_at(2560, &mut byte), 1);
    assert_eq!(byte[0], 0);

    drop(file);
    fs.done();
}

#[test]
fn remove_while_open() {
    let scratch = scratch("rm-open", 1024);
    let fs = Filesys::init(scratch.device.clone(), true);
    let baseline = fs.used_sectors();

    assert!(fs.create("/a", 0, None));
    let file = open_file(&fs, "/a");
    assert_eq!(file.write_at(0, b"still here"), 10);

    // 删除成功，名字随即消失
    assert!(fs.remove("/a", None));
    assert!(fs.open("/a", None).is_none());

    // 握着的句柄照常可读
    let mut read = [0u8; 10];
    assert_eq!(file.read_at(0, &mut read), 10);
    assert_eq!(&read, b"still here");

    // 关闭后扇区全数归还
    drop(file);
    assert_eq!(fs.used_sectors(), baseline);

    fs.done();
}

#[test]
fn directory_semantics() {
    let scratch = scratch("dirs", 1024);
    let fs = Filesys::init(scratch.device.clone(), true);

    assert!(fs.mkdir("/d", None));
    assert!(!fs.mkdir("/d", None));

    let d = fs.chdir("/d", None).unwrap();
    assert!(fs.mkdir("e", Some(&d)));

    // 回到根再从绝对路径进去
    let root = fs.chdir("..", Some(&d)).unwrap();
    assert_eq!(root.inumber(), ROOT_DIR_SECTOR);
    assert!(fs.open("/d/e", None).is_some_and(|node| node.is_dir()));

    // 非空目录拒绝删除
    assert!(!fs.remove("/d", None));
    assert!(fs.remove("/d/e", None));
    assert!(fs.remove("/d", None));

    drop(d);
    drop(root);
    fs.done();
}

#[test]
fn root_parent_is_root() {
    let scratch = scratch("root", 512);
    let fs = Filesys::init(scratch.device.clone(), true);

    let root = fs.chdir("/", None).unwrap();
    let above = fs.chdir("..", Some(&root)).unwrap();
    assert_eq!(above.inumber(), ROOT_DIR_SECTOR);

    let Some(OpenNode::Dir(dot_dot)) = fs.open("..", None) else {
        panic!("`..` must open a directory");
    };
    assert_eq!(dot_dot.inumber(), ROOT_DIR_SECTOR);

    fs.done();
}

#[test]
fn restart_round_trip() {
    let scratch = scratch("restart", 1024);
    let pattern: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();

    let fs = Filesys::init(scratch.device.clone(), true);
    assert!(fs.create("/p", 0, None));
    let file = open_file(&fs, "/p");
    assert_eq!(file.write_at(0, &pattern), pattern.len());
    drop(file);
    fs.done();

    // 重新挂载，缓存从零开始
    let fs = Filesys::init(scratch.device.clone(), false);
    let file = open_file(&fs, "/p");
    let mut read = vec![0u8; pattern.len()];
    assert_eq!(file.read_at(0, &mut read), pattern.len());
    assert_eq!(read, pattern);
    drop(file);
    fs.done();
}

#[test]
fn concurrent_disjoint_writers() {
    let scratch = scratch("conc", 1024);
    let fs = Arc::new(Filesys::init(scratch.device.clone(), true));
    assert!(fs.create("/c", 4 * SECTOR_SIZE, None));

    thread::scope(|scope| {
        for worker in 0u8..4 {
            let fs = Arc::clone(&fs);
            scope.spawn(move || {
                let file = open_file(&fs, "/c");
                let offset = worker as usize * SECTOR_SIZE;
                for round in 0..300u32 {
                    let byte = (worker << 4) | (round % 16) as u8;
                    assert_eq!(
                        file.write_at(offset, &[byte; SECTOR_SIZE]),
                        SECTOR_SIZE
                    );
                }
            });
        }
    });

    // 每个区域都是其写者最后一轮的内容
    let file = open_file(&fs, "/c");
    let mut read = [0u8; SECTOR_SIZE];
    for worker in 0u8..4 {
        assert_eq!(file.read_at(worker as usize * SECTOR_SIZE, &mut read), SECTOR_SIZE);
        let last = (worker << 4) | ((300 - 1) % 16) as u8;
        assert!(read.iter().all(|&b| b == last));
    }

    drop(file);
    Arc::into_inner(fs).unwrap().done();
}

#[test]
fn name_length_limits() {
    let scratch = scratch("names", 512);
    let fs = Filesys::init(scratch.device.clone(), true);

    assert!(!fs.create(&"x".repeat(15), 0, None));
    assert!(fs.create(&"x".repeat(14), 0, None));

    fs.done();
}

#[test]
fn deny_write_freezes_every_handle() {
    let scratch = scratch("deny", 512);
    let fs = Filesys::init(scratch.device.clone(), true);

    assert!(fs.create("/w", SECTOR_SIZE, None));
    let mut holder = open_file(&fs, "/w");
    let other = open_file(&fs, "/w");

    holder.deny_write();
    assert_eq!(other.write_at(0, b"blocked"), 0);

    // 句柄关闭时解除冻结
    drop(holder);
    assert_eq!(other.write_at(0, b"allowed"), 7);

    drop(other);
    fs.done();
}

#[test]
fn readdir_lists_entries() {
    let scratch = scratch("readdir", 512);
    let fs = Filesys::init(scratch.device.clone(), true);

    assert!(fs.mkdir("/d", None));
    assert!(fs.create("/f1", 0, None));
    assert!(fs.create("/f2", 0, None));

    let Some(OpenNode::Dir(mut root)) = fs.open("/", None) else {
        panic!("`/` must open a directory");
    };
    let mut names = Vec::new();
    while let Some(name) = root.read_entry() {
        names.push(name);
    }
    names.sort();
    assert_eq!(names, ["d", "f1", "f2"]);

    drop(root);
    fs.done();
}

#[test]
fn trailing_slashes_are_tolerated() {
    let scratch = scratch("slash", 512);
    let fs = Filesys::init(scratch.device.clone(), true);

    assert!(fs.mkdir("/d", None));
    assert!(fs.chdir("/d/", None).is_some());
    assert!(fs.create("/d/f", 0, None));
    assert!("/d/f".parent_file() == ("/d", "f"));
    assert!(fs.open("/d//f", None).is_some());

    fs.done();
}
