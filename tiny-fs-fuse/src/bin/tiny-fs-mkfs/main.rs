mod cli;

use std::fs::OpenOptions;
use std::io;
use std::sync::{Arc, Mutex};

use clap::Parser;
use cli::Cli;
use tiny_fs::{Filesys, OpenNode, SECTOR_SIZE};
use tiny_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let block_file = Arc::new(BlockFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.image)?;
        fd.set_len((cli.sectors * SECTOR_SIZE) as u64)?;

        fd
    })));

    let fs = Filesys::init(block_file, true);

    for path in &cli.pack {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("host file name is not valid UTF-8");
        let data = std::fs::read(path)?;
        println!("packing {name:?}, {} bytes", data.len());

        assert!(fs.create(name, data.len(), None), "create {name:?} failed");
        let Some(OpenNode::File(file)) = fs.open(name, None) else {
            panic!("open {name:?} failed");
        };
        assert_eq!(file.write_at(0, &data), data.len());
    }

    fs.done();
    Ok(())
}
