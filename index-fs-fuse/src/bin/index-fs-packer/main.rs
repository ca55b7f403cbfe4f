mod cli;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use index_fs::{DiskInodeKind, IndexFileSystem, SECTOR_SIZE, SectorId};
use index_fs_fuse::{BlockFile, io_error};

use self::cli::{Cli, Command};

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Pack {
            source,
            out_dir,
            sectors,
        } => pack(&source, &out_dir, sectors),
        Command::Cat { image, sector } => cat(&image, SectorId::new(sector)),
    }
}

fn pack(source: &Path, out_dir: &Path, sectors: u32) -> io::Result<()> {
    let disk_size = sectors as u64 * SECTOR_SIZE as u64;
    log::info!("source={source:?}, {sectors} sectors ({disk_size} bytes)");

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_dir.join("fs.img"))?;
    fd.set_len(disk_size)?;

    let efs = IndexFileSystem::format(Arc::new(BlockFile::new(fd)?), sectors).map_err(io_error)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let data = fs::read(entry.path())?;

        let sector = efs
            .create(data.len(), DiskInodeKind::File)
            .map_err(io_error)?;
        let inode = efs.open_inode(sector).map_err(io_error)?;
        let written = inode.write_at(0, &data).map_err(io_error);
        efs.close_inode(inode).map_err(io_error)?;
        written?;

        log::info!("{:?} -> sector {sector}", entry.file_name());
    }

    efs.shutdown().map_err(io_error)
}

fn cat(image: &Path, sector: SectorId) -> io::Result<()> {
    let fd = OpenOptions::new().read(true).write(true).open(image)?;
    let efs = IndexFileSystem::open(Arc::new(BlockFile::new(fd)?)).map_err(io_error)?;

    let inode = efs.open_inode(sector).map_err(io_error)?;
    let mut data = vec![0; inode.length().map_err(io_error)?];
    let read = inode.read_at(0, &mut data).map_err(io_error);
    efs.close_inode(inode).map_err(io_error)?;

    io::stdout().write_all(&data[..read?])
}
