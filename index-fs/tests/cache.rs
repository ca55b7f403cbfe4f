mod common;

use std::thread;

use index_fs::{BufferCache, CACHE_CAPACITY, Error, SectorId};

use common::TestDisk;

fn sector(id: usize) -> SectorId {
    SectorId::new(id as u32)
}

#[test]
fn eviction_durability() {
    let disk = TestDisk::new(256);
    let cache = BufferCache::new(disk.clone());

    cache.write(sector(5), b"persist", 0).unwrap();
    assert_eq!(&disk.raw(5)[..7], &[0; 7]);

    for id in 10..10 + CACHE_CAPACITY + 6 {
        cache.read(sector(id), &mut [0u8; 4], 0).unwrap();
    }
    assert!(!cache.contains(sector(5)));
    assert_eq!(&disk.raw(5)[..7], b"persist");

    let mut buf = [0u8; 7];
    cache.read(sector(5), &mut buf, 0).unwrap();
    assert_eq!(&buf, b"persist");
}

#[test]
fn fresh_slots_survive() {
    let disk = TestDisk::new(256);
    let cache = BufferCache::new(disk.clone());

    for id in 0..CACHE_CAPACITY - 1 {
        cache.read(sector(id), &mut [0u8; 1], 0).unwrap();
    }
    cache.read(sector(200), &mut [0u8; 1], 0).unwrap();
    assert!((0..CACHE_CAPACITY - 1).all(|id| cache.contains(sector(id))));
    assert!(cache.contains(sector(200)));
}

#[test]
fn second_chance() {
    let disk = TestDisk::new(256);
    let cache = BufferCache::new(disk.clone());

    for id in 0..CACHE_CAPACITY {
        cache.read(sector(id), &mut [0u8; 1], 0).unwrap();
    }
    // 一整圈清零后换出 0 号槽位，指针停在 1 号
    cache.read(sector(100), &mut [0u8; 1], 0).unwrap();
    assert!(!cache.contains(sector(0)));

    // 除最后一个槽位外都再访问一次
    for id in 1..CACHE_CAPACITY - 1 {
        cache.read(sector(id), &mut [0u8; 1], 0).unwrap();
    }
    let reads = disk.reads();
    cache.read(sector(101), &mut [0u8; 1], 0).unwrap();
    assert_eq!(disk.reads(), reads + 1);

    assert!(!cache.contains(sector(CACHE_CAPACITY - 1)));
    assert!((1..CACHE_CAPACITY - 1).all(|id| cache.contains(sector(id))));
    assert!(cache.contains(sector(100)));
}

#[test]
fn hits_skip_device() {
    let disk = TestDisk::new(16);
    let cache = BufferCache::new(disk.clone());

    cache.write(sector(3), &[1, 2, 3], 0).unwrap();
    for _ in 0..10 {
        let mut buf = [0u8; 3];
        cache.read(sector(3), &mut buf, 0).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }
    assert_eq!(disk.reads(), 1);
    assert_eq!(disk.writes(), 0);
}

#[test]
fn flush_only_dirty() {
    let disk = TestDisk::new(16);
    let cache = BufferCache::new(disk.clone());

    for id in 0..8 {
        cache.read(sector(id), &mut [0u8; 1], 0).unwrap();
    }
    cache.flush_all().unwrap();
    assert_eq!(disk.writes(), 0);

    cache.write(sector(2), &[9], 511).unwrap();
    cache.write(sector(6), &[9], 0).unwrap();
    cache.sync(sector(6)).unwrap();
    assert_eq!(disk.writes(), 1);
    assert_eq!(disk.raw(6)[0], 9);

    cache.flush_all().unwrap();
    assert_eq!(disk.writes(), 2);
    assert_eq!(disk.raw(2)[511], 9);

    // 已经干净了
    cache.flush_all().unwrap();
    cache.sync(sector(2)).unwrap();
    assert_eq!(disk.writes(), 2);
}

#[test]
fn flush_one_slot() {
    let disk = TestDisk::new(16);
    let cache = BufferCache::new(disk.clone());

    // 新缓存里第一个装入的扇区落在 0 号槽位
    cache.write(sector(4), b"slot", 0).unwrap();
    cache.flush(0).unwrap();
    assert_eq!(disk.writes(), 1);
    assert_eq!(&disk.raw(4)[..4], b"slot");

    // 脏位已清
    cache.flush_all().unwrap();
    assert_eq!(disk.writes(), 1);

    // 无效槽位什么也不做
    cache.flush(CACHE_CAPACITY - 1).unwrap();
    assert_eq!(disk.writes(), 1);

    // 有效槽位即使干净也写回
    cache.flush(0).unwrap();
    assert_eq!(disk.writes(), 2);
}

#[test]
fn device_errors() {
    let disk = TestDisk::new(256);
    let cache = BufferCache::new(disk.clone());

    disk.set_broken(true);
    assert_eq!(
        cache.read(sector(1), &mut [0u8; 1], 0),
        Err(Error::Device(block_dev::Error::Io { block_id: 1 }))
    );
    assert!(!cache.contains(sector(1)));
    disk.set_broken(false);

    cache.write(sector(0), b"dirty", 0).unwrap();
    for id in 1..CACHE_CAPACITY {
        cache.read(sector(id), &mut [0u8; 1], 0).unwrap();
    }

    // 换出 0 号扇区时写回失败，数据留在缓存里
    disk.set_broken(true);
    assert!(cache.read(sector(100), &mut [0u8; 1], 0).is_err());
    assert!(cache.contains(sector(0)));
    assert!(cache.flush_all().is_err());

    disk.set_broken(false);
    cache.flush_all().unwrap();
    assert_eq!(&disk.raw(0)[..5], b"dirty");
}

#[test]
fn concurrent_access() {
    const THREADS: usize = 8;
    const SECTORS_PER_THREAD: usize = 24;

    let disk = TestDisk::new(THREADS * SECTORS_PER_THREAD);
    let cache = BufferCache::new(disk.clone());

    thread::scope(|s| {
        for t in 0..THREADS {
            let cache = &cache;
            s.spawn(move || {
                for round in 0..4u8 {
                    for i in 0..SECTORS_PER_THREAD {
                        let id = t * SECTORS_PER_THREAD + i;
                        cache.write(sector(id), &[t as u8, i as u8, round], 0).unwrap();

                        let mut buf = [0u8; 3];
                        cache.read(sector(id), &mut buf, 0).unwrap();
                        assert_eq!(buf, [t as u8, i as u8, round]);
                    }
                }
            });
        }
    });

    cache.flush_all().unwrap();
    for t in 0..THREADS {
        for i in 0..SECTORS_PER_THREAD {
            let id = t * SECTORS_PER_THREAD + i;
            assert_eq!(&disk.raw(id)[..3], &[t as u8, i as u8, 3]);
        }
    }
}
