use pstdb_storage::block::MAX_BLOCK_DATA;
use pstdb_storage::file::{AMapState, Header};
use pstdb_storage::prelude::*;
use pstdb_storage::serde::{Deser, Ser};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const ROOT_FOLDER: Nid = Nid(0x122);

fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Clear the valid flag of a closed container, as left by a crash.
fn clear_amap_valid(storage: &mut MemStorage) -> Header {
    let (_, mut header) = Header::deser(storage.as_bytes(), 0).unwrap();
    let saved = header.clone();
    header.root.amap_state = AMapState::Invalid;
    header.ser(storage.as_bytes_mut(), 0);
    saved
}

#[test]
fn test_file_backed_session() {
    init_log();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mailbox.pst");
    let config = NdbConfig::default().crypt_method(CryptMethod::Permute);

    let mut ndb = Ndb::create(FileStorage::create(&path).unwrap(), config.clone()).unwrap();
    let mut message = ndb.create_node(NidType::NormalMessage, ROOT_FOLDER).unwrap();
    message
        .data_mut()
        .append_data(&mut ndb, &payload(1, 30000))
        .unwrap();

    // a property table kept as BTH inside a subnode heap.
    let mut props = message.create_subnode(Nid::new(NidType::LocalDescriptor, 1));
    let mut heap = Heap::create(BTH_TYPE, props.data().limits().block_size).unwrap();
    let factory = RawRecordFactory::new(2, 6).unwrap();
    let mut bth = Bth::create(&mut heap, factory, config.bth_leaf_cache_size).unwrap();
    heap.set_user_root(bth.header());
    for tag in 0..500u64 {
        let rec = RawRecord::new(2, tag * 7, &[tag as u8; 6]).unwrap();
        bth.insert(&mut heap, rec).unwrap();
    }
    heap.flush(&mut ndb, props.data_mut()).unwrap();
    message.put_subnode(&mut ndb, &mut props).unwrap();
    ndb.save_node(&mut message).unwrap();
    let nid = message.nid();
    drop(ndb.close().unwrap());

    let mut ndb = Ndb::open(FileStorage::open(&path).unwrap(), NdbConfig::default()).unwrap();
    assert_eq!(ndb.header().crypt_method, CryptMethod::Permute);
    let mut message = ndb.open_node(nid).unwrap().unwrap();
    assert_eq!(message.data().get_data(&mut ndb).unwrap(), payload(1, 30000));
    let props = message
        .subnode(&mut ndb, Nid::new(NidType::LocalDescriptor, 1))
        .unwrap()
        .unwrap();
    let mut heap = Heap::open(&mut ndb, props.data()).unwrap();
    let mut bth =
        Bth::open(&heap, heap.user_root(), factory, config.bth_leaf_cache_size).unwrap();
    assert_eq!(bth.check(&mut heap).unwrap(), 500);
    let rec = bth.get(&mut heap, 49 * 7).unwrap().unwrap();
    assert_eq!(rec.data(), &[49u8; 6]);
    assert!(bth.get(&mut heap, 50).unwrap().is_none());
    let (nodes, blocks) = ndb.check().unwrap();
    assert_eq!(nodes, 1);
    assert!(blocks >= 6);
}

#[test]
fn test_crash_before_save_rebuilds_map() {
    init_log();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crash.pst");

    let mut ndb = Ndb::create(FileStorage::create(&path).unwrap(), NdbConfig::default()).unwrap();
    let mut node = ndb.create_node(NidType::NormalMessage, ROOT_FOLDER).unwrap();
    node.data_mut().append_data(&mut ndb, &payload(7, 10000)).unwrap();
    ndb.save_node(&mut node).unwrap();
    ndb.save().unwrap();
    let nid = node.nid();
    let saved_free = ndb.header().root.amap_free;

    // structural writes, then the session ends without a save.
    node.data_mut().append_data(&mut ndb, &payload(9, 20000)).unwrap();
    ndb.save_node(&mut node).unwrap();
    ndb.create_node(NidType::NormalMessage, ROOT_FOLDER).unwrap();
    assert!(ndb.is_dirty());
    drop(ndb);

    let mut ndb = Ndb::open(FileStorage::open(&path).unwrap(), NdbConfig::default()).unwrap();
    assert!(!ndb.header().root.amap_state.is_valid());
    assert!(ndb.is_dirty());
    assert_eq!(ndb.amap().free_bytes(), saved_free);
    let node = ndb.open_node(nid).unwrap().unwrap();
    assert_eq!(node.data().get_data(&mut ndb).unwrap(), payload(7, 10000));
    assert_eq!(ndb.node_entries().unwrap().len(), 1);
    ndb.save().unwrap();
    assert!(ndb.header().root.amap_state.is_valid());
    drop(ndb);

    let ndb = Ndb::open(FileStorage::open(&path).unwrap(), NdbConfig::default()).unwrap();
    assert!(!ndb.is_dirty());
    assert_eq!(ndb.amap().free_bytes(), saved_free);
}

#[test]
fn test_random_workload_against_model() {
    init_log();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut model: BTreeMap<Nid, Vec<u8>> = BTreeMap::new();
    let mut ndb = Ndb::create(MemStorage::new(), NdbConfig::default()).unwrap();
    for round in 0..6 {
        for _ in 0..40 {
            match rng.random_range(0..4) {
                0 | 1 => {
                    let mut node = ndb.create_node(NidType::NormalMessage, ROOT_FOLDER).unwrap();
                    let data = payload(rng.random(), rng.random_range(1..20000));
                    node.data_mut().append_data(&mut ndb, &data).unwrap();
                    ndb.save_node(&mut node).unwrap();
                    model.insert(node.nid(), data);
                }
                2 if !model.is_empty() => {
                    let idx = rng.random_range(0..model.len());
                    let nid = *model.keys().nth(idx).unwrap();
                    let mut node = ndb.open_node(nid).unwrap().unwrap();
                    let tail = payload(rng.random(), rng.random_range(1..9000));
                    node.data_mut().append_data(&mut ndb, &tail).unwrap();
                    ndb.save_node(&mut node).unwrap();
                    model.get_mut(&nid).unwrap().extend_from_slice(&tail);
                }
                _ if !model.is_empty() => {
                    let idx = rng.random_range(0..model.len());
                    let nid = *model.keys().nth(idx).unwrap();
                    assert!(ndb.delete_node(nid).unwrap());
                    model.remove(&nid);
                }
                _ => (),
            }
        }
        let mut storage = ndb.close().unwrap();
        if round % 2 == 1 {
            // force a rebuild and compare with the persisted map.
            let saved = clear_amap_valid(&mut storage);
            ndb = Ndb::open(storage, NdbConfig::default()).unwrap();
            assert_eq!(ndb.amap().free_bytes(), saved.root.amap_free);
        } else {
            ndb = Ndb::open(storage, NdbConfig::default()).unwrap();
        }
        let entries = ndb.node_entries().unwrap();
        assert_eq!(
            entries.iter().map(|(nid, _)| *nid).collect::<Vec<_>>(),
            model.keys().copied().collect::<Vec<_>>()
        );
        for (nid, data) in &model {
            let node = ndb.open_node(*nid).unwrap().unwrap();
            assert_eq!(&node.data().get_data(&mut ndb).unwrap(), data);
        }
    }
    // every block is owned by exactly one node.
    let (_, blocks) = ndb.check().unwrap();
    let expected: usize = model
        .values()
        .map(|d| {
            let n = d.len().div_ceil(MAX_BLOCK_DATA);
            if n > 1 {
                n + 1
            } else {
                n
            }
        })
        .sum();
    assert_eq!(blocks, expected);
}
