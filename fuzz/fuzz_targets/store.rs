#![no_main]

use arbitrary::Arbitrary;
use std::collections::{HashMap, HashSet};
use libfuzzer_sys::fuzz_target;
use blockfile::{BlockFileStore, MemoryKeyspace, StoreError};

#[derive(Arbitrary, Clone, Debug)]
enum Op {
    Append { name: String, data: Vec<u8>, repeat: u8 },
    Load { name: String, position: u16, len: u16 },
    Remove { name: String },
    Rename { source: String, dest: String },
    Clear,
}

fn check_store(
    store: &BlockFileStore<MemoryKeyspace>,
    content: &HashMap<String, Vec<u8>>,
) {
    assert_eq!(store.verify().unwrap().orphans, 0);
    assert_eq!(
        store.list_keys().unwrap(),
        content.keys().cloned().collect::<HashSet<_>>()
    );
    for (name, data) in content {
        assert_eq!(store.size(name).unwrap(), Some(data.len() as u64));
        assert_eq!(store.read_to_vec(name).unwrap().as_ref(), Some(data));
    }
}

fn run_store(ops: impl IntoIterator<Item = Op>) {
    let store = BlockFileStore::in_memory();
    let mut content: HashMap<String, Vec<u8>> = HashMap::new();

    for item in ops {
        match item {
            Op::Append { name, data, repeat } => {
                // Repeating the data lets short inputs cross block borders.
                let data = data.repeat(usize::from(repeat) + 1);
                let res = store.append(&name, &data, 0, data.len());
                if name.is_empty() {
                    assert!(matches!(res, Err(StoreError::InvalidName)));
                }
                else {
                    res.unwrap();
                    content.entry(name).or_default().extend_from_slice(&data);
                }
            }
            Op::Load { name, position, len } => {
                let position = usize::from(position);
                let len = usize::from(len);
                let mut buf = vec![0; len];
                let res = store.load(
                    &name, position as u64, &mut buf, 0, len
                ).unwrap();
                let data = content.get(&name).map(Vec::as_slice)
                    .unwrap_or_default();
                if position >= data.len() {
                    assert_eq!(res, None);
                }
                else {
                    let read = len.min(data.len() - position);
                    assert_eq!(res, Some(read));
                    assert_eq!(&buf[..read], &data[position..position + read]);
                }
            }
            Op::Remove { name } => {
                store.remove(&name).unwrap();
                content.remove(&name);
            }
            Op::Rename { source, dest } => {
                let res = store.rename(&source, &dest);
                if dest.is_empty() {
                    assert!(matches!(res, Err(StoreError::InvalidName)));
                }
                else if let Some(data) = content.remove(&source) {
                    res.unwrap();
                    content.insert(dest, data);
                }
                else {
                    assert!(matches!(res, Err(StoreError::NotFound(_))));
                }
            }
            Op::Clear => {
                store.clear().unwrap();
                content.clear();
            }
        }

        check_store(&store, &content);
    }
}

fuzz_target!{|actions: Vec<Op>| {
    run_store(actions)
}}
