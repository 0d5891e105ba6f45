//! Property-based tests for store and service invariants

use proptest::prelude::*;
use std::collections::BTreeMap;
use varstore::{
    Attributes, Guid, LockPolicy, MemoryRegion, PolicyEngine, PolicyEntry, RecordStore,
    VarStoreError, VariableName, VariableRecord, VariableService, VariableServiceBuilder,
    VariableServices,
};

const VENDOR: Guid = Guid::from_u128(0xa0b1c2d3_e4f5_4617_8829_3a4b5c6d7e8f);
const BANK_SIZE: usize = 16 * 1024;

fn service() -> VariableService<MemoryRegion> {
    VariableServiceBuilder::new()
        .bank_size(BANK_SIZE)
        .integrity_key(b"property key")
        .build([MemoryRegion::new(BANK_SIZE), MemoryRegion::new(BANK_SIZE)])
        .unwrap()
}

fn attributes() -> impl Strategy<Value = Attributes> {
    prop_oneof![
        Just(Attributes::DEFAULT_NV),
        Just(Attributes::NON_VOLATILE | Attributes::BOOTSERVICE_ACCESS),
        Just(Attributes::DEFAULT_VOLATILE),
        Just(Attributes::BOOTSERVICE_ACCESS),
    ]
}

fn variable_name() -> impl Strategy<Value = VariableName> {
    "[A-Za-z][A-Za-z0-9]{0,15}".prop_map(|s| VariableName::new(s).unwrap())
}

fn visible_names(service: &VariableService<MemoryRegion>) -> Vec<VariableName> {
    let mut names = Vec::new();
    let mut cursor = (VariableName::empty(), Guid::ZERO);
    loop {
        match service.get_next_variable_name(&cursor.0, &cursor.1, 512) {
            Ok(next) => {
                names.push(next.0.clone());
                cursor = next;
            }
            Err(VarStoreError::NotFound) => return names,
            Err(e) => panic!("enumeration failed: {}", e),
        }
    }
}

proptest! {
    #[test]
    fn prop_set_then_get(
        name in variable_name(),
        attrs in attributes(),
        data in prop::collection::vec(any::<u8>(), 1..512)
    ) {
        let service = service();
        service.set_variable(&name, &VENDOR, attrs, &data).unwrap();

        let mut buffer = vec![0u8; 512];
        let (got_attrs, len) = service.get_variable(&name, &VENDOR, &mut buffer).unwrap();
        prop_assert_eq!(got_attrs, attrs);
        prop_assert_eq!(&buffer[..len], &data[..]);
    }

    #[test]
    fn prop_deleted_variable_is_gone(
        name in variable_name(),
        attrs in attributes(),
        data in prop::collection::vec(any::<u8>(), 1..256)
    ) {
        let service = service();
        service.set_variable(&name, &VENDOR, attrs, &data).unwrap();
        service.set_variable(&name, &VENDOR, attrs, &[]).unwrap();

        let mut buffer = vec![0u8; 256];
        prop_assert!(matches!(
            service.get_variable(&name, &VENDOR, &mut buffer),
            Err(VarStoreError::NotFound)
        ));
        prop_assert!(!visible_names(&service).contains(&name));
    }

    #[test]
    fn prop_compaction_preserves_live_records(
        ops in prop::collection::vec((0usize..8, prop::collection::vec(any::<u8>(), 0..64)), 1..80)
    ) {
        let mut store =
            RecordStore::load([MemoryRegion::new(2048), MemoryRegion::new(2048)]).unwrap();
        let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        for (key, data) in ops {
            let name = format!("Var{}", key);
            let variable = VariableName::new(name.as_str()).unwrap();
            if data.is_empty() {
                if model.remove(&name).is_some() {
                    store.tombstone(&variable, &VENDOR).unwrap();
                }
            } else {
                let record =
                    VariableRecord::new(variable, VENDOR, Attributes::DEFAULT_NV, data.clone());
                store.update(&record).unwrap();
                model.insert(name, data);
            }
        }

        store.compact().unwrap();
        prop_assert_eq!(store.usage().reclaimable_bytes, 0);

        let reloaded = RecordStore::load(store.into_banks()).unwrap();
        let records: Vec<VariableRecord> = reloaded.iter().map(|r| r.unwrap()).collect();
        prop_assert!(records.iter().all(|r| r.attributes == Attributes::DEFAULT_NV));

        let contents: BTreeMap<String, Vec<u8>> = records
            .into_iter()
            .map(|r| (r.name.to_string(), r.data))
            .collect();
        prop_assert_eq!(contents, model);
    }

    #[test]
    fn prop_register_after_lock_is_write_protected(
        name in proptest::option::of("[A-Za-z#]{1,12}"),
        min_size in 0u32..64,
        lock in 0u8..3
    ) {
        let mut engine = PolicyEngine::new_default();
        engine.lock();

        let mut entry = match name {
            Some(name) => PolicyEntry::named(VENDOR, name),
            None => PolicyEntry::namespace(VENDOR),
        }
        .with_sizes(min_size, u32::MAX);
        entry = match lock {
            0 => entry,
            1 => entry.with_lock(LockPolicy::LockNow),
            _ => entry.with_lock(LockPolicy::LockOnCreate),
        };

        prop_assert!(matches!(
            engine.register(entry),
            Err(VarStoreError::WriteProtected(_))
        ));
    }
}
