//! Concurrent access after the initialization window closes

use std::sync::Arc;
use std::thread;
use varstore::{
    Attributes, Guid, MemoryRegion, VarStoreError, VariableName, VariableService,
    VariableServiceBuilder, VariableServices,
};

const VENDOR: Guid = Guid::from_u128(0x0e6d5c4b_3a29_4817_a6f5_e4d3c2b1a098);

fn name(s: &str) -> VariableName {
    VariableName::new(s).unwrap()
}

fn runtime_service() -> Arc<VariableService<MemoryRegion>> {
    let service = VariableServiceBuilder::new()
        .bank_size(32 * 1024)
        .integrity_key(b"concurrency key")
        .build([MemoryRegion::new(32 * 1024), MemoryRegion::new(32 * 1024)])
        .unwrap();
    for i in 0..4 {
        service
            .set_variable(&name(&format!("Var{}", i)), &VENDOR, Attributes::DEFAULT_NV, &[0; 16])
            .unwrap();
    }
    service.close_initialization_window().unwrap();
    Arc::new(service)
}

#[test]
fn test_parallel_writers_serialize() {
    let service = runtime_service();

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let var = name(&format!("Var{}", i));
                for round in 1..=20u8 {
                    service
                        .set_variable(&var, &VENDOR, Attributes::DEFAULT_NV, &[round; 16])
                        .unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    let mut buffer = [0u8; 16];
    for i in 0..4 {
        service
            .get_variable(&name(&format!("Var{}", i)), &VENDOR, &mut buffer)
            .unwrap();
        assert_eq!(buffer, [20; 16]);
    }
    assert_eq!(service.variables().unwrap().len(), 4);
}

#[test]
fn test_readers_and_enumeration_during_writes() {
    let service = runtime_service();

    let writer = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            for round in 1..=50u8 {
                service
                    .set_variable(&name("Var0"), &VENDOR, Attributes::DEFAULT_NV, &[round; 16])
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for _ in 0..200 {
                    let mut buffer = [0u8; 16];
                    let (attrs, len) = service
                        .get_variable(&name("Var3"), &VENDOR, &mut buffer)
                        .unwrap();
                    assert_eq!(attrs, Attributes::DEFAULT_NV);
                    assert_eq!(len, 16);

                    // a key that vanishes mid-walk is reported, never skipped silently
                    let mut cursor = (VariableName::empty(), Guid::ZERO);
                    loop {
                        match service.get_next_variable_name(&cursor.0, &cursor.1, 64) {
                            Ok(next) => cursor = next,
                            Err(VarStoreError::NotFound) => break,
                            Err(VarStoreError::InvalidParameter(_)) => break,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let cache = service.runtime_cache().unwrap();
    assert_eq!(cache.readers_in_progress(), 0);
    assert!(!cache.is_update_pending());
    // two sequence steps per committed update
    assert_eq!(cache.sequence(), 100);
}

#[test]
fn test_random_mixed_workload() {
    let service = runtime_service();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let mut buffer = [0u8; 16];
                for _ in 0..100 {
                    let var = name(&format!("Var{}", rand::random::<usize>() % 4));
                    if rand::random::<bool>() {
                        let fill = rand::random::<u8>();
                        service
                            .set_variable(&var, &VENDOR, Attributes::DEFAULT_NV, &[fill; 16])
                            .unwrap();
                    } else {
                        let (_, len) = service.get_variable(&var, &VENDOR, &mut buffer).unwrap();
                        assert_eq!(len, 16);
                        // each write fills the whole value with one byte
                        assert!(buffer.iter().all(|&b| b == buffer[0]));
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let cache = service.runtime_cache().unwrap();
    assert_eq!(cache.readers_in_progress(), 0);
    assert_eq!(service.variables().unwrap().len(), 4);
}
