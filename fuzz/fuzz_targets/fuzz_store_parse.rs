#![no_main]
use libfuzzer_sys::fuzz_target;
use varstore::{Attributes, Guid, MemoryRegion, RecordStore, VariableName, VariableRecord};

// Arbitrary bank contents must load without panicking, and the loaded store
// must stay writable.
fuzz_target!(|data: &[u8]| {
    if data.len() < 64 || data.len() > 64 * 1024 {
        return;
    }

    let bank0 = MemoryRegion::from_bytes(data.to_vec());
    let bank1 = MemoryRegion::new(data.len());
    let mut store = match RecordStore::load([bank0, bank1]) {
        Ok(store) => store,
        Err(_) => return,
    };

    for record in store.iter() {
        let _ = record;
    }

    let usage = store.usage();
    assert!(usage.live_bytes <= usage.capacity);

    if let Ok(name) = VariableName::new("Fuzz") {
        let record =
            VariableRecord::new(name, Guid::GLOBAL_VARIABLE, Attributes::DEFAULT_NV, vec![1]);
        let _ = store.update(&record);
    }
});
