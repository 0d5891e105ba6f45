//! Tamper and rollback detection for protected variables
//!
//! Every bit of the stored counter, the stored digest and the enrolled data
//! is flipped in turn; each flip must fail verification on the next load.

use varstore::{
    Attributes, Guid, HmacSha256, InMemoryCounter, MemoryRegion, ProtectedVariables, RecordStore,
    VarStoreError, VariableKey, VariableName, VariableRecord,
};

const SECURE_BOOT: Guid = Guid::from_u128(0xd719b2cb_3d3a_4596_a3bc_dad00e67656f);
const BANK_SIZE: usize = 4096;

fn name(s: &str) -> VariableName {
    VariableName::new(s).unwrap()
}

fn layer(counter: u64) -> ProtectedVariables {
    ProtectedVariables::new(
        [
            VariableKey::new(name("db"), SECURE_BOOT),
            VariableKey::new(name("dbx"), SECURE_BOOT),
        ],
        Box::new(InMemoryCounter::new(counter)),
        Box::new(HmacSha256::new(b"tamper test key").unwrap()),
    )
}

/// Store with two protected writes applied; returns both bank images
fn provisioned() -> (Vec<u8>, Vec<u8>) {
    let mut store =
        RecordStore::load([MemoryRegion::new(BANK_SIZE), MemoryRegion::new(BANK_SIZE)]).unwrap();
    let mut protected = layer(0);
    protected.verify_on_load(&mut store).unwrap();
    protected
        .protected_set(
            &mut store,
            &name("db"),
            &SECURE_BOOT,
            Attributes::DEFAULT_NV,
            b"allowed-certs",
        )
        .unwrap();
    protected
        .protected_set(&mut store, &name("dbx"), &SECURE_BOOT, Attributes::DEFAULT_NV, b"revoked")
        .unwrap();

    let [bank0, bank1] = store.into_banks();
    (bank0.into_bytes(), bank1.into_bytes())
}

fn verify(bank0: Vec<u8>, bank1: Vec<u8>) -> varstore::Result<()> {
    let mut store = RecordStore::load([
        MemoryRegion::from_bytes(bank0),
        MemoryRegion::from_bytes(bank1),
    ])?;
    layer(2).verify_on_load(&mut store)
}

fn locate(image: &[u8], needle: &[u8]) -> usize {
    let positions: Vec<_> = image
        .windows(needle.len())
        .enumerate()
        .filter(|(_, w)| *w == needle)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(positions.len(), 1, "pattern must occur exactly once");
    positions[0]
}

fn assert_every_bit_detected(start: usize, len: usize) {
    let (bank0, bank1) = provisioned();
    for byte in start..start + len {
        for bit in 0..8 {
            let mut tampered = bank0.clone();
            tampered[byte] ^= 1 << bit;
            let result = verify(tampered, bank1.clone());
            assert!(
                matches!(result, Err(VarStoreError::SecurityViolation(_))),
                "flip of bit {} at byte {} went unnoticed: {:?}",
                bit,
                byte,
                result
            );
        }
    }
}

#[test]
fn test_untampered_store_verifies() {
    let (bank0, bank1) = provisioned();
    verify(bank0, bank1).unwrap();
}

#[test]
fn test_counter_and_digest_bit_flips() {
    let (bank0, bank1) = provisioned();
    let store = RecordStore::load([
        MemoryRegion::from_bytes(bank0.clone()),
        MemoryRegion::from_bytes(bank1),
    ])
    .unwrap();
    let metadata = ProtectedVariables::read_metadata(&store).unwrap().unwrap();
    assert_eq!(metadata.counter, 2);

    let offset = locate(&bank0, &metadata.to_bytes());
    assert_every_bit_detected(offset, metadata.to_bytes().len());
}

#[test]
fn test_enrolled_data_bit_flips() {
    let (bank0, _) = provisioned();
    assert_every_bit_detected(locate(&bank0, b"allowed-certs"), 13);
    assert_every_bit_detected(locate(&bank0, b"revoked"), 7);
}

#[test]
fn test_deleted_enrolled_variable_detected() {
    let (bank0, bank1) = provisioned();
    let mut store = RecordStore::load([
        MemoryRegion::from_bytes(bank0),
        MemoryRegion::from_bytes(bank1),
    ])
    .unwrap();

    // removed behind the protected layer's back
    store.tombstone(&name("dbx"), &SECURE_BOOT).unwrap();
    assert!(matches!(
        layer(2).verify_on_load(&mut store),
        Err(VarStoreError::SecurityViolation(_))
    ));
}

#[test]
fn test_store_rollback_detected() {
    let mut store =
        RecordStore::load([MemoryRegion::new(BANK_SIZE), MemoryRegion::new(BANK_SIZE)]).unwrap();
    let mut protected = layer(0);
    protected.verify_on_load(&mut store).unwrap();
    protected
        .protected_set(&mut store, &name("db"), &SECURE_BOOT, Attributes::DEFAULT_NV, b"v1")
        .unwrap();

    // snapshot the store, then move on
    let [bank0, bank1] = store.into_banks();
    let old = (bank0.as_bytes().to_vec(), bank1.as_bytes().to_vec());
    let mut store = RecordStore::load([bank0, bank1]).unwrap();
    protected
        .protected_set(&mut store, &name("db"), &SECURE_BOOT, Attributes::DEFAULT_NV, b"v2")
        .unwrap();
    assert_eq!(protected.counter().unwrap(), 2);

    // replaying the old image against the advanced counter
    let mut replayed = RecordStore::load([
        MemoryRegion::from_bytes(old.0),
        MemoryRegion::from_bytes(old.1),
    ])
    .unwrap();
    assert!(matches!(
        layer(2).verify_on_load(&mut replayed),
        Err(VarStoreError::SecurityViolation(_))
    ));
}

#[test]
fn test_unenrolled_variables_are_not_covered() {
    let (bank0, bank1) = provisioned();
    let mut store = RecordStore::load([
        MemoryRegion::from_bytes(bank0),
        MemoryRegion::from_bytes(bank1),
    ])
    .unwrap();
    store
        .update(&VariableRecord::new(
            name("Timeout"),
            Guid::GLOBAL_VARIABLE,
            Attributes::DEFAULT_NV,
            vec![5],
        ))
        .unwrap();
    layer(2).verify_on_load(&mut store).unwrap();
}
