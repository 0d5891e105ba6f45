//! Policy engine tests

use super::*;
use crate::attributes::Attributes;
use crate::error::VarStoreError;
use crate::guid::Guid;
use crate::name::VariableName;
use std::collections::HashMap;

const VENDOR: Guid = Guid::from_u128(0x4c8a2451_c207_405b_9694_99ea13251341);

fn name(s: &str) -> VariableName {
    VariableName::new(s).unwrap()
}

fn empty_store() -> impl Fn(&VariableName, &Guid) -> Option<Vec<u8>> {
    |_: &VariableName, _: &Guid| None
}

fn store_with(vars: &[(&str, Guid, Vec<u8>)]) -> impl Fn(&VariableName, &Guid) -> Option<Vec<u8>> {
    let map: HashMap<(String, Guid), Vec<u8>> = vars
        .iter()
        .map(|(n, g, d)| ((n.to_string(), *g), d.clone()))
        .collect();
    move |n: &VariableName, g: &Guid| map.get(&(n.to_string(), *g)).cloned()
}

#[test]
fn test_lock_now_pattern() {
    let mut engine = PolicyEngine::new_default();
    engine
        .register(PolicyEntry::named(VENDOR, "Lock#").with_lock(LockPolicy::LockNow))
        .unwrap();
    engine.lock();

    let result = engine.authorize(
        &name("Lock1"),
        &VENDOR,
        Attributes::DEFAULT_NV,
        4,
        &empty_store(),
    );
    assert!(matches!(result, Err(VarStoreError::WriteProtected(_))));

    // same name, other namespace
    assert!(engine
        .authorize(
            &name("Lock1"),
            &Guid::GLOBAL_VARIABLE,
            Attributes::DEFAULT_NV,
            4,
            &empty_store()
        )
        .is_ok());

    // pattern needs exactly one hex digit
    assert!(engine
        .authorize(&name("LockX"), &VENDOR, Attributes::DEFAULT_NV, 4, &empty_store())
        .is_ok());
    assert!(engine
        .authorize(&name("Lock12"), &VENDOR, Attributes::DEFAULT_NV, 4, &empty_store())
        .is_ok());
}

#[test]
fn test_register_after_lock_fails() {
    let mut engine = PolicyEngine::new_default();
    engine.lock();
    engine.lock();
    assert!(engine.is_locked());

    let result = engine.register(PolicyEntry::namespace(VENDOR));
    assert!(matches!(result, Err(VarStoreError::WriteProtected(_))));
    assert!(matches!(
        engine.disable(),
        Err(VarStoreError::WriteProtected(_))
    ));
    assert!(matches!(
        engine.load_json("[]"),
        Err(VarStoreError::WriteProtected(_))
    ));
}

#[test]
fn test_duplicate_target_rejected() {
    let mut engine = PolicyEngine::new_default();
    engine.register(PolicyEntry::named(VENDOR, "Key")).unwrap();

    let result = engine.register(PolicyEntry::named(VENDOR, "Key").with_sizes(0, 4));
    assert!(matches!(result, Err(VarStoreError::InvalidParameter(_))));

    // different target in the same namespace is fine
    engine.register(PolicyEntry::namespace(VENDOR)).unwrap();
    assert_eq!(engine.entries().len(), 2);
}

#[test]
fn test_most_specific_entry_wins() {
    let mut engine = PolicyEngine::new_default();
    // registered widest first, narrowest last
    engine
        .register(PolicyEntry::namespace(VENDOR).with_lock(LockPolicy::LockNow))
        .unwrap();
    engine
        .register(PolicyEntry::named(VENDOR, "Boot####").with_sizes(0, 8))
        .unwrap();
    engine
        .register(PolicyEntry::named(VENDOR, "Boot00##").with_sizes(0, 4))
        .unwrap();
    engine
        .register(PolicyEntry::named(VENDOR, "Boot0001").with_sizes(0, 2))
        .unwrap();

    let store = empty_store();
    let nv = Attributes::DEFAULT_NV;

    assert!(engine.authorize(&name("Boot0001"), &VENDOR, nv, 2, &store).is_ok());
    assert!(engine.authorize(&name("Boot0001"), &VENDOR, nv, 3, &store).is_err());
    assert!(engine.authorize(&name("Boot0002"), &VENDOR, nv, 4, &store).is_ok());
    assert!(engine.authorize(&name("Boot0002"), &VENDOR, nv, 5, &store).is_err());
    assert!(engine.authorize(&name("Boot1000"), &VENDOR, nv, 8, &store).is_ok());
    assert!(matches!(
        engine.authorize(&name("Other"), &VENDOR, nv, 1, &store),
        Err(VarStoreError::WriteProtected(_))
    ));
}

#[test]
fn test_registration_clears_cache() {
    let mut engine = PolicyEngine::new_default();
    let store = empty_store();
    engine.register(PolicyEntry::namespace(VENDOR)).unwrap();
    assert!(engine
        .authorize(&name("Key"), &VENDOR, Attributes::DEFAULT_NV, 16, &store)
        .is_ok());

    // a narrower entry registered later must take effect immediately
    engine
        .register(PolicyEntry::named(VENDOR, "Key").with_sizes(0, 8))
        .unwrap();
    assert!(engine
        .authorize(&name("Key"), &VENDOR, Attributes::DEFAULT_NV, 16, &store)
        .is_err());
}

#[test]
fn test_lock_on_create() {
    let mut engine = PolicyEngine::new_default();
    engine
        .register(PolicyEntry::named(VENDOR, "Serial").with_lock(LockPolicy::LockOnCreate))
        .unwrap();

    let absent = empty_store();
    assert!(engine
        .authorize(&name("Serial"), &VENDOR, Attributes::DEFAULT_NV, 4, &absent)
        .is_ok());

    let present = store_with(&[("Serial", VENDOR, vec![1, 2, 3, 4])]);
    assert!(matches!(
        engine.authorize(&name("Serial"), &VENDOR, Attributes::DEFAULT_NV, 4, &present),
        Err(VarStoreError::WriteProtected(_))
    ));
    // deletes are still subject to the lock
    assert!(engine
        .authorize(&name("Serial"), &VENDOR, Attributes::empty(), 0, &present)
        .is_err());
}

#[test]
fn test_lock_on_var_state() {
    let mut engine = PolicyEngine::new_default();
    engine
        .register(
            PolicyEntry::named(VENDOR, "Setup").with_lock(LockPolicy::LockOnVarState {
                namespace: VENDOR,
                name: name("ReadyToLock"),
                value: 1,
            }),
        )
        .unwrap();

    let nv = Attributes::DEFAULT_NV;
    let unset = empty_store();
    let other_value = store_with(&[("ReadyToLock", VENDOR, vec![0])]);
    let too_long = store_with(&[("ReadyToLock", VENDOR, vec![1, 0])]);
    let armed = store_with(&[("ReadyToLock", VENDOR, vec![1])]);

    assert!(engine.authorize(&name("Setup"), &VENDOR, nv, 1, &unset).is_ok());
    assert!(engine.authorize(&name("Setup"), &VENDOR, nv, 1, &other_value).is_ok());
    assert!(engine.authorize(&name("Setup"), &VENDOR, nv, 1, &too_long).is_ok());
    assert!(matches!(
        engine.authorize(&name("Setup"), &VENDOR, nv, 1, &armed),
        Err(VarStoreError::WriteProtected(_))
    ));
}

#[test]
fn test_delete_skips_size_and_attribute_checks() {
    let mut engine = PolicyEngine::new_default();
    engine
        .register(
            PolicyEntry::named(VENDOR, "Cfg")
                .with_sizes(4, 4)
                .with_attributes(Attributes::NON_VOLATILE, Attributes::empty()),
        )
        .unwrap();

    let store = empty_store();
    assert!(engine
        .authorize(&name("Cfg"), &VENDOR, Attributes::BOOTSERVICE_ACCESS, 2, &store)
        .is_err());
    assert!(engine
        .authorize(&name("Cfg"), &VENDOR, Attributes::BOOTSERVICE_ACCESS, 0, &store)
        .is_ok());
    assert!(engine
        .authorize(&name("Cfg"), &VENDOR, Attributes::empty(), 2, &store)
        .is_ok());
}

#[test]
fn test_disable_allows_everything() {
    let mut engine = PolicyEngine::new_default();
    engine
        .register(PolicyEntry::namespace(VENDOR).with_lock(LockPolicy::LockNow))
        .unwrap();
    engine.disable().unwrap();
    assert!(!engine.is_enabled());

    assert!(engine
        .authorize(&name("Any"), &VENDOR, Attributes::DEFAULT_NV, 1, &empty_store())
        .is_ok());
}

#[test]
fn test_dump_and_load() {
    let mut engine = PolicyEngine::new_default();
    engine
        .register(
            PolicyEntry::named(VENDOR, "Boot####")
                .with_sizes(2, 64)
                .with_attributes(Attributes::NON_VOLATILE, Attributes::RUNTIME_ACCESS)
                .with_lock(LockPolicy::LockOnCreate),
        )
        .unwrap();
    engine
        .register(PolicyEntry::namespace(Guid::GLOBAL_VARIABLE))
        .unwrap();

    let json = engine.dump().unwrap();
    let mut restored = PolicyEngine::new_default();
    assert_eq!(restored.load_json(&json).unwrap(), 2);
    assert_eq!(restored.entries(), engine.entries());
}

#[test]
fn test_load_json_is_all_or_nothing() {
    let mut engine = PolicyEngine::new_default();
    let json = format!(
        r#"[
            {{ "namespace": "{ns}", "name": "A" }},
            {{ "namespace": "{ns}", "name": "A", "max_size": 4 }}
        ]"#,
        ns = VENDOR
    );
    assert!(matches!(
        engine.load_json(&json),
        Err(VarStoreError::InvalidParameter(_))
    ));
    assert!(engine.entries().is_empty());

    assert!(matches!(
        engine.load_json("not json"),
        Err(VarStoreError::Serialization(_))
    ));
}
