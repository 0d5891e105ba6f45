#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use varstore::{
    Attributes, Guid, MemoryRegion, VariableName, VariableServiceBuilder, VariableServices,
};

#[derive(Arbitrary, Debug)]
struct SetOp {
    key: u8,
    attributes: u32,
    data: Vec<u8>,
}

// Random set sequences: errors are fine, panics and lost variables are not.
fuzz_target!(|ops: Vec<SetOp>| {
    let service = match VariableServiceBuilder::new()
        .bank_size(4096)
        .integrity_key(b"fuzz")
        .config(varstore::StoreConfig {
            bank_size: 4096,
            volatile_store_size: 4096,
            max_variable_size: 1024,
            ..Default::default()
        })
        .build([MemoryRegion::new(4096), MemoryRegion::new(4096)])
    {
        Ok(service) => service,
        Err(_) => return,
    };

    for op in ops.iter().take(256) {
        let Ok(name) = VariableName::new(format!("Var{}", op.key % 16)) else {
            continue;
        };
        let attributes = Attributes::from_bits_retain(op.attributes);
        if service
            .set_variable(&name, &Guid::GLOBAL_VARIABLE, attributes, &op.data)
            .is_ok()
            && !op.data.is_empty()
            && !attributes.stored().is_empty()
        {
            let mut buffer = vec![0u8; 1024];
            assert!(service
                .get_variable(&name, &Guid::GLOBAL_VARIABLE, &mut buffer)
                .is_ok());
        }
    }
});
