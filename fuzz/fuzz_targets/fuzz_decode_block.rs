#![no_main]
use libfuzzer_sys::fuzz_target;
use osmblock::pbf::decode_primitive_block;
use osmblock::{EntityBits, EntityData};

fuzz_target!(|data: &[u8]| {
    let Ok(buffer) = decode_primitive_block(data, EntityBits::ALL) else {
        return;
    };
    // Whatever the decoder accepted must be readable back
    for entity in buffer.entities() {
        let entity = entity.expect("decoded buffer holds valid entities");
        let _ = EntityData::from(&entity);
    }
});
