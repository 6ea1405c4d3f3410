#![no_main]
use libfuzzer_sys::fuzz_target;
use osmblock::pbf::{decode_blob, decode_header_block, decode_primitive_block, read_frame, BlobType};
use osmblock::EntityBits;
use std::io::Cursor;

// Arbitrary file contents must produce errors, never panics
fuzz_target!(|data: &[u8]| {
    let mut cursor = Cursor::new(data);
    while let Ok(Some(frame)) = read_frame(&mut cursor) {
        let Ok(block) = decode_blob(&frame.blob) else {
            continue;
        };
        match frame.blob_type {
            BlobType::Header => {
                let _ = decode_header_block(&block);
            }
            BlobType::Data => {
                let _ = decode_primitive_block(&block, EntityBits::ALL);
            }
        }
    }
});
