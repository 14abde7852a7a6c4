#![no_main]

use bytes::Bytes;
use keelson_core::options::Endian;
use keelson_transport::codec::FrameDecoder;

use libfuzzer_sys::fuzz_target;

const MAX_MSG_SIZE: u64 = 1 << 16;

fuzz_target!(|data: &[u8]| {
    // Feed the whole input at once.
    let mut decoder = FrameDecoder::new(Endian::Big, Some(MAX_MSG_SIZE));
    decoder.push(Bytes::copy_from_slice(data));
    drain(&mut decoder);

    // Feed the same input byte by byte; chunking must never change
    // the outcome or trip a panic.
    let mut decoder = FrameDecoder::new(Endian::Little, Some(MAX_MSG_SIZE));
    for byte in data {
        decoder.push(Bytes::copy_from_slice(&[*byte]));
        drain(&mut decoder);
    }
});

fn drain(decoder: &mut FrameDecoder) {
    loop {
        match decoder.next() {
            Ok(Some(msg)) => assert!(msg.size() as u64 <= MAX_MSG_SIZE),
            Ok(None) => break,
            // A framing error poisons the connection; stop feeding.
            Err(_) => break,
        }
    }
}
