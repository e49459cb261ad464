#![no_main]
use libfuzzer_sys::fuzz_target;
use rewind_core::loop_record::{LoopReader, ReaderState};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a loop stream. Must not panic -- Err is fine.
    let mut reader = LoopReader::new(data);
    while let Ok(Some(_)) = reader.next_record() {}
    assert!(matches!(
        reader.state(),
        ReaderState::Finished | ReaderState::Failed
    ));
});
