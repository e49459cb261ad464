#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rewind_core::hash::DefinitionHash;
use rewind_core::loop_record::LoopRecord;

/// A structured record for round-trip fuzzing.
#[derive(Arbitrary, Debug)]
struct FuzzRecord {
    comment: String,
    words: [u32; 4],
    payload: Vec<u8>,
}

fuzz_target!(|input: FuzzRecord| {
    let [w0, w1, w2, w3] = input.words;
    let record = LoopRecord::new(input.comment, DefinitionHash::new(w0, w1, w2, w3), input.payload);
    // Comments with a zero byte or over the limit are refused on write.
    let Ok(bytes) = record.encode() else {
        return;
    };
    let (decoded, used) = LoopRecord::decode(&bytes).expect("encoded record must decode");
    assert_eq!(decoded, record);
    assert_eq!(used, bytes.len());
});
