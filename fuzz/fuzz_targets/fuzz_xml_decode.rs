#![no_main]

use btedit_core::{NodeModelRegistry, XmlCodec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let registry = NodeModelRegistry::with_builtins();
    let codec = XmlCodec::new(&registry);

    // Arbitrary input may be rejected, but never panics.
    let Ok(set) = codec.decode(text) else {
        return;
    };
    for tree in set.trees.values() {
        tree.validate().expect("decoded tree violates structure");
    }

    // Anything accepted has a canonical form that is a fixed point.
    let first = codec.encode(&set);
    let reparsed = codec.decode(&first).expect("canonical output must decode");
    assert_eq!(reparsed, set, "decode(encode(s)) != s");
    assert_eq!(codec.encode(&reparsed), first, "encoding is not idempotent");
});
