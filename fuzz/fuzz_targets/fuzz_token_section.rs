#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_native::{SectionFraming, TOKENS_END, TOKENS_START, parse_token_section};

fuzz_target!(|data: &[u8]| {
    let Ok(stdout) = std::str::from_utf8(data) else {
        return;
    };

    // Arbitrary native stdout must parse or be rejected, never panic.
    let Ok(stream) = parse_token_section(stdout) else {
        return;
    };
    if stream.framing == SectionFraming::Missing {
        assert!(stream.tokens.is_empty());
    }

    // Re-emitting a parsed section yields the same tokens.
    let mut framed = format!("{TOKENS_START}\n");
    for id in stream.tokens.iter() {
        framed.push_str(&id.to_string());
        framed.push('\n');
    }
    framed.push_str(TOKENS_END);
    framed.push('\n');
    let reparsed = parse_token_section(&framed).expect("re-emitted section parses");
    assert_eq!(reparsed.tokens, stream.tokens);
    assert_eq!(reparsed.framing, SectionFraming::Complete);
});
