#![no_main]

use std::fs;
use std::path::Path;

use libfuzzer_sys::fuzz_target;
use toolset_mock::{Fixture, PropertySet};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let result = std::panic::catch_unwind(|| check_fixture(input));
    match result {
        Ok(Ok(())) => {}
        Ok(Err(violation)) => {
            record_input("fixture_parse", data, &violation);
            panic!("{violation}");
        }
        Err(_) => record_input("fixture_parse", data, "panic"),
    }
});

/// Parsing never panics; a parsed fixture keeps line numbers inside the input
/// and the empty configuration activates only ungated declarations.
fn check_fixture(input: &str) -> Result<(), String> {
    let Ok(fixture) = Fixture::parse(input) else {
        return Ok(());
    };
    let lines = input.lines().count();
    for declaration in fixture.declarations() {
        match declaration.line {
            Some(line) if line >= 1 && line <= lines => {}
            other => return Err(format!("declaration line {other:?} outside 1..={lines}")),
        }
    }
    let empty = PropertySet::new();
    if let Some(gated) = fixture
        .active(&empty)
        .find(|declaration| !declaration.gate.is_unconditional())
    {
        return Err(format!("gated declaration active without properties: {gated:?}"));
    }
    Ok(())
}

fn record_input(target: &str, data: &[u8], reason: &str) {
    let dir = Path::new("fuzz").join("artifacts").join(target);
    let path = dir.join(format!("crash_{:016x}.mock", fnv1a64(data)));
    let written = fs::create_dir_all(&dir).and_then(|()| fs::write(&path, data));
    match written {
        Ok(()) => eprintln!(
            "fuzz input captured: target={target} reason={reason} path={} len={}",
            path.display(),
            data.len()
        ),
        Err(err) => eprintln!("fuzz input capture failed: target={target} err={err}"),
    }
}

fn fnv1a64(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    data.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}
