//! fuzzrig binary: the driver wired to a built-in demonstration target.
//!
//! The target is a tiny scanner with distinct coverage edges per input
//! construct and a deliberate crash on the `X` marker byte, so every
//! self-reinvoking mode (workers, crash minimization, cleansing, merge)
//! can be exercised end to end against this same binary.

use tracing_subscriber::EnvFilter;

use fuzzrig::coverage;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn demo_target(data: &[u8]) -> i32 {
    coverage::edge("demo:enter");
    if data.len() > 4 {
        coverage::edge("demo:long");
    }
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if byte == b'X' {
            panic!("marker byte reached");
        }
        if data[i..].starts_with(b"KEY") {
            coverage::edge("demo:key");
            i += 3;
            continue;
        }
        match byte {
            b'{' => coverage::edge("demo:open"),
            b'}' => coverage::edge("demo:close"),
            b'A'..=b'Z' => coverage::edge(&format!("demo:upper:{}", byte as char)),
            b'a'..=b'z' => coverage::edge("demo:lower"),
            b'0'..=b'9' => coverage::edge("demo:digit"),
            _ => {}
        }
        i += 1;
    }
    0
}

fn main() {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();
    std::process::exit(fuzzrig::run_driver(&args, demo_target));
}
