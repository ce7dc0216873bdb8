#![no_main]

use std::time::{Duration, Instant};

use duel_poll::config::PollConfig;
use duel_poll::engine::PollEngine;
use duel_poll::event::PollEvent;
use duel_poll::protocol::ServerMessage;
use libfuzzer_sys::fuzz_target;

// Feeds newline-separated server messages into a connected engine, ticking
// the clock between them. The engine must never panic on provider input.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let mut engine = PollEngine::new(PollConfig::new("fuzz"), Vec::<PollEvent>::new());
    engine.connect();
    let mut now = Instant::now();
    for line in text.lines() {
        if let Ok(msg) = serde_json::from_str::<ServerMessage>(line) {
            engine.handle_server_message(now, &msg);
        }
        now += Duration::from_millis(250);
        engine.on_tick(now);
        let _ = engine.drain_outgoing();
        engine.presenter_mut().clear();
    }
});
