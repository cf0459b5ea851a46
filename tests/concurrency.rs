// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Shared-engine tests: one orchestrator serving many threads without locks
//! must produce exactly what sequential calls produce.

use std::thread;

use agentmark_core::watermark::{FallbackPolicy, ParserChain};
use agentmark_core::{
    DifferentialSampler, EmbeddingResult, KeystreamCodec, PayloadBits, SamplingContext, WatermarkOrchestrator,
};

const TOOLS: [&str; 4] = ["search", "open", "read", "finish"];
const THREADS: u64 = 8;
const STEPS_PER_THREAD: u64 = 16;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn engine_types_are_send_and_sync() {
    assert_send_sync::<WatermarkOrchestrator>();
    assert_send_sync::<KeystreamCodec>();
    assert_send_sync::<DifferentialSampler>();
    assert_send_sync::<ParserChain>();
    assert_send_sync::<FallbackPolicy>();
}

fn raw_for(step: u64) -> String {
    match step % 3 {
        0 => r#"{"action_weights": {"search": 0.4, "open": 0.3, "read": 0.2, "finish": 0.1}}"#.to_string(),
        1 => format!("Thinking about step {step}, probably read next."),
        _ => r#"```json
{"action_weights": [1, 1, 1, 1], "action": "open"}
```"#
            .to_string(),
    }
}

fn run_step(wm: &WatermarkOrchestrator, step: u64) -> EmbeddingResult {
    let ctx = SamplingContext::new(format!("agent{}||step", step / STEPS_PER_THREAD), step);
    wm.encode(&raw_for(step), &TOOLS, &ctx, step * 2).unwrap()
}

#[test]
fn concurrent_encodes_match_sequential() {
    let wm = WatermarkOrchestrator::with_defaults(PayloadBits::from_message("shared").unwrap()).unwrap();
    let total = THREADS * STEPS_PER_THREAD;

    let sequential: Vec<EmbeddingResult> = (0..total).map(|step| run_step(&wm, step)).collect();

    let concurrent: Vec<EmbeddingResult> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let wm = &wm;
                scope.spawn(move || {
                    (t * STEPS_PER_THREAD..(t + 1) * STEPS_PER_THREAD)
                        .map(|step| run_step(wm, step))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(concurrent, sequential);
}
