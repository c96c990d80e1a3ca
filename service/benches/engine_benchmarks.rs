//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use async_trait::async_trait;
use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use termgate_service::{
    Encoding, EngineConfig, Environment, KvLocks, KvMethod, KvTable, LockManager, ProtocolKind,
    Result, SessionContext, SessionHandle, SessionId, SessionInfo, SessionInput, SessionMessage,
    SessionScript, spawn_session,
};
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

// ============================================================================
// Output Encoding
// ============================================================================

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_output");
    let screen = "╔══ Main Menu ══╗ ░▒▓ Welcome, traveller! ▓▒░\r\n".repeat(40);
    group.throughput(Throughput::Bytes(screen.len() as u64));

    for encoding in [Encoding::Utf8, Encoding::Cp437] {
        group.bench_with_input(BenchmarkId::from_parameter(encoding), &screen, |b, screen| {
            b.iter(|| black_box(encoding.encode(black_box(screen))))
        });
    }

    group.finish();
}

// ============================================================================
// Session Messages
// ============================================================================

fn bench_parse_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_event");

    group.bench_function("output", |b| {
        b.iter(|| {
            black_box(SessionMessage::from_event(
                black_box("output"),
                json!(["Hello there\r\n", "cp437"]),
            ))
        })
    });

    group.bench_function("db_stream", |b| {
        b.iter(|| {
            black_box(SessionMessage::from_event(
                black_box("db=bbs"),
                json!(["users", "iteritems"]),
            ))
        })
    });

    group.finish();
}

// ============================================================================
// Coordination
// ============================================================================

fn bench_locks(c: &mut Criterion) {
    let holder = SessionId::from("telnet-127.0.0.1:4000");
    c.bench_function("lock_acquire_release", |b| {
        let mut locks = LockManager::new();
        b.iter(|| {
            black_box(locks.acquire("board", &holder, None, |_| true));
            black_box(locks.release("board", &holder));
        })
    });
}

fn bench_kv(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut table = KvTable::open(dir.path().join("users.json")).unwrap();
    for index in 0..1000 {
        table
            .execute(KvMethod::Set, &[json!(format!("user{index:04}")), json!(index)])
            .unwrap();
    }

    let mut group = c.benchmark_group("kv");
    group.bench_function("get", |b| {
        b.iter(|| black_box(table.execute(KvMethod::Get, &[json!("user0500")]).unwrap()))
    });
    group.bench_function("iterkeys_1000", |b| {
        b.iter(|| black_box(table.execute(KvMethod::IterKeys, &[]).unwrap()))
    });
    group.finish();
}

// ============================================================================
// Session Round Trip
// ============================================================================

struct Echo;

#[async_trait]
impl SessionScript for Echo {
    async fn run(&self, ctx: &mut SessionContext) -> Result<()> {
        loop {
            let bytes = ctx.read_input().await?;
            ctx.write(String::from_utf8_lossy(&bytes).into_owned()).await?;
        }
    }
}

fn bench_session_round_trip(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let handle = runtime.block_on(async {
        spawn_session(
            Arc::new(Echo),
            SessionInfo {
                id: SessionId::from("telnet-127.0.0.1:4000"),
                kind: ProtocolKind::Telnet,
                peer: "127.0.0.1:4000".parse().unwrap(),
                environment: Environment::new(),
            },
            Arc::new(EngineConfig::default()),
            KvLocks::new(),
        )
    });

    let SessionHandle { input, output, .. } = handle;
    let output = Arc::new(Mutex::new(output));

    c.bench_function("session_round_trip", |b| {
        b.to_async(&runtime).iter(|| {
            let input = input.clone();
            let output = output.clone();
            async move {
                input
                    .send(SessionInput::Input(Bytes::from_static(b"look\r\n")))
                    .await
                    .unwrap();
                black_box(output.lock().await.recv().await.unwrap())
            }
        })
    });
}

criterion_group!(protocol_benches, bench_encoding, bench_parse_events);

criterion_group!(coordination_benches, bench_locks, bench_kv, bench_session_round_trip);

criterion_main!(protocol_benches, coordination_benches);
