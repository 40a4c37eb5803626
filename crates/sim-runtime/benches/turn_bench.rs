use criterion::{criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use sim_core::{DemographicSlice, Player, PlayerId, SessionId, SliceId};
use sim_runtime::{SessionSetup, SessionState, SystemClock};
use std::sync::Arc;

fn bench_turns(c: &mut Criterion) {
    let mut setup = SessionSetup::new("bench", PlayerId(1));
    for i in 1..=50u64 {
        setup
            .players
            .push(Player::new(PlayerId(i), format!("p{i}"), Decimal::new(1_000_000, 0)));
    }
    setup.slices = (0..70u64)
        .map(|i| DemographicSlice {
            id: SliceId(1_000 + i),
            occupation: ["farmer", "miner", "clerk"][(i % 3) as usize].into(),
            class: "working".into(),
            ethnicity: "plains".into(),
            religion: "none".into(),
            province: format!("P{}", i % 7),
            settlement: "urban".into(),
            can_vote: true,
            population: 400 + i * 10,
        })
        .collect();
    let mut state = SessionState::new(SessionId(1), setup, Arc::new(SystemClock)).unwrap();
    state.initialize(None).unwrap();

    c.bench_function("turn_with_campaigns", |b| {
        b.iter(|| {
            for p in 2..=50u64 {
                let _ = state.start_campaign(PlayerId(p), SliceId(1_000 + p));
            }
            let _ = state.advance_turn();
        })
    });
}

criterion_group!(benches, bench_turns);
criterion_main!(benches);
