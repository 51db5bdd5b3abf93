//! Reconciliation pass cost

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ladder_quoter::config::QuoteConfig;
use ladder_quoter::engine::types::{OrderReport, OrderUpdate};
use ladder_quoter::market_data::adapters::simulated::SimulatedAdapter;
use ladder_quoter::market_data::reference::{MarketTick, TickKind};
use ladder_quoter::market_data::router::Session;
use ladder_quoter::quoting::{EngineEvent, OrderReconciler, QuoteAction};
use rand::{rngs::StdRng, SeedableRng};

fn tick(mid: f64) -> EngineEvent {
    EngineEvent::Market(MarketTick::new("ETH", TickKind::TopOfBook { bid: Some(mid - 0.01), ask: Some(mid + 0.01) }, 0))
}

fn benchmark_idle_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_idle");
    for levels in [3usize, 10, 50] {
        let mut engine = OrderReconciler::new(QuoteConfig::new("ETH", 1.0, 0.001, levels));
        engine.handle(tick(100.0));
        group.bench_with_input(BenchmarkId::from_parameter(levels), &levels, |b, _| {
            b.iter(|| black_box(engine.handle(EngineEvent::Reconcile)))
        });
    }
    group.finish();
}

fn benchmark_requote(c: &mut Criterion) {
    c.bench_function("reconcile_requote_10_levels", |b| {
        let mut engine = OrderReconciler::new(QuoteConfig::new("ETH", 1.0, 0.001, 10));
        let mut mid = 100.0;
        b.iter(|| {
            // every move is outside tolerance: cancel all, then ack all
            mid = if mid > 100.0 { 100.0 } else { 101.0 };
            let actions = engine.handle(tick(mid));
            for action in actions {
                if let QuoteAction::Cancel { id, .. } = action {
                    black_box(engine.handle(EngineEvent::Order(OrderUpdate::new(id, OrderReport::Canceled))));
                }
            }
        })
    });
}

fn benchmark_paper_session(c: &mut Criterion) {
    let adapter = SimulatedAdapter::new("ETH", None, 100.0);
    let mut rng = StdRng::seed_from_u64(42);
    let mut mid = 100.0;
    let events: Vec<_> = (0..1_000).flat_map(|seq| adapter.step(&mut rng, &mut mid, seq)).collect();

    c.bench_function("paper_session_1000_ticks", |b| {
        b.iter(|| {
            let mut session = Session::new(QuoteConfig::new("ETH", 1.0, 0.001, 5)).expect("valid config");
            for event in &events {
                session.on_market(event.clone());
            }
            black_box(session.mm.status())
        })
    });
}

criterion_group!(benches, benchmark_idle_pass, benchmark_requote, benchmark_paper_session);
criterion_main!(benches);
