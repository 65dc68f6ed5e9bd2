use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Utc};
use ulid::Ulid;

use studyspace::clock::{Clock, ManualClock, SystemClock};
use studyspace::config::EngineConfig;
use studyspace::engine::{Engine, EngineError, SpaceQuery};
use studyspace::model::{HOUR_MS, UserId};
use studyspace::notify::NotifyHub;
use studyspace::sweeper::Sweeper;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn engine(name: &str, clock: Arc<dyn Clock>) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("studyspace_bench");
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let engine = Engine::new(path, Arc::new(NotifyHub::new()), clock, EngineConfig::default())
        .expect("open engine");
    Arc::new(engine)
}

fn tomorrow() -> NaiveDate {
    Utc::now().date_naive().checked_add_days(Days::new(1)).expect("date in range")
}

async fn phase1_sequential() {
    let engine = engine("sequential.wal", Arc::new(SystemClock));
    let id = engine.provision_space("R1", "self-study", "A", 1).await.expect("provision").id;
    let user = UserId::from("bench");
    let n = 500;

    let mut latencies = Vec::with_capacity(n * 2);
    let start = Instant::now();
    for _ in 0..n {
        let t = Instant::now();
        engine.book(id, &user, "08:00-10:00", tomorrow()).await.expect("book");
        latencies.push(t.elapsed());
        let t = Instant::now();
        engine.cancel(id, &user).await.expect("cancel");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = (n * 2) as f64 / elapsed.as_secs_f64();
    println!("  {} transitions in {:.2}s = {ops:.0} ops/sec", n * 2, elapsed.as_secs_f64());
    print_latency("transition latency", &mut latencies);
}

async fn phase2_contention() {
    let engine = engine("contention.wal", Arc::new(SystemClock));
    engine.seed_sample_spaces().await.expect("seed");
    let spaces: Vec<Ulid> = engine.list_spaces().await.into_iter().map(|s| s.id).collect();
    let n_tasks = 64;
    let rounds = 50;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        let spaces = spaces.clone();
        handles.push(tokio::spawn(async move {
            let user = UserId::new(format!("user{i}"));
            let (mut won, mut lost) = (0usize, 0usize);
            for r in 0..rounds {
                let id = spaces[(i + r) % 4];
                match engine.book(id, &user, "10:00-12:00", tomorrow()).await {
                    Ok(_) => {
                        won += 1;
                        let _ = engine.cancel(id, &user).await;
                    }
                    Err(EngineError::Conflict(_) | EngineError::WrongState { .. }) => lost += 1,
                    Err(e) => panic!("unexpected: {e}"),
                }
            }
            (won, lost)
        }));
    }

    let (mut won, mut lost) = (0, 0);
    for h in handles {
        let (w, l) = h.await.expect("task");
        won += w;
        lost += l;
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks x {rounds} attempts on 4 hot spaces: {won} won, {lost} lost in {:.2}s",
        elapsed.as_secs_f64()
    );
    println!("  ledger rows: {}", engine.ledger().len());
}

async fn phase3_search_under_load() {
    let engine = engine("search.wal", Arc::new(SystemClock));
    engine.seed_sample_spaces().await.expect("seed");
    let spaces: Vec<Ulid> = engine.list_spaces().await.into_iter().map(|s| s.id).collect();

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            let id = spaces[i];
            tokio::spawn(async move {
                let user = UserId::new(format!("writer{i}"));
                for _ in 0..200 {
                    if engine.book(id, &user, "13:00-15:00", tomorrow()).await.is_ok() {
                        let _ = engine.cancel(id, &user).await;
                    }
                }
            })
        })
        .collect();

    let query = SpaceQuery {
        slot: Some("13:00-15:00".into()),
        date: Some(tomorrow()),
        ..SpaceQuery::default()
    };
    let viewer = UserId::from("reader");
    let mut latencies = Vec::new();
    for _ in 0..500 {
        let t = Instant::now();
        engine.search(&query, &viewer).await.expect("search");
        latencies.push(t.elapsed());
    }
    for w in writers {
        w.await.expect("writer");
    }
    print_latency("search latency", &mut latencies);
}

async fn phase4_sweep() {
    let clock = Arc::new(ManualClock::new(SystemClock.now_ms()));
    let engine = engine("sweep.wal", clock.clone());
    let n = 2_000;
    let user = UserId::from("sleepy");
    for i in 0..n {
        let space = engine
            .provision_space(&format!("S{i}"), "self-study", "B", (i / 100) as i32)
            .await
            .expect("provision");
        engine.book(space.id, &user, "08:00-10:00", tomorrow()).await.expect("book");
    }

    clock.advance(3 * 24 * HOUR_MS);
    let start = Instant::now();
    let report = Sweeper::new(engine.clone()).tick().await;
    println!(
        "  expired {} of {n} bookings in one tick ({:.2}s)",
        report.expired,
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    println!("=== studyspace stress benchmark ===\n");

    println!("[phase 1] sequential book/cancel");
    phase1_sequential().await;

    println!("\n[phase 2] contended booking");
    phase2_contention().await;

    println!("\n[phase 3] search latency under write load");
    phase3_search_under_load().await;

    println!("\n[phase 4] sweep over many lapsed bookings");
    phase4_sweep().await;

    println!("\n=== benchmark complete ===");
}
