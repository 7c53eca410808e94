use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

const MINUTE: i64 = 60_000;
const DAY: i64 = 24 * 60 * MINUTE;

async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("slotbook")
        .user("slotbook")
        .password(std::env::var("SLOTBOOK_PASSWORD").unwrap_or_else(|_| "slotbook".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

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

/// A faculty member with `n` five-minute slots, starting a few days out.
async fn setup_faculty(client: &Client, subject: &str, n: usize, day_offset: i64) -> (Ulid, Vec<Ulid>) {
    let faculty = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO users VALUES ('{faculty}', 'bench faculty', 'faculty', 'EXT-{faculty}')"
        ))
        .await
        .unwrap();

    let base = (now_ms() / DAY + day_offset) * DAY;
    let mut slots = Vec::with_capacity(n);
    for i in 0..n as i64 {
        let slot = Ulid::new();
        let start = base + i * 10 * MINUTE;
        client
            .batch_execute(&format!(
                r#"INSERT INTO slots VALUES ('{slot}', '{faculty}', '{subject}', {start}, {})"#,
                start + 5 * MINUTE
            ))
            .await
            .unwrap();
        slots.push(slot);
    }
    (faculty, slots)
}

/// A student in `team` whose only mentor is `faculty`.
async fn add_student(client: &Client, team: &str, faculty: Ulid) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO users VALUES ('{id}', 'bench student', 'student')"))
        .await
        .unwrap();
    client
        .batch_execute(&format!("INSERT INTO profiles VALUES ('{id}', '{team}', 'EXT-{faculty}')"))
        .await
        .unwrap();
    id
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let n = 500;
    let (faculty, slots) = setup_faculty(&client, &format!("seq-{}", Ulid::new()), n, 3).await;

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for slot in &slots {
        // One team per booking so the team rule never fires.
        let student = add_student(&client, &format!("team-{}", Ulid::new()), faculty).await;
        let t = Instant::now();
        client
            .batch_execute(&format!("INSERT INTO bookings VALUES ('{slot}', '{student}')"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    let n_slots = 20;
    let n_clients = 50;
    let setup = connect(host, port).await;
    let (faculty, slots) = setup_faculty(&setup, &format!("race-{}", Ulid::new()), n_slots, 5).await;

    let mut students = Vec::with_capacity(n_clients);
    for _ in 0..n_clients {
        students.push(add_student(&setup, &format!("team-{}", Ulid::new()), faculty).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for student in students {
        let host = host.to_string();
        let slots = slots.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut won = 0usize;
            let mut latencies = Vec::with_capacity(slots.len());
            for slot in slots {
                let t = Instant::now();
                let result = client
                    .batch_execute(&format!("INSERT INTO bookings VALUES ('{slot}', '{student}')"))
                    .await;
                latencies.push(t.elapsed());
                match result {
                    Ok(()) => won += 1,
                    Err(e) => {
                        let code = e.as_db_error().map(|db| db.code().code().to_string());
                        // Losing the race is expected; anything else is not.
                        if code.as_deref() != Some("23P01") {
                            eprintln!("unexpected error: {e}");
                        }
                    }
                }
            }
            (won, latencies)
        }));
    }

    let mut total_won = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (won, mut l) = h.await.unwrap();
        total_won += won;
        latencies.append(&mut l);
    }
    let elapsed = start.elapsed();

    println!(
        "  {n_clients} clients x {n_slots} slots: {total_won} bookings in {:.2}s (expected {n_slots})",
        elapsed.as_secs_f64()
    );
    if total_won != n_slots {
        eprintln!("  !! double booking or lost booking detected");
    }
    print_latency("attempt latency", &mut latencies);
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let subject = format!("read-{}", Ulid::new());
    let (faculty, slots) = setup_faculty(&setup, &subject, 200, 7).await;

    let writer_host = host.to_string();
    let writer = tokio::spawn(async move {
        let client = connect(&writer_host, port).await;
        for slot in slots {
            let student = add_student(&client, &format!("team-{}", Ulid::new()), faculty).await;
            let _ = client
                .batch_execute(&format!("INSERT INTO bookings VALUES ('{slot}', '{student}')"))
                .await;
        }
    });

    let reader = connect(host, port).await;
    let mut latencies = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline && !writer.is_finished() {
        let t = Instant::now();
        reader
            .simple_query(&format!("SELECT * FROM slots WHERE faculty_id = '{faculty}'"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let _ = writer.await;
    print_latency("faculty slot listing", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SLOTBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SLOTBOOK_PORT");

    println!("=== slotbook contention benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] many students racing for the same slots");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under booking load");
    phase3_read_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
