// Two in-process ranks bouncing messages through the message layer.
// Run with: RUST_LOG=debug cargo run --example local_ping_pong -- 1000
use dmxp_maml::Transport::LocalFabric;
use dmxp_maml::{Config, Context, Message, Peer};
use parking_lot::Mutex;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let rounds: usize = match args.get(1) {
        Some(n) => n.parse()?,
        None => 1000,
    };

    let fabric = LocalFabric::new(2);
    let channel = fabric.open_channel();
    let config = Config::from_env()?;

    let ping_side = Context::init(fabric.endpoint(0)?, config.clone())?;
    let pong_side = Context::init(fabric.endpoint(1)?, config)?;

    // rank 1 hands pings to the main thread, which answers them
    let (to_main, pings) = mpsc::channel::<Message>();
    let to_main = Mutex::new(to_main);
    pong_side.register_handler_for(
        channel,
        Arc::new(move |message: Message| {
            let _ = to_main.lock().send(message);
        }),
    );

    let pongs = Arc::new(AtomicUsize::new(0));
    let pongs_seen = Arc::clone(&pongs);
    ping_side.register_handler_for(
        channel,
        Arc::new(move |_message: Message| {
            pongs_seen.fetch_add(1, Ordering::Relaxed);
        }),
    );

    ping_side.start()?;
    pong_side.start()?;

    println!("Ping-pong: {} rounds over {}", rounds, channel);
    let start = Instant::now();
    for round in 0..rounds {
        let ping = Message::addressed(channel, Peer(1), format!("ping {}", round).as_bytes())?;
        ping_side.send(ping)?;

        let received = pings.recv_timeout(Duration::from_secs(5))?;
        let text = String::from_utf8_lossy(received.data()).replace("ping", "pong");
        pong_side.send_to(channel, Peer(0), Message::from_vec(text.into_bytes())?)?;
    }

    ping_side.flush()?;
    pong_side.flush()?;
    while pongs.load(Ordering::Relaxed) < rounds {
        std::thread::sleep(Duration::from_millis(1));
    }
    let elapsed = start.elapsed();

    println!("Ping-pong: {} round trips in {:.2?}", rounds, elapsed);
    println!(
        "Ping-pong: {:.2} round trips/sec",
        rounds as f64 / elapsed.as_secs_f64()
    );

    ping_side.log_message_timings();
    pong_side.log_message_timings();
    ping_side.finalize()?;
    pong_side.finalize()?;
    Ok(())
}
