// One rank of a shared memory message layer.
//
// Start rank 0 first; it creates the region:
//   cargo run --example shm_peer -- maml_demo 0 2 1000
//   cargo run --example shm_peer -- maml_demo 1 2 1000
use dmxp_maml::Transport::{Channel, ShmOptions, ShmTransport, TransportError};
use dmxp_maml::{Config, Context, Message, Peer};
use sha2::{Digest, Sha256};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn connect(name: &str, rank: u32) -> Result<ShmTransport, TransportError> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match ShmTransport::connect(name, rank) {
            Ok(transport) => return Ok(transport),
            Err(e) if Instant::now() < deadline => {
                tracing::debug!(error = %e, "region not ready yet, retrying");
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(e),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <region> <rank> <peers> [num_messages]", args[0]);
        std::process::exit(1);
    }
    let name = &args[1];
    let rank: u32 = args[2].parse()?;
    let peers: usize = args[3].parse()?;
    let num_messages: usize = match args.get(4) {
        Some(n) => n.parse()?,
        None => 100,
    };

    let transport = if rank == 0 {
        ShmTransport::create(name, ShmOptions::default().with_peers(peers), rank)?
    } else {
        connect(name, rank)?
    };
    println!("Peer {}: attached to {:?}", rank, transport);

    let channel = Channel(0);
    let context = Context::init(Arc::new(transport), Config::from_env()?)?;

    let expected = num_messages * (peers - 1);
    let received = Arc::new(AtomicUsize::new(0));
    let received_in_handler = Arc::clone(&received);
    context.register_handler_for(
        channel,
        Arc::new(move |message: Message| {
            let count = received_in_handler.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                println!("Received {} messages", count);
            }
            tracing::trace!(from = ?message.peer(), body = %String::from_utf8_lossy(message.data()));
        }),
    );

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_for_handler = Arc::clone(&keep_running);
    ctrlc::set_handler(move || {
        keep_running_for_handler.store(false, Ordering::SeqCst);
    })?;

    context.start()?;

    let start = Instant::now();
    for i in 0..num_messages {
        let mut hasher = Sha256::new();
        hasher.update(format!("peer_{}_message_{}", rank, i).as_bytes());
        let body = format!("{}:{:x}", i, hasher.finalize());

        for peer in (0..peers as u32).filter(|&p| p != rank) {
            context.send(Message::addressed(channel, Peer(peer), body.as_bytes())?)?;
        }
    }
    context.flush()?;
    println!("Peer {}: sent {} messages in {:.2?}", rank, num_messages * (peers - 1), start.elapsed());

    while keep_running.load(Ordering::SeqCst) && received.load(Ordering::Relaxed) < expected {
        std::thread::sleep(Duration::from_millis(10));
    }
    println!(
        "Peer {}: received {} of {} messages",
        rank,
        received.load(Ordering::Relaxed),
        expected
    );

    context.log_message_timings();
    context.finalize()?;
    Ok(())
}
