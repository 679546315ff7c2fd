// Collectives queued on a context and driven by its transport loop.
use dmxp_maml::Transport::{Channel, LocalFabric, Peer, RequestHandle, Transport};
use dmxp_maml::{Collective, Config, Context, Error, LaunchMode, Message, MessageHandler, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config() -> Config {
    Config::new()
        .with_launch_mode(LaunchMode::Thread)
        .with_abort_on_fatal(false)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    done()
}

/// Finishes after a fixed number of polls.
struct Countdown {
    polls: usize,
    done: Arc<AtomicBool>,
}

impl Countdown {
    fn new(polls: usize) -> (Self, Arc<AtomicBool>) {
        let done = Arc::new(AtomicBool::new(false));
        (
            Self {
                polls,
                done: Arc::clone(&done),
            },
            done,
        )
    }
}

impl Collective for Countdown {
    fn start(&mut self, _transport: &dyn Transport) -> Result<()> {
        Ok(())
    }

    fn finished(&mut self, _transport: &dyn Transport) -> Result<bool> {
        if self.polls == 0 {
            self.done.store(true, Ordering::SeqCst);
            return Ok(true);
        }
        self.polls -= 1;
        Ok(false)
    }
}

/// Pushes one payload to a peer straight through the transport.
struct Notify {
    channel: Channel,
    peer: Peer,
    request: Option<RequestHandle>,
    done: Arc<AtomicBool>,
}

impl Collective for Notify {
    fn start(&mut self, transport: &dyn Transport) -> Result<()> {
        self.request = Some(transport.isend(self.channel, self.peer, 5, b"notify")?);
        Ok(())
    }

    fn finished(&mut self, transport: &dyn Transport) -> Result<bool> {
        let Some(request) = self.request else {
            return Ok(false);
        };
        let done = transport.test_send(request)?;
        if done {
            self.done.store(true, Ordering::SeqCst);
        }
        Ok(done)
    }
}

struct Refused;

impl Collective for Refused {
    fn start(&mut self, _transport: &dyn Transport) -> Result<()> {
        Err(Error::Collective("peer group dissolved".into()))
    }

    fn finished(&mut self, _transport: &dyn Transport) -> Result<bool> {
        Ok(true)
    }
}

#[test]
fn flush_waits_for_running_collectives() {
    let fabric = LocalFabric::new(1);
    let context = Context::init(fabric.endpoint(0).unwrap(), config()).unwrap();
    context.start().unwrap();

    let (countdown, done) = Countdown::new(50);
    context.queue_collective(countdown).unwrap();
    context.flush().unwrap();

    assert!(done.load(Ordering::SeqCst));
    assert_eq!(context.pending_counts().collectives, 0);
    context.stop().unwrap();
}

#[test]
fn stopped_flush_drives_collectives() {
    let fabric = LocalFabric::new(1);
    let context = Context::init(fabric.endpoint(0).unwrap(), config()).unwrap();

    let (countdown, done) = Countdown::new(5);
    context.queue_collective(countdown).unwrap();
    assert_eq!(context.pending_counts().collectives, 1);
    assert!(!done.load(Ordering::SeqCst));

    context.flush().unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert!(context.pending_counts().is_empty());
}

#[test]
fn collective_completes_once_the_peer_claims_it() {
    let fabric = LocalFabric::rendezvous(2);
    let channel = fabric.open_channel();
    let a = Context::init(fabric.endpoint(0).unwrap(), config()).unwrap();
    let b = Context::init(fabric.endpoint(1).unwrap(), config()).unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler: Arc<dyn MessageHandler> =
        Arc::new(move |message: Message| sink.lock().push(message));
    b.register_handler_for(channel, handler);
    b.start().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    a.queue_collective(Notify {
        channel,
        peer: Peer(1),
        request: None,
        done: Arc::clone(&done),
    })
    .unwrap();
    a.flush().unwrap();
    assert!(done.load(Ordering::SeqCst));

    assert!(wait_until(Duration::from_secs(5), || received.lock().len() == 1));
    let received = received.lock();
    assert_eq!(received[0].data(), b"notify");
    assert_eq!(received[0].tag(), 5);
    b.stop().unwrap();
}

#[test]
fn failing_collective_is_fatal() {
    let fabric = LocalFabric::new(1);
    let context = Context::init(fabric.endpoint(0).unwrap(), config()).unwrap();
    context.start().unwrap();

    context.queue_collective(Refused).unwrap();
    assert!(wait_until(Duration::from_secs(5), || context
        .fatal_error()
        .is_some()));
    assert!(context
        .fatal_error()
        .unwrap()
        .contains("peer group dissolved"));
    assert!(matches!(context.flush(), Err(Error::Fatal(_))));
    assert!(matches!(
        context.queue_collective(Countdown::new(1).0),
        Err(Error::Fatal(_))
    ));
}
