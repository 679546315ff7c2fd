use dmxp_maml::MAML::{Mailbox, Message};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn message(byte: u8) -> Message {
    Message::from_bytes(&[byte]).unwrap()
}

#[test]
fn drain_takes_everything_in_push_order() {
    let mailbox = Mailbox::new();
    assert!(mailbox.drain_all().is_empty());

    for i in 0..5 {
        mailbox.push(message(i));
    }
    assert_eq!(mailbox.len(), 5);

    let drained: Vec<u8> = mailbox.drain_all().iter().map(|m| m.data()[0]).collect();
    assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    assert!(mailbox.is_empty());
}

#[test]
fn concurrent_producers_lose_nothing() {
    let mailbox = Mailbox::new();
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 500;

    let mut seen = Vec::new();
    crossbeam_utils::thread::scope(|s| {
        for p in 0..PRODUCERS {
            let mailbox = &mailbox;
            s.spawn(move |_| {
                for i in 0..PER_PRODUCER {
                    let mut bytes = (p as u32).to_le_bytes().to_vec();
                    bytes.extend_from_slice(&(i as u32).to_le_bytes());
                    mailbox.push(Message::from_vec(bytes).unwrap());
                }
            });
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.len() < PRODUCERS * PER_PRODUCER && Instant::now() < deadline {
            seen.extend(mailbox.drain_all().into_iter().map(Message::into_vec));
            mailbox.wait_for_items(Duration::from_millis(1));
        }
    })
    .unwrap();

    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
}

#[test]
fn wait_for_items_returns_early_on_push() {
    let mailbox = Arc::new(Mailbox::new());
    let pusher = Arc::clone(&mailbox);

    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        pusher.push(message(1));
    });

    let start = Instant::now();
    while mailbox.is_empty() && start.elapsed() < Duration::from_secs(5) {
        mailbox.wait_for_items(Duration::from_secs(5));
    }
    handle.join().unwrap();

    assert_eq!(mailbox.len(), 1);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn wait_for_items_times_out_when_idle() {
    let mailbox = Mailbox::new();
    let start = Instant::now();
    mailbox.wait_for_items(Duration::from_millis(10));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(mailbox.is_empty());
}
