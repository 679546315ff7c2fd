// Repeating background task: runs a body over and over while armed.
//
// The body is driven either by a dedicated thread or by a chain of rayon
// tasks that re-spawn themselves after each invocation. `stop()` disarms the
// loop and blocks until the invocation in progress (if any) has returned.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::JoinHandle;

/// How an [`AsyncLoop`] gets scheduled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LaunchMode {
    /// Pick `Task` when the rayon pool has more than four workers, `Thread`
    /// otherwise.
    Auto,
    /// Dedicated OS thread per loop.
    Thread,
    /// Recurring task on the shared rayon pool.
    Task,
}

impl LaunchMode {
    pub fn resolve(self) -> LaunchMode {
        match self {
            LaunchMode::Auto => {
                if rayon::current_num_threads() > 4 {
                    LaunchMode::Task
                } else {
                    LaunchMode::Thread
                }
            }
            mode => mode,
        }
    }
}

type Body = Box<dyn FnMut() -> ControlFlow<()> + Send>;

struct Phase {
    armed: bool,
    /// Thread mode: the body is executing. Task mode: a task is scheduled or running.
    active: bool,
    shutdown: bool,
}

struct Shared {
    phase: Mutex<Phase>,
    changed: Condvar,
    body: Mutex<Body>,
}

pub struct AsyncLoop {
    shared: Arc<Shared>,
    mode: LaunchMode,
    thread: Option<JoinHandle<()>>,
}

impl AsyncLoop {
    /// Creates a disarmed loop. Returning `ControlFlow::Break` from `body`
    /// disarms the loop from the inside.
    pub fn new<F>(name: &str, body: F, mode: LaunchMode) -> std::io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let mode = mode.resolve();
        let shared = Arc::new(Shared {
            phase: Mutex::new(Phase {
                armed: false,
                active: false,
                shutdown: false,
            }),
            changed: Condvar::new(),
            body: Mutex::new(Box::new(body)),
        });

        let thread = match mode {
            LaunchMode::Thread => {
                let shared = Arc::clone(&shared);
                Some(
                    std::thread::Builder::new()
                        .name(name.to_string())
                        .spawn(move || run_thread(shared))?,
                )
            }
            _ => None,
        };

        Ok(Self {
            shared,
            mode,
            thread,
        })
    }

    /// The resolved launch mode (never `Auto`).
    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.shared.phase.lock().armed
    }

    pub fn start(&self) {
        let mut phase = self.shared.phase.lock();
        if phase.armed || phase.shutdown {
            return;
        }
        phase.armed = true;

        match self.mode {
            LaunchMode::Task => {
                // A task still winding down from the last stop() picks the
                // re-armed flag up by itself.
                if !phase.active {
                    phase.active = true;
                    drop(phase);
                    let shared = Arc::clone(&self.shared);
                    rayon::spawn(move || run_task(shared));
                }
            }
            _ => {
                self.shared.changed.notify_all();
            }
        }
    }

    /// Disarms the loop and waits for the current body invocation to finish.
    pub fn stop(&self) {
        let mut phase = self.shared.phase.lock();
        phase.armed = false;
        while phase.active {
            self.shared.changed.wait(&mut phase);
        }
    }
}

fn run_thread(shared: Arc<Shared>) {
    loop {
        {
            let mut phase = shared.phase.lock();
            while !phase.armed && !phase.shutdown {
                shared.changed.wait(&mut phase);
            }
            if phase.shutdown {
                return;
            }
            phase.active = true;
        }

        let flow = (shared.body.lock())();

        let mut phase = shared.phase.lock();
        if flow.is_break() {
            phase.armed = false;
        }
        phase.active = false;
        shared.changed.notify_all();
    }
}

fn run_task(shared: Arc<Shared>) {
    // A worker pops its own deque first, so the job this chain spawned last
    // would come straight back. Run one other queued job before the body so
    // chains sharing a worker take turns. Each chain has at most one job
    // queued or running, which bounds the nesting by the number of chains.
    let _ = rayon::yield_now();

    {
        let mut phase = shared.phase.lock();
        if !phase.armed || phase.shutdown {
            phase.active = false;
            shared.changed.notify_all();
            return;
        }
    }

    let flow = (shared.body.lock())();

    let mut phase = shared.phase.lock();
    if flow.is_break() {
        phase.armed = false;
    }
    if phase.armed && !phase.shutdown {
        drop(phase);
        rayon::spawn(move || run_task(shared));
    } else {
        phase.active = false;
        shared.changed.notify_all();
    }
}

impl Drop for AsyncLoop {
    fn drop(&mut self) {
        {
            let mut phase = self.shared.phase.lock();
            phase.armed = false;
            phase.shutdown = true;
            self.shared.changed.notify_all();
            while phase.active {
                self.shared.changed.wait(&mut phase);
            }
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for AsyncLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLoop")
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .finish()
    }
}
