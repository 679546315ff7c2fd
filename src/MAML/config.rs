use super::error::{Error, Result};
use crate::Core::async_loop::LaunchMode;
use std::time::Duration;

pub const ENV_SPAWN_THREADS: &str = "MAML_SPAWN_THREADS";
pub const ENV_COMPRESS: &str = "MAML_COMPRESS";
pub const ENV_API_TRACING: &str = "MAML_API_TRACING";
pub const ENV_ABORT_ON_FATAL: &str = "MAML_ABORT_ON_FATAL";

/// Settings for a [`Context`](super::Context).
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) launch_mode: LaunchMode,
    pub(crate) compress_messages: bool,
    pub(crate) detailed_logging: bool,
    pub(crate) idle_wait: Duration,
    pub(crate) abort_on_fatal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            launch_mode: LaunchMode::Auto,
            compress_messages: false,
            detailed_logging: false,
            idle_wait: Duration::from_millis(1),
            abort_on_fatal: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the `MAML_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(spawn_threads) = env_flag(ENV_SPAWN_THREADS)? {
            config.launch_mode = if spawn_threads {
                LaunchMode::Thread
            } else {
                LaunchMode::Task
            };
        }
        if let Some(compress) = env_flag(ENV_COMPRESS)? {
            config.compress_messages = compress;
        }
        if let Some(tracing) = env_flag(ENV_API_TRACING)? {
            config.detailed_logging = tracing;
        }
        if let Some(abort) = env_flag(ENV_ABORT_ON_FATAL)? {
            config.abort_on_fatal = abort;
        }

        Ok(config)
    }

    pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
        self.launch_mode = mode;
        self
    }

    /// Compress payloads with lz4 before sending and decompress before
    /// dispatch. Every peer on the wire must agree on this setting.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_messages = enabled;
        self
    }

    pub fn with_detailed_logging(mut self, enabled: bool) -> Self {
        self.detailed_logging = enabled;
        self
    }

    /// Upper bound on how long an idle loop sleeps before polling again.
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// When set, a fatal error inside a background loop aborts the process
    /// after it has been logged. Otherwise it is only recorded.
    pub fn with_abort_on_fatal(mut self, abort: bool) -> Self {
        self.abort_on_fatal = abort;
        self
    }

    pub fn launch_mode(&self) -> LaunchMode {
        self.launch_mode
    }

    pub fn compress_messages(&self) -> bool {
        self.compress_messages
    }

    pub fn detailed_logging(&self) -> bool {
        self.detailed_logging
    }

    pub fn idle_wait(&self) -> Duration {
        self.idle_wait
    }

    pub fn abort_on_fatal(&self) -> bool {
        self.abort_on_fatal
    }
}

/// Reads a 0/1 style flag. Unset or empty means "not overridden".
fn env_flag(var: &'static str) -> Result<Option<bool>> {
    let value = match std::env::var(var) {
        Ok(value) => value,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(std::env::VarError::NotUnicode(raw)) => {
            return Err(Error::InvalidEnv {
                var,
                value: raw.to_string_lossy().into_owned(),
            })
        }
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "on" | "yes" => Ok(Some(true)),
        "0" | "false" | "off" | "no" => Ok(Some(false)),
        _ => match value.trim().parse::<i64>() {
            Ok(n) => Ok(Some(n != 0)),
            Err(_) => Err(Error::InvalidEnv { var, value }),
        },
    }
}
