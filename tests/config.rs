use dmxp_maml::MAML::config::{
    ENV_ABORT_ON_FATAL, ENV_API_TRACING, ENV_COMPRESS, ENV_SPAWN_THREADS,
};
use dmxp_maml::{Config, Error, LaunchMode};
use serial_test::serial;
use std::time::Duration;

const ALL: [&str; 4] = [ENV_SPAWN_THREADS, ENV_COMPRESS, ENV_API_TRACING, ENV_ABORT_ON_FATAL];

fn clear_env() {
    for var in ALL {
        std::env::remove_var(var);
    }
}

#[test]
fn defaults() {
    let config = Config::default();
    assert_eq!(config.launch_mode(), LaunchMode::Auto);
    assert!(!config.compress_messages());
    assert!(!config.detailed_logging());
    assert!(config.abort_on_fatal());
    assert_eq!(config.idle_wait(), Duration::from_millis(1));
}

#[test]
fn builder_overrides() {
    let config = Config::new()
        .with_launch_mode(LaunchMode::Task)
        .with_compression(true)
        .with_detailed_logging(true)
        .with_idle_wait(Duration::from_millis(5))
        .with_abort_on_fatal(false);
    assert_eq!(config.launch_mode(), LaunchMode::Task);
    assert!(config.compress_messages());
    assert!(config.detailed_logging());
    assert_eq!(config.idle_wait(), Duration::from_millis(5));
    assert!(!config.abort_on_fatal());
}

#[test]
#[serial]
fn unset_environment_keeps_defaults() {
    clear_env();
    let config = Config::from_env().unwrap();
    assert_eq!(config.launch_mode(), LaunchMode::Auto);
    assert!(config.abort_on_fatal());
}

#[test]
#[serial]
fn environment_flags_are_read() {
    clear_env();
    std::env::set_var(ENV_SPAWN_THREADS, "1");
    std::env::set_var(ENV_COMPRESS, "true");
    std::env::set_var(ENV_API_TRACING, "on");
    std::env::set_var(ENV_ABORT_ON_FATAL, "0");

    let config = Config::from_env().unwrap();
    assert_eq!(config.launch_mode(), LaunchMode::Thread);
    assert!(config.compress_messages());
    assert!(config.detailed_logging());
    assert!(!config.abort_on_fatal());

    std::env::set_var(ENV_SPAWN_THREADS, "0");
    std::env::set_var(ENV_COMPRESS, " 2 ");
    let config = Config::from_env().unwrap();
    assert_eq!(config.launch_mode(), LaunchMode::Task);
    assert!(config.compress_messages());

    clear_env();
}

#[test]
#[serial]
fn garbage_in_environment_is_an_error() {
    clear_env();
    std::env::set_var(ENV_COMPRESS, "maybe");
    match Config::from_env() {
        Err(Error::InvalidEnv { var, value }) => {
            assert_eq!(var, ENV_COMPRESS);
            assert_eq!(value, "maybe");
        }
        other => panic!("expected InvalidEnv, got {:?}", other),
    }
    clear_env();
}
