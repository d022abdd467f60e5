#![allow(missing_docs)]
//! Host-level tests for cancellation and deadlines.

use core::time::Duration;
use pwm_envoy::bus::MemoryBus;
use pwm_envoy::{CancelToken, Config, Duty, Error, Pca9685, PwmMap};
use std::thread;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn controller_with(config: Config) -> Result<(MemoryBus, Pca9685<MemoryBus>), Error> {
    init_logging();
    let bus = MemoryBus::new();
    let pca = Pca9685::new(bus.clone(), config)?;
    bus.clear_journal();
    Ok((bus, pca))
}

fn cancelled() -> CancelToken {
    let token = CancelToken::new();
    token.cancel();
    token
}

#[test]
fn cancelled_token_blocks_single_write() -> TestResult {
    let (bus, pca) = controller_with(Config::default())?;
    pca.set_pwm(0, 0, 100, &CancelToken::new())?;
    bus.clear_journal();

    assert_eq!(pca.set_pwm(0, 0, 200, &cancelled()), Err(Error::Cancelled));
    assert_eq!(pca.channel_state(0)?.off, 100);
    assert_eq!(bus.write_count(), 0);
    Ok(())
}

#[test]
fn cancelled_token_blocks_broadcast() -> TestResult {
    let (bus, pca) = controller_with(Config::default())?;

    assert_eq!(pca.set_all_pwm(0, 2048, &cancelled()), Err(Error::Cancelled));
    assert!(pca.dump_state().channels.iter().all(|channel| channel.off == 0));
    assert_eq!(bus.write_count(), 0);
    Ok(())
}

#[test]
fn cancelled_token_blocks_whole_batch() -> TestResult {
    let (bus, pca) = controller_with(Config::default())?;
    let batch: PwmMap = [(0, Duty::from_off(1000)), (1, Duty::from_off(2000))]
        .into_iter()
        .collect();

    assert_eq!(pca.set_multi_pwm(&batch, &cancelled()), Err(Error::Cancelled));
    assert_eq!(pca.channel_state(0)?.off, 0);
    assert_eq!(pca.channel_state(1)?.off, 0);
    assert_eq!(bus.write_count(), 0);
    Ok(())
}

#[test]
fn elapsed_deadline_is_reported_as_such() -> TestResult {
    let (bus, pca) = controller_with(Config::default())?;
    let expired = CancelToken::with_timeout(Duration::ZERO);

    assert_eq!(pca.set_pwm(2, 0, 100, &expired), Err(Error::DeadlineExceeded));
    assert!(Error::DeadlineExceeded.is_cancellation());
    assert_eq!(bus.write_count(), 0);
    Ok(())
}

#[test]
fn validation_wins_over_cancellation() -> TestResult {
    let (_bus, pca) = controller_with(Config::default())?;
    assert_eq!(
        pca.set_pwm(16, 0, 100, &cancelled()),
        Err(Error::InvalidChannel { channel: 16 })
    );
    Ok(())
}

#[test]
fn fade_stops_when_cancelled() -> TestResult {
    let (bus, pca) = controller_with(Config::default())?;
    let cancel = CancelToken::new();

    let result = thread::scope(|scope| {
        let fade = scope.spawn(|| pca.fade(0, 0, 4000, Duration::from_millis(1000), &cancel));
        thread::sleep(Duration::from_millis(200));
        cancel.cancel();
        fade.join()
    });

    assert_eq!(result.map_err(|_| "fade thread panicked")?, Err(Error::Cancelled));
    let writes = bus.write_count();
    assert!((1..21).contains(&writes), "{writes} steps written");
    assert!(pca.channel_state(0)?.off < 4000);
    Ok(())
}

#[test]
fn fade_stops_at_deadline() -> TestResult {
    let (bus, pca) = controller_with(Config::default())?;
    let deadline = CancelToken::with_timeout(Duration::from_millis(100));

    assert_eq!(
        pca.fade(1, 4095, 0, Duration::from_millis(1000), &deadline),
        Err(Error::DeadlineExceeded)
    );
    assert!(bus.write_count() < 21);
    Ok(())
}

#[test]
fn cancelled_config_token_fails_construction() {
    init_logging();
    let config = Config::default();
    config.cancel.cancel();

    let result = Pca9685::new(MemoryBus::new(), config);
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn config_token_governs_controller_operations() -> TestResult {
    let config = Config::default();
    let parent = config.cancel.clone();
    let (bus, pca) = controller_with(config)?;
    parent.cancel();

    assert!(pca.cancel_token().is_cancelled());
    assert_eq!(pca.set_frequency(50.0), Err(Error::Cancelled));
    assert!((pca.frequency() - 1000.0).abs() < f64::EPSILON);

    assert_eq!(pca.disable(&[0]), Err(Error::Cancelled));
    assert!(!pca.channel_state(0)?.enabled, "disabled even though silencing was cancelled");
    assert_eq!(bus.write_count(), 0);
    Ok(())
}

#[test]
fn explicit_tokens_are_independent_of_controller_token() -> TestResult {
    let config = Config::default();
    let parent = config.cancel.clone();
    let (_bus, pca) = controller_with(config)?;
    parent.cancel();

    pca.set_pwm(4, 0, 1234, &CancelToken::new())?;
    assert_eq!(pca.channel_state(4)?.off, 1234);
    Ok(())
}
