#![allow(missing_docs)]
//! Host-level tests for the RGB LED device abstraction.

use pwm_envoy::bus::MemoryBus;
use pwm_envoy::rgb_led::RGB8;
use pwm_envoy::{Calibration, CancelToken, Config, DutyRange, Error, Pca9685, RgbLed};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn controller() -> Result<(MemoryBus, Pca9685<MemoryBus>), Error> {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = MemoryBus::new();
    let pca = Pca9685::new(bus.clone(), Config::default())?;
    bus.clear_journal();
    Ok((bus, pca))
}

fn offs(pca: &Pca9685<MemoryBus>, channels: [u8; 3]) -> Result<[u16; 3], Error> {
    let [red, green, blue] = channels;
    Ok([
        pca.channel_state(red)?.off,
        pca.channel_state(green)?.off,
        pca.channel_state(blue)?.off,
    ])
}

#[test]
fn color_scales_to_full_duty_range() -> TestResult {
    let (bus, pca) = controller()?;
    let led = RgbLed::new(&pca, 0, 1, 2)?;

    led.set_color(255, 0, 128, &CancelToken::new())?;

    assert_eq!(offs(&pca, led.channels())?, [4095, 0, 2056]);
    assert_eq!(bus.channel(0), (0, 4095));
    assert_eq!(bus.channel(2), (0, 2056));
    assert_eq!(bus.write_count(), 3);
    Ok(())
}

#[test]
fn brightness_applies_to_next_color_only() -> TestResult {
    let (_bus, pca) = controller()?;
    let led = RgbLed::new(&pca, 3, 4, 5)?;
    let cancel = CancelToken::new();

    led.set_color(255, 255, 255, &cancel)?;
    led.set_brightness(0.5)?;
    assert_eq!(offs(&pca, led.channels())?, [4095, 4095, 4095]);

    led.set_color(255, 255, 255, &cancel)?;
    assert_eq!(offs(&pca, led.channels())?, [2048, 2048, 2048]);
    assert!((led.brightness() - 0.5).abs() < f64::EPSILON);
    Ok(())
}

#[test]
fn brightness_outside_unit_range_is_rejected() -> TestResult {
    let (_bus, pca) = controller()?;
    let led = RgbLed::new(&pca, 0, 1, 2)?;

    assert!(matches!(
        led.set_brightness(1.5),
        Err(Error::BrightnessOutOfRange { .. })
    ));
    assert!(matches!(
        led.set_brightness(-0.1),
        Err(Error::BrightnessOutOfRange { .. })
    ));
    assert!(led.set_brightness(f64::NAN).is_err());
    assert!((led.brightness() - 1.0).abs() < f64::EPSILON);
    Ok(())
}

#[test]
fn calibration_offsets_each_color() -> TestResult {
    let (_bus, pca) = controller()?;
    let led = RgbLed::new(&pca, 0, 1, 2)?;
    let calibration = Calibration {
        red: DutyRange { min: 1000, max: 3000 },
        green: DutyRange { min: 0, max: 2000 },
        blue: DutyRange::default(),
    };
    led.set_calibration(calibration);
    assert_eq!(led.calibration(), calibration);

    led.set_color(51, 255, 0, &CancelToken::new())?;
    assert_eq!(offs(&pca, led.channels())?, [1400, 2000, 0]);
    Ok(())
}

#[test]
fn invalid_channel_fails_construction() -> TestResult {
    let (bus, pca) = controller()?;
    assert!(matches!(
        RgbLed::new(&pca, 0, 1, 16),
        Err(Error::InvalidChannel { channel: 16 })
    ));
    assert_eq!(bus.write_count(), 0);
    Ok(())
}

#[test]
fn construction_re_enables_channels() -> TestResult {
    let (_bus, pca) = controller()?;
    pca.disable(&[6])?;
    let led = RgbLed::new(&pca, 6, 7, 8)?;

    led.on(&CancelToken::new())?;
    assert_eq!(offs(&pca, led.channels())?, [4095, 4095, 4095]);
    Ok(())
}

#[test]
fn off_darkens_every_channel() -> TestResult {
    let (bus, pca) = controller()?;
    let led = RgbLed::new(&pca, 9, 10, 11)?;
    let cancel = CancelToken::new();

    led.on(&cancel)?;
    led.off(&cancel)?;
    assert_eq!(offs(&pca, led.channels())?, [0, 0, 0]);
    assert_eq!(bus.channel(10), (0, 0));
    Ok(())
}

#[test]
fn rgb8_matches_separate_levels() -> TestResult {
    let (_bus, pca) = controller()?;
    let led = RgbLed::new(&pca, 0, 1, 2)?;

    led.set_rgb8(RGB8::new(0, 128, 255), &CancelToken::new())?;
    assert_eq!(offs(&pca, led.channels())?, [0, 2056, 4095]);
    Ok(())
}

#[test]
fn cancelled_color_change_leaves_led_as_it_was() -> TestResult {
    let (_bus, pca) = controller()?;
    let led = RgbLed::new(&pca, 0, 1, 2)?;
    led.set_color(10, 20, 30, &CancelToken::new())?;
    let before = offs(&pca, led.channels())?;

    let cancel = CancelToken::new();
    cancel.cancel();
    assert_eq!(led.set_color(255, 255, 255, &cancel), Err(Error::Cancelled));
    assert_eq!(offs(&pca, led.channels())?, before);
    Ok(())
}
