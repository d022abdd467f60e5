#![cfg(feature = "host")]

use core::time::Duration;
use pwm_envoy::{
    CancelToken, Config, Pca9685, Result,
    bus::MemoryBus,
    rgb_led::{RGB8, RgbLed},
};
use std::thread;

fn main() {
    if let Err(err) = inner_main() {
        panic!("{err}");
    }
}

fn inner_main() -> Result<()> {
    let bus = MemoryBus::new();
    let pca = Pca9685::new(bus.clone(), Config::default())?;
    let led = RgbLed::new(&pca, 0, 1, 2)?;
    let cancel = CancelToken::with_timeout(Duration::from_secs(5));

    let colors = [
        RGB8::new(255, 0, 0),
        RGB8::new(255, 128, 0),
        RGB8::new(0, 255, 0),
        RGB8::new(0, 0, 255),
        RGB8::new(128, 0, 255),
    ];

    // Full brightness first, then the same cycle dimmed.
    for brightness in [1.0, 0.25] {
        led.set_brightness(brightness)?;
        for color in colors {
            led.set_rgb8(color, &cancel)?;
            println!(
                "{:>3},{:>3},{:>3} @ {brightness}: {:?} {:?} {:?}",
                color.r,
                color.g,
                color.b,
                bus.channel(0),
                bus.channel(1),
                bus.channel(2)
            );
            thread::sleep(Duration::from_millis(200));
        }
    }

    led.off(&cancel)?;
    print!("{}", pca.dump_state());
    drop(led);
    pca.close()
}
