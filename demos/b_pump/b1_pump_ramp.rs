#![cfg(feature = "host")]

use core::time::Duration;
use pwm_envoy::{CancelToken, Config, Pca9685, Pump, Result, bus::MemoryBus};
use std::thread;

fn main() {
    if let Err(err) = inner_main() {
        panic!("{err}");
    }
}

fn inner_main() -> Result<()> {
    let pca = Pca9685::new(MemoryBus::new(), Config::default())?;
    // Below ~25 % duty this pump stalls, and above ~85 % it only gets louder.
    let pump = Pump::with_speed_limits(&pca, 4, 1000, 3500)?;
    let cancel = CancelToken::new();

    // Ramp up in 10 % steps, then back down.
    for percent in (0..=10).chain((0..10).rev()) {
        let speed = f64::from(percent) * 10.0;
        pump.set_speed(speed, &cancel)?;
        println!(
            "speed {speed:>5} % -> off {:>4} (reads back {} %)",
            pca.channel_state(pump.channel())?.off,
            pump.current_speed()?
        );
        thread::sleep(Duration::from_millis(100));
    }

    // A fade bypasses the speed limits and drives the channel directly.
    pca.fade(pump.channel(), 3500, 1000, Duration::from_millis(500), &cancel)?;
    pump.stop(&cancel)?;
    drop(pump);
    pca.close()
}
