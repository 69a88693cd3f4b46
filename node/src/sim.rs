//! Emulated hardware for running the node on a development host.
//!
//! [`SimulatedBay`] stands in for an ultrasonic sensor facing a parking bay. Its
//! pins and delay share one virtual microsecond clock, so the ranging driver
//! measures exactly the pulse the bay decided to echo without real waiting.

use crate::ambient::{ClimateSample, Hygrometer, HygrometerFault};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

/// Time between the trigger falling edge and the echo rising, as on an HC-SR04.
const ECHO_LATENCY_US: u64 = 450;

type PulseSource = Box<dyn FnMut() -> Option<u32>>;

struct BayState {
    clock_ns: Cell<u64>,
    trigger_high_since: Cell<Option<u64>>,
    last_trigger_width_us: Cell<Option<u64>>,
    echo_window_us: Cell<Option<(u64, u64)>>,
    source: RefCell<PulseSource>,
}

impl BayState {
    fn now_us(&self) -> u64 {
        self.clock_ns.get() / 1_000
    }
}

#[derive(Clone)]
pub struct SimulatedBay {
    state: Rc<BayState>,
}

impl SimulatedBay {
    /// A bay whose echo pulse is produced by `source` on every trigger.
    /// `None` means no echo.
    pub fn new(source: impl FnMut() -> Option<u32> + 'static) -> Self {
        Self {
            state: Rc::new(BayState {
                clock_ns: Cell::new(0),
                trigger_high_since: Cell::new(None),
                last_trigger_width_us: Cell::new(None),
                echo_window_us: Cell::new(None),
                source: RefCell::new(Box::new(source)),
            }),
        }
    }

    /// Always echoes the same pulse width.
    pub fn fixed(pulse_width_us: Option<u32>) -> Self {
        Self::new(move || pulse_width_us)
    }

    /// Cars arrive and leave at random; parked cars sit a few centimetres
    /// from the sensor, an empty bay echoes off the floor.
    pub fn wandering(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut occupied = false;
        Self::new(move || {
            if rng.gen_bool(0.02) {
                occupied = !occupied;
            }
            if rng.gen_bool(0.03) {
                return None; // lost echo
            }
            let distance_cm: f32 = if occupied {
                rng.gen_range(5.0..18.0)
            } else {
                rng.gen_range(120.0..250.0)
            };
            Some((distance_cm * 2.0 / crate::ranging::SPEED_OF_SOUND_CM_PER_US) as u32)
        })
    }

    pub fn trigger_pin(&self) -> TriggerPin {
        TriggerPin {
            state: self.state.clone(),
        }
    }

    pub fn echo_pin(&self) -> EchoPin {
        EchoPin {
            state: self.state.clone(),
        }
    }

    pub fn delay(&self) -> BayDelay {
        BayDelay {
            state: self.state.clone(),
        }
    }

    pub fn last_trigger_width_us(&self) -> Option<u64> {
        self.state.last_trigger_width_us.get()
    }
}

pub struct TriggerPin {
    state: Rc<BayState>,
}

impl ErrorType for TriggerPin {
    type Error = Infallible;
}

impl OutputPin for TriggerPin {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        if self.state.trigger_high_since.get().is_none() {
            self.state.trigger_high_since.set(Some(self.state.now_us()));
        }
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        let Some(since) = self.state.trigger_high_since.take() else {
            return Ok(());
        };
        let now = self.state.now_us();
        let width = now - since;
        self.state.last_trigger_width_us.set(Some(width));

        // The sensor ignores triggers while its echo line is still high.
        if matches!(self.state.echo_window_us.get(), Some((start, end)) if now >= start && now < end) {
            return Ok(());
        }

        // It only bursts on a trigger of at least 10 µs.
        let window = if width >= 10 {
            let pulse = (&mut *self.state.source.borrow_mut())();
            pulse.map(|p| {
                let start = now + ECHO_LATENCY_US;
                (start, start + p as u64)
            })
        } else {
            None
        };
        self.state.echo_window_us.set(window);
        Ok(())
    }
}

pub struct EchoPin {
    state: Rc<BayState>,
}

impl ErrorType for EchoPin {
    type Error = Infallible;
}

impl InputPin for EchoPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let now = self.state.now_us();
        Ok(matches!(self.state.echo_window_us.get(), Some((start, end)) if now >= start && now < end))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

pub struct BayDelay {
    state: Rc<BayState>,
}

impl DelayNs for BayDelay {
    fn delay_ns(&mut self, ns: u32) {
        let clock = &self.state.clock_ns;
        clock.set(clock.get() + ns as u64);
    }
}

/// Hygrometer emulation with the occasional failed read.
pub struct SimulatedHygrometer {
    rng: StdRng,
    fault_rate: f64,
}

impl SimulatedHygrometer {
    pub fn new(seed: u64, fault_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fault_rate,
        }
    }
}

impl Hygrometer for SimulatedHygrometer {
    fn read(&mut self) -> Result<ClimateSample, HygrometerFault> {
        if self.rng.gen_bool(self.fault_rate) {
            return Err(HygrometerFault::Timeout);
        }
        Ok(ClimateSample {
            temperature_c: self.rng.gen_range(15.0..30.0),
            humidity_pct: self.rng.gen_range(30.0..80.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_trigger_produces_no_echo() {
        let bay = SimulatedBay::fixed(Some(500));
        let mut trigger = bay.trigger_pin();
        let mut echo = bay.echo_pin();
        let mut delay = bay.delay();

        trigger.set_high().unwrap();
        delay.delay_us(3);
        trigger.set_low().unwrap();

        for _ in 0..2_000 {
            assert!(!echo.is_high().unwrap());
            delay.delay_us(1);
        }
    }

    #[test]
    fn test_echo_window_follows_trigger() {
        let bay = SimulatedBay::fixed(Some(100));
        let mut trigger = bay.trigger_pin();
        let mut echo = bay.echo_pin();
        let mut delay = bay.delay();

        trigger.set_high().unwrap();
        delay.delay_us(10);
        trigger.set_low().unwrap();

        delay.delay_us(ECHO_LATENCY_US as u32 - 1);
        assert!(echo.is_low().unwrap());
        delay.delay_us(1);
        assert!(echo.is_high().unwrap());
        delay.delay_us(99);
        assert!(echo.is_high().unwrap());
        delay.delay_us(1);
        assert!(echo.is_low().unwrap());
    }

    #[test]
    fn test_hygrometer_always_faulty() {
        let mut hygrometer = SimulatedHygrometer::new(7, 1.0);
        assert!(hygrometer.read().is_err());
    }

    #[test]
    fn test_hygrometer_ranges() {
        let mut hygrometer = SimulatedHygrometer::new(7, 0.0);
        for _ in 0..50 {
            let sample = hygrometer.read().unwrap();
            assert!((15.0..30.0).contains(&sample.temperature_c));
            assert!((30.0..80.0).contains(&sample.humidity_pct));
        }
    }
}
