use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Speed of sound in cm/µs at roughly 20°C.
pub const SPEED_OF_SOUND_CM_PER_US: f32 = 0.0343;

/// Echo wait for a ~4 m maximum range.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_micros(23_324);

const SETTLE_US: u32 = 2;
const TRIGGER_PULSE_US: u32 = 10;

/// One successful trigger-and-measure sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangingSample {
    pub pulse_width_us: u32,
    pub distance_cm: f32,
}

impl RangingSample {
    /// The distance is kept at the 0.01 cm resolution it is reported with, so
    /// the classification always agrees with the uploaded number.
    pub fn from_pulse(pulse_width_us: u32) -> Self {
        Self {
            pulse_width_us,
            distance_cm: (distance_cm(pulse_width_us) * 100.0).round() / 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangingOutcome {
    Distance(RangingSample),
    /// The echo line never rose, or stayed high past the timeout.
    Timeout,
}

impl RangingOutcome {
    pub fn distance_cm(&self) -> Option<f32> {
        match self {
            RangingOutcome::Distance(sample) => Some(sample.distance_cm),
            RangingOutcome::Timeout => None,
        }
    }
}

/// Round-trip pulse width to one-way distance.
pub fn distance_cm(pulse_width_us: u32) -> f32 {
    pulse_width_us as f32 * SPEED_OF_SOUND_CM_PER_US / 2.0
}

/// Anything that can produce a distance reading on demand.
pub trait RangeFinder {
    fn measure(&mut self) -> RangingOutcome;
}

/// HC-SR04 style trigger/echo driver.
///
/// The echo pulse is timed by polling the echo line once per microsecond of
/// `delay`, so the resolution is bounded by the delay implementation.
pub struct RangingDriver<T, E, D> {
    trigger: T,
    echo: E,
    delay: D,
    timeout_us: u32,
}

impl<T, E, D> RangingDriver<T, E, D>
where
    T: OutputPin,
    E: InputPin,
    D: DelayNs,
{
    pub fn new(trigger: T, echo: E, delay: D, timeout: Duration) -> Self {
        Self {
            trigger,
            echo,
            delay,
            timeout_us: u32::try_from(timeout.as_micros()).unwrap_or(u32::MAX),
        }
    }

    fn fire(&mut self) -> Result<(), T::Error> {
        self.trigger.set_low()?;
        self.delay.delay_us(SETTLE_US);
        self.trigger.set_high()?;
        self.delay.delay_us(TRIGGER_PULSE_US);
        self.trigger.set_low()
    }

    /// Count microseconds while the echo line stays at `level`.
    /// Returns `None` once `max_wait` is exceeded.
    fn wait_while(&mut self, level: bool, max_wait: u32) -> Result<Option<u32>, E::Error> {
        let mut u_sec: u32 = 0;
        while self.echo.is_high()? == level {
            u_sec += 1;
            if u_sec > max_wait {
                return Ok(None);
            }
            self.delay.delay_us(1);
        }
        Ok(Some(u_sec))
    }

    fn echo_width(&mut self) -> Result<Option<u32>, E::Error> {
        if self.wait_while(false, self.timeout_us)?.is_none() {
            return Ok(None);
        }
        self.wait_while(true, self.timeout_us)
    }
}

impl<T, E, D> RangeFinder for RangingDriver<T, E, D>
where
    T: OutputPin,
    E: InputPin,
    D: DelayNs,
{
    fn measure(&mut self) -> RangingOutcome {
        // A late echo from the previous burst must end before triggering.
        match self.wait_while(true, self.timeout_us) {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Echo line stuck high");
                return RangingOutcome::Timeout;
            }
            Err(e) => {
                error!("Echo pin fault: {:?}", e);
                return RangingOutcome::Timeout;
            }
        }

        if let Err(e) = self.fire() {
            error!("Trigger pin fault: {:?}", e);
            return RangingOutcome::Timeout;
        }

        match self.echo_width() {
            Ok(Some(pulse_width_us)) => {
                debug!("Echo pulse {} us", pulse_width_us);
                RangingOutcome::Distance(RangingSample::from_pulse(pulse_width_us))
            }
            Ok(None) => RangingOutcome::Timeout,
            Err(e) => {
                error!("Echo pin fault: {:?}", e);
                RangingOutcome::Timeout
            }
        }
    }
}
