//! Bit-banged DHT22 / AM2302 driver over a single open-drain line.

use crate::ambient::{ClimateSample, Hygrometer, HygrometerFault};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

const FRAME_LEN: usize = 5;

pub struct Dht22<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> Dht22<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    /// Microseconds the line stays at `level`, or `Timeout` past `max_wait`.
    fn signal_level(&mut self, max_wait: u32, level: bool) -> Result<u32, HygrometerFault> {
        let mut u_sec = 0;
        while self.pin.is_high().map_err(|_| HygrometerFault::Bus)? == level {
            u_sec += 1;
            if u_sec > max_wait {
                return Err(HygrometerFault::Timeout);
            }
            self.delay.delay_us(1);
        }
        Ok(u_sec)
    }

    fn read_frame(&mut self) -> Result<[u8; FRAME_LEN], HygrometerFault> {
        let mut frame = [0u8; FRAME_LEN];

        // Wake the sensor: 3 ms low, then release for 25 µs.
        self.pin.set_low().map_err(|_| HygrometerFault::Bus)?;
        self.delay.delay_us(3_000);
        self.pin.set_high().map_err(|_| HygrometerFault::Bus)?;
        self.delay.delay_us(25);

        // Response: 80 µs low, 80 µs high.
        self.signal_level(85, false)?;
        self.signal_level(85, true)?;

        for bit in 0..FRAME_LEN * 8 {
            self.signal_level(56, false)?;
            // A one holds the line high for ~70 µs, a zero for ~26 µs.
            if self.signal_level(75, true)? > 40 {
                frame[bit / 8] |= 1 << (7 - bit % 8);
            }
        }

        Ok(frame)
    }
}

impl<P, D> Hygrometer for Dht22<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    fn read(&mut self) -> Result<ClimateSample, HygrometerFault> {
        let frame = self.read_frame()?;
        decode_frame(&frame)
    }
}

/// Humidity and temperature are big-endian tenths; the temperature sign lives
/// in the top bit. The last byte is the low byte of the sum of the others.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<ClimateSample, HygrometerFault> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(HygrometerFault::Checksum);
    }

    let humidity_pct = u16::from_be_bytes([frame[0], frame[1]]) as f32 / 10.0;
    let mut temperature_c = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]) as f32 / 10.0;
    if frame[2] & 0x80 != 0 {
        temperature_c = -temperature_c;
    }

    Ok(ClimateSample {
        temperature_c,
        humidity_pct,
    })
}
