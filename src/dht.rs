//! DHT11 temperature/humidity sensor
//!
//! Bit-banged single-wire driver. The data line is an open-drain pin with a
//! pull-up: the host pulls it low for 18 ms to start a conversion, the
//! sensor answers with an 80 µs low/high preamble and then 40 bits, each a
//! ~50 µs low followed by a high phase of ~27 µs (0) or ~70 µs (1).
//!
//! The read is timing sensitive; callers on a board with interrupts should
//! run it inside a critical section.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::publisher::{Reading, SensorSource};

/// Polling budget for one phase of the protocol, in 1 µs steps
const PHASE_TIMEOUT_US: u32 = 100;

/// A high phase longer than this is a 1 bit
const ONE_BIT_THRESHOLD_US: u32 = 40;

/// Sensor read failure, the non-zero status of the sensor driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The sensor did not answer or stopped mid-frame
    Timeout,
    /// Frame received but the checksum does not match
    Checksum,
    /// Pin access failed
    Bus,
}

impl SensorError {
    /// Status string in the style of the DHT libraries
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorError::Timeout => "TIMEOUT",
            SensorError::Checksum => "CHECKSUM",
            SensorError::Bus => "BUS",
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode a raw 5-byte DHT11 frame
pub fn decode_frame(frame: [u8; 5]) -> Result<Reading, SensorError> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(SensorError::Checksum);
    }

    let humidity = frame[0] as f32 + frame[1] as f32 / 10.0;
    let mut temperature = frame[2] as f32 + (frame[3] & 0x7f) as f32 / 10.0;
    if frame[3] & 0x80 != 0 {
        temperature = -temperature;
    }

    Ok(Reading {
        temperature,
        humidity,
    })
}

/// DHT11 on an open-drain data pin
pub struct Dht11<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> Dht11<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(mut pin: P, delay: D) -> Self {
        // Release the line so the sensor can settle
        let _ = pin.set_high();
        Self { pin, delay }
    }

    /// Run one conversion and decode it
    pub fn read(&mut self) -> Result<Reading, SensorError> {
        let frame = self.read_frame()?;
        decode_frame(frame)
    }

    fn read_frame(&mut self) -> Result<[u8; 5], SensorError> {
        // Start signal
        self.pin.set_low().map_err(|_| SensorError::Bus)?;
        self.delay.delay_ms(18);
        self.pin.set_high().map_err(|_| SensorError::Bus)?;

        // Sensor response: line goes low, high, then low for the first bit
        self.wait_for_level(false)?;
        self.wait_for_level(true)?;
        self.wait_for_level(false)?;

        let mut frame = [0u8; 5];
        for bit in 0..40 {
            self.wait_for_level(true)?;
            let high_us = self.wait_for_level(false)?;
            if high_us > ONE_BIT_THRESHOLD_US {
                frame[bit / 8] |= 1 << (7 - bit % 8);
            }
        }

        Ok(frame)
    }

    /// Poll until the line reaches `high`, returns the microseconds waited
    fn wait_for_level(&mut self, high: bool) -> Result<u32, SensorError> {
        for elapsed in 0..PHASE_TIMEOUT_US {
            let level = self.pin.is_high().map_err(|_| SensorError::Bus)?;
            if level == high {
                return Ok(elapsed);
            }
            self.delay.delay_us(1);
        }
        Err(SensorError::Timeout)
    }
}

impl<P, D> SensorSource for Dht11<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    fn read(&mut self) -> Result<Reading, SensorError> {
        Dht11::read(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_frame() {
        // 47.0 %RH, 23.3 °C
        let reading = decode_frame([47, 0, 23, 3, 73]).unwrap();
        assert_eq!(reading.humidity, 47.0);
        assert!((reading.temperature - 23.3).abs() < 0.001);
    }

    #[test]
    fn decodes_negative_temperature() {
        let frame = [30, 0, 2, 0x85, 30u8.wrapping_add(2).wrapping_add(0x85)];
        let reading = decode_frame(frame).unwrap();
        assert!((reading.temperature + 2.5).abs() < 0.001);
    }

    #[test]
    fn rejects_bad_checksum() {
        assert_eq!(decode_frame([47, 0, 23, 3, 74]), Err(SensorError::Checksum));
    }

    #[test]
    fn checksum_wraps() {
        let frame = [200, 0, 100, 0, 200u8.wrapping_add(100)];
        assert!(decode_frame(frame).is_ok());
    }
}
