//! Rotary encoder input
//!
//! Decodes the two KY-040 style encoders on the table edge. One detent is
//! reported on each falling edge of CLK, the direction comes from the DT
//! level at that moment. The push switch is active low; a press is reported
//! once on its falling edge.

use embedded_hal::digital::InputPin;

/// Discrete event produced by one poll of an input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotaryMove {
    None,
    Clockwise,
    CounterClockwise,
    Pressed,
}

/// Local input device polled once per node loop pass
pub trait InputDevice {
    fn poll(&mut self) -> RotaryMove;
}

/// Rotary encoder with push switch
pub struct RotaryEncoder<CLK, DT, SW> {
    clk: CLK,
    dt: DT,
    sw: SW,
    last_clk: bool,
    last_sw: bool,
}

impl<CLK, DT, SW> RotaryEncoder<CLK, DT, SW>
where
    CLK: InputPin,
    DT: InputPin,
    SW: InputPin,
{
    pub fn new(mut clk: CLK, dt: DT, mut sw: SW) -> Self {
        // Idle levels are high with the pull-ups; a failed read assumes idle
        let last_clk = clk.is_high().unwrap_or(true);
        let last_sw = sw.is_high().unwrap_or(true);
        Self {
            clk,
            dt,
            sw,
            last_clk,
            last_sw,
        }
    }

    /// Sample the pins and report at most one event
    pub fn check_rotary(&mut self) -> RotaryMove {
        let Ok(clk) = self.clk.is_high() else {
            return RotaryMove::None;
        };
        let Ok(sw) = self.sw.is_high() else {
            return RotaryMove::None;
        };

        let clk_fell = self.last_clk && !clk;
        let sw_fell = self.last_sw && !sw;
        self.last_clk = clk;
        self.last_sw = sw;

        if clk_fell {
            return match self.dt.is_high() {
                Ok(true) => RotaryMove::Clockwise,
                Ok(false) => RotaryMove::CounterClockwise,
                Err(_) => RotaryMove::None,
            };
        }

        if sw_fell {
            return RotaryMove::Pressed;
        }

        RotaryMove::None
    }
}

impl<CLK, DT, SW> InputDevice for RotaryEncoder<CLK, DT, SW>
where
    CLK: InputPin,
    DT: InputPin,
    SW: InputPin,
{
    fn poll(&mut self) -> RotaryMove {
        self.check_rotary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct FakePin(Rc<Cell<bool>>);

    impl FakePin {
        fn high() -> Self {
            FakePin(Rc::new(Cell::new(true)))
        }

        fn set(&self, level: bool) {
            self.0.set(level);
        }
    }

    impl embedded_hal::digital::ErrorType for FakePin {
        type Error = Infallible;
    }

    impl InputPin for FakePin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0.get())
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0.get())
        }
    }

    fn encoder() -> (RotaryEncoder<FakePin, FakePin, FakePin>, FakePin, FakePin, FakePin) {
        let (clk, dt, sw) = (FakePin::high(), FakePin::high(), FakePin::high());
        let encoder = RotaryEncoder::new(clk.clone(), dt.clone(), sw.clone());
        (encoder, clk, dt, sw)
    }

    #[test]
    fn idle_pins_report_nothing() {
        let (mut encoder, ..) = encoder();
        assert_eq!(encoder.check_rotary(), RotaryMove::None);
        assert_eq!(encoder.check_rotary(), RotaryMove::None);
    }

    #[test]
    fn clk_falling_edge_decodes_direction() {
        let (mut encoder, clk, dt, _) = encoder();

        // DT still high when CLK falls: clockwise
        clk.set(false);
        assert_eq!(encoder.check_rotary(), RotaryMove::Clockwise);
        assert_eq!(encoder.check_rotary(), RotaryMove::None);
        clk.set(true);
        assert_eq!(encoder.check_rotary(), RotaryMove::None);

        // DT already low when CLK falls: counter-clockwise
        dt.set(false);
        clk.set(false);
        assert_eq!(encoder.check_rotary(), RotaryMove::CounterClockwise);
    }

    #[test]
    fn switch_press_is_reported_once() {
        let (mut encoder, _, _, sw) = encoder();
        sw.set(false);
        assert_eq!(encoder.poll(), RotaryMove::Pressed);
        assert_eq!(encoder.poll(), RotaryMove::None);
        sw.set(true);
        assert_eq!(encoder.poll(), RotaryMove::None);
    }
}
