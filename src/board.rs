//! Board lines around the target that the reset sequence drives or watches.
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, ErrorKind, InputPin, OutputPin, PinState};

pub trait BoardControl {
    /// The target's supplies are up.
    fn power_good(&mut self) -> Result<bool, ErrorKind>;
    fn set_mcu_reset(&mut self, asserted: bool) -> Result<(), ErrorKind>;
    fn set_spi_reset(&mut self, asserted: bool) -> Result<(), ErrorKind>;
    /// The host has released the target from reset (active low PERST is
    /// high). A transition to released is the external reset signal.
    fn reset_released(&mut self) -> Result<bool, ErrorKind>;
}

impl<B: BoardControl + ?Sized> BoardControl for &mut B {
    fn power_good(&mut self) -> Result<bool, ErrorKind> {
        B::power_good(self)
    }

    fn set_mcu_reset(&mut self, asserted: bool) -> Result<(), ErrorKind> {
        B::set_mcu_reset(self, asserted)
    }

    fn set_spi_reset(&mut self, asserted: bool) -> Result<(), ErrorKind> {
        B::set_spi_reset(self, asserted)
    }

    fn reset_released(&mut self) -> Result<bool, ErrorKind> {
        B::reset_released(self)
    }
}

/// Board lines on `embedded-hal` pins. Reset outputs are active high.
pub struct GpioBoard<Pg, Mcu, Spi, Perst> {
    pgood: Pg,
    reset_mcu: Mcu,
    reset_spi: Spi,
    perst: Perst,
}

impl<Pg, Mcu, Spi, Perst> GpioBoard<Pg, Mcu, Spi, Perst>
where
    Pg: InputPin,
    Mcu: OutputPin,
    Spi: OutputPin,
    Perst: InputPin,
{
    pub fn new(pgood: Pg, reset_mcu: Mcu, reset_spi: Spi, perst: Perst) -> Self {
        Self {
            pgood,
            reset_mcu,
            reset_spi,
            perst,
        }
    }
}

impl<Pg, Mcu, Spi, Perst> BoardControl for GpioBoard<Pg, Mcu, Spi, Perst>
where
    Pg: InputPin,
    Mcu: OutputPin,
    Spi: OutputPin,
    Perst: InputPin,
{
    fn power_good(&mut self) -> Result<bool, ErrorKind> {
        self.pgood.is_high().map_err(|e| e.kind())
    }

    fn set_mcu_reset(&mut self, asserted: bool) -> Result<(), ErrorKind> {
        self.reset_mcu.set_state(PinState::from(asserted)).map_err(|e| e.kind())
    }

    fn set_spi_reset(&mut self, asserted: bool) -> Result<(), ErrorKind> {
        self.reset_spi.set_state(PinState::from(asserted)).map_err(|e| e.kind())
    }

    fn reset_released(&mut self) -> Result<bool, ErrorKind> {
        self.perst.is_high().map_err(|e| e.kind())
    }
}

/// Board stand-in for emulated runs.
#[derive(Clone, Debug)]
pub struct SimBoard {
    pub power_good: bool,
    pub reset_released: bool,
    pub mcu_reset: bool,
    pub spi_reset: bool,
    /// Number of times either reset line was asserted.
    pub reset_pulses: usize,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self {
            power_good: true,
            reset_released: false,
            mcu_reset: false,
            spi_reset: false,
            reset_pulses: 0,
        }
    }
}

impl BoardControl for SimBoard {
    fn power_good(&mut self) -> Result<bool, ErrorKind> {
        Ok(self.power_good)
    }

    fn set_mcu_reset(&mut self, asserted: bool) -> Result<(), ErrorKind> {
        if asserted && !self.mcu_reset {
            self.reset_pulses += 1;
        }
        self.mcu_reset = asserted;
        Ok(())
    }

    fn set_spi_reset(&mut self, asserted: bool) -> Result<(), ErrorKind> {
        if asserted && !self.spi_reset {
            self.reset_pulses += 1;
        }
        self.spi_reset = asserted;
        Ok(())
    }

    fn reset_released(&mut self) -> Result<bool, ErrorKind> {
        Ok(self.reset_released)
    }
}

/// Busy-wait delay. The sequence never yields while it owns the lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpinDelay;

impl DelayNs for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        let end = Instant::now() + Duration::from_nanos(ns.into());
        while Instant::now() < end {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_board_counts_reset_assertions() {
        let mut board = SimBoard::default();
        board.set_mcu_reset(true).unwrap();
        board.set_mcu_reset(true).unwrap();
        board.set_spi_reset(true).unwrap();
        board.set_mcu_reset(false).unwrap();
        board.set_spi_reset(false).unwrap();
        assert_eq!(board.reset_pulses, 2);
        assert!(!board.mcu_reset && !board.spi_reset);
    }

    #[test]
    fn spin_delay_waits() {
        let start = Instant::now();
        SpinDelay.delay_us(500);
        assert!(start.elapsed() >= Duration::from_micros(500));
    }
}
