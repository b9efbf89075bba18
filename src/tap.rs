//! TAP controller state machine and the shift registers behind it.

/// One of the 16 states of the Test Access Port controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, docsplay::Display)]
pub enum TapState {
    /// Test-Logic-Reset
    Reset,
    /// Run-Test/Idle
    Idle,
    /// Select-DR-Scan
    ScanDr,
    /// Select-IR-Scan
    ScanIr,
    /// Capture-DR
    CaptureDr,
    /// Capture-IR
    CaptureIr,
    /// Shift-DR
    ShiftDr,
    /// Shift-IR
    ShiftIr,
    /// Exit1-DR
    Exit1Dr,
    /// Exit1-IR
    Exit1Ir,
    /// Pause-DR
    PauseDr,
    /// Pause-IR
    PauseIr,
    /// Exit2-DR
    Exit2Dr,
    /// Exit2-IR
    Exit2Ir,
    /// Update-DR
    UpdateDr,
    /// Update-IR
    UpdateIr,
}

impl TapState {
    pub const ALL: [TapState; 16] = [
        TapState::Reset,
        TapState::Idle,
        TapState::ScanDr,
        TapState::ScanIr,
        TapState::CaptureDr,
        TapState::CaptureIr,
        TapState::ShiftDr,
        TapState::ShiftIr,
        TapState::Exit1Dr,
        TapState::Exit1Ir,
        TapState::PauseDr,
        TapState::PauseIr,
        TapState::Exit2Dr,
        TapState::Exit2Ir,
        TapState::UpdateDr,
        TapState::UpdateIr,
    ];

    /// Next state for one clock with the given TMS level.
    ///
    /// Note that both Update states return to Select-DR-Scan when TMS is high.
    pub fn next(self, tms: bool) -> TapState {
        use TapState::*;

        match (self, tms) {
            (Reset, false) => Idle,
            (Reset, true) => Reset,
            (Idle, false) => Idle,
            (Idle, true) => ScanDr,

            (ScanDr, false) => CaptureDr,
            (ScanDr, true) => ScanIr,
            (ScanIr, false) => CaptureIr,
            (ScanIr, true) => Reset,

            (CaptureDr, false) => ShiftDr,
            (CaptureDr, true) => Exit1Dr,
            (CaptureIr, false) => ShiftIr,
            (CaptureIr, true) => Exit1Ir,

            (ShiftDr, false) => ShiftDr,
            (ShiftDr, true) => Exit1Dr,
            (ShiftIr, false) => ShiftIr,
            (ShiftIr, true) => Exit1Ir,

            (Exit1Dr, false) => PauseDr,
            (Exit1Dr, true) => UpdateDr,
            (Exit1Ir, false) => PauseIr,
            (Exit1Ir, true) => UpdateIr,

            (PauseDr, false) => PauseDr,
            (PauseDr, true) => Exit2Dr,
            (PauseIr, false) => PauseIr,
            (PauseIr, true) => Exit2Ir,

            (Exit2Dr, false) => ShiftDr,
            (Exit2Dr, true) => UpdateDr,
            (Exit2Ir, false) => ShiftIr,
            (Exit2Ir, true) => UpdateIr,

            (UpdateDr, false) => Idle,
            (UpdateDr, true) => ScanDr,
            (UpdateIr, false) => Idle,
            (UpdateIr, true) => ScanDr,
        }
    }

    /// Apply a sequence of TMS levels, returning the final state.
    pub fn walk(self, tms: &[bool]) -> TapState {
        tms.iter().fold(self, |state, &tms| state.next(tms))
    }
}

/// Which logical register the Shift/Capture/Update states operate on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Register {
    #[default]
    Bypass,
    Instruction,
    Data,
}

pub const REG_BITS: u32 = 32;

/// A single shift register and the value latched from it on Update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShiftRegister {
    shift: u32,
    bits: u32,
    hold: u32,
}

impl ShiftRegister {
    /// Capture-*: start a new shift.
    pub fn capture(&mut self) {
        self.bits = 0;
    }

    /// Shift-*: append `bit` as the new least significant bit.
    pub fn shift_in(&mut self, bit: bool) {
        self.shift = (self.shift << 1) | bit as u32;
        self.bits = self.bits.saturating_add(1);
    }

    /// Update-*: latch the shifted bits into the hold register.
    ///
    /// Bits arrive LSB-first, so the accumulator is bit-reversed and the
    /// unused high positions are dropped.
    pub fn update(&mut self) -> u32 {
        self.bits = self.bits.clamp(1, REG_BITS);
        self.hold = self.shift.reverse_bits() >> (REG_BITS - self.bits);
        self.hold
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn hold(&self) -> u32 {
        self.hold
    }
}

/// Bypass, instruction and data shift registers of one TAP.
#[derive(Clone, Debug, Default)]
pub struct ShiftRegisterSet {
    bypass: ShiftRegister,
    instruction: ShiftRegister,
    data: ShiftRegister,
}

impl ShiftRegisterSet {
    pub fn get(&self, reg: Register) -> &ShiftRegister {
        match reg {
            Register::Bypass => &self.bypass,
            Register::Instruction => &self.instruction,
            Register::Data => &self.data,
        }
    }

    pub fn get_mut(&mut self, reg: Register) -> &mut ShiftRegister {
        match reg {
            Register::Bypass => &mut self.bypass,
            Register::Instruction => &mut self.instruction,
            Register::Data => &mut self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TapState::*;
    use super::*;

    #[test]
    fn five_tms_high_reaches_reset_from_anywhere() {
        for state in TapState::ALL {
            let reset = state.walk(&[true; 5]);
            assert_eq!(reset, Reset, "from {state}");
            assert_eq!(reset.next(false), Idle);
        }
    }

    #[test]
    fn transition_table_is_exact() {
        // (state, next with TMS low, next with TMS high)
        let table = [
            (Reset, Idle, Reset),
            (Idle, Idle, ScanDr),
            (ScanDr, CaptureDr, ScanIr),
            (ScanIr, CaptureIr, Reset),
            (CaptureDr, ShiftDr, Exit1Dr),
            (CaptureIr, ShiftIr, Exit1Ir),
            (ShiftDr, ShiftDr, Exit1Dr),
            (ShiftIr, ShiftIr, Exit1Ir),
            (Exit1Dr, PauseDr, UpdateDr),
            (Exit1Ir, PauseIr, UpdateIr),
            (PauseDr, PauseDr, Exit2Dr),
            (PauseIr, PauseIr, Exit2Ir),
            (Exit2Dr, ShiftDr, UpdateDr),
            (Exit2Ir, ShiftIr, UpdateIr),
            (UpdateDr, Idle, ScanDr),
            (UpdateIr, Idle, ScanDr),
        ];
        assert_eq!(table.len(), TapState::ALL.len());

        for (state, low, high) in table {
            assert_eq!(state.next(false), low, "{state} with TMS low");
            assert_eq!(state.next(true), high, "{state} with TMS high");
        }
    }

    #[test]
    fn update_reverses_lsb_first_bits() {
        let value = 0xDEAD_BEEFu32;
        let mut reg = ShiftRegister::default();
        reg.capture();
        for i in 0..32 {
            reg.shift_in((value >> i) & 1 == 1);
        }
        assert_eq!(reg.update(), value);
    }

    #[test]
    fn short_shift_is_right_aligned() {
        let mut reg = ShiftRegister::default();
        reg.capture();
        // 0b1011, LSB first
        for bit in [true, true, false, true] {
            reg.shift_in(bit);
        }
        assert_eq!(reg.update(), 0b1011);
        assert_eq!(reg.bits(), 4);
    }

    #[test]
    fn empty_update_clamps_to_one_bit() {
        let mut reg = ShiftRegister::default();
        reg.shift_in(true);
        reg.capture();
        reg.update();
        assert_eq!(reg.bits(), 1);
    }

    #[test]
    fn long_shift_keeps_last_32_bits() {
        let mut reg = ShiftRegister::default();
        reg.capture();
        // four junk bits, then the value
        for _ in 0..4 {
            reg.shift_in(true);
        }
        let value = 0x1234_5678u32;
        for i in 0..32 {
            reg.shift_in((value >> i) & 1 == 1);
        }
        assert_eq!(reg.bits(), 36);
        // the first four shifted bits fell off the accumulator
        assert_eq!(reg.update(), value);
    }
}
