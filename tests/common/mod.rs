#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bitvec::prelude::*;
use embedded_hal::digital::ErrorKind;
use jtagboot::transport::{DebugTransport, ScanEnd, TransportError};

pub const EXPECTED_ID: u32 = 0x138A5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Init,
    Reset,
    ReadId,
    Read(u32),
    Write(u32, u32),
    WaitBus(u32),
    Teardown,
}

/// Shared view of everything a [`MockTransport`] was asked to do.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(a, v) if a == addr => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Read(a) => Some(a),
                _ => None,
            })
            .collect()
    }
}

/// Word-level transport over a sparse memory map. Shift primitives are
/// accepted and ignored.
pub struct MockTransport {
    pub log: Log,
    pub memory: HashMap<u32, u32>,
    /// Reads of these addresses return the given value instead.
    pub corrupt: HashMap<u32, u32>,
    /// IDs handed out before the expected one.
    pub ids: VecDeque<u32>,
    /// Number of bus-ready polls answered "not ready".
    pub bus_busy: usize,
    /// `teardown` reports a pin failure.
    pub fail_teardown: bool,
    ready: bool,
}

impl MockTransport {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            memory: HashMap::new(),
            corrupt: HashMap::new(),
            ids: VecDeque::new(),
            bus_busy: 0,
            fail_teardown: false,
            ready: false,
        }
    }

    pub fn word(&self, addr: u32) -> u32 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.ready {
            Ok(())
        } else {
            Err(TransportError::NotReady)
        }
    }
}

impl DebugTransport for MockTransport {
    fn init(&mut self) -> Result<(), TransportError> {
        self.log.push(Event::Init);
        self.ready = true;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.check()?;
        self.log.push(Event::Reset);
        Ok(())
    }

    fn read_id(&mut self) -> Result<u32, TransportError> {
        self.check()?;
        self.log.push(Event::ReadId);
        Ok(self.ids.pop_front().unwrap_or(EXPECTED_ID))
    }

    fn tick(&mut self, _count: u32) -> Result<(), TransportError> {
        self.check()
    }

    fn update_ir(&mut self, _bits: &BitSlice<u8, Lsb0>) -> Result<(), TransportError> {
        self.check()
    }

    fn update_dr(&mut self, bits: &BitSlice<u8, Lsb0>, _end: ScanEnd) -> Result<BitVec<u8, Lsb0>, TransportError> {
        self.check()?;
        Ok(bitvec![u8, Lsb0; 0; bits.len()])
    }

    fn teardown(&mut self) -> Result<(), TransportError> {
        self.log.push(Event::Teardown);
        self.ready = false;
        if self.fail_teardown {
            return Err(TransportError::Pin(ErrorKind::Other));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, TransportError> {
        self.check()?;
        self.log.push(Event::Read(addr));
        Ok(self.corrupt.get(&addr).copied().unwrap_or_else(|| self.word(addr)))
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), TransportError> {
        self.check()?;
        self.log.push(Event::Write(addr, value));
        self.memory.insert(addr, value);
        Ok(())
    }

    fn wait_bus(&mut self, addr: u32) -> Result<bool, TransportError> {
        self.check()?;
        self.log.push(Event::WaitBus(addr));
        if self.bus_busy > 0 {
            self.bus_busy -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}
