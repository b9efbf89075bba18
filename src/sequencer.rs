//! Target bring-up and the coordination around re-running it.
//!
//! [`Sequencer`] owns the transport and the board lines and walks one
//! bring-up from power-good to releasing the core. [`ResetController`] puts
//! it behind the single lock shared by the main loop and the reset-signal
//! path, and carries the flags the two sides use to talk to each other.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::ErrorKind;
use tracing::{debug, error, info, trace, warn};

use crate::board::BoardControl;
use crate::config::Config;
use crate::loader::{self, regs, LoaderError, Mismatch};
use crate::patch::BootPatch;
use crate::transport::{DebugTransport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("Debug transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Board line access failed: {0:?}")]
    Pin(ErrorKind),
    #[error("Timed out waiting for power good.")]
    PowerGoodTimeout,
    #[error("Timed out waiting for the target ID, last read {last_id:#x}.")]
    IdTimeout { last_id: u32 },
    #[error("Timed out waiting for the bus to answer at {addr:#010x}.")]
    BusTimeout { addr: u32 },
    #[error("Reset sequence was cancelled.")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, docsplay::Display)]
pub enum SequencerState {
    /// idle
    Idle,
    /// awaiting power good
    AwaitingPowerGood,
    /// bringing up transport
    BringingUpTransport,
    /// patching
    Patching,
    /// verifying
    Verifying,
    /// releasing
    Releasing,
}

/// What started a sequence run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, docsplay::Display)]
pub enum Trigger {
    /// power on
    PowerOn,
    /// forced reset
    Forced,
    /// pending reset
    Pending,
    /// host reset request
    HostRequest,
    /// external reset signal
    ExternalSignal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Skipped,
    Passed,
    Failed(Mismatch),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceReport {
    pub trigger: Trigger,
    pub verify: VerifyOutcome,
}

/// Aborts the bring-up polls. Once observed, the token is cleared again.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), SequenceError> {
        if self.0.swap(false, Ordering::SeqCst) {
            Err(SequenceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

struct Deadline(Option<Instant>);

impl Deadline {
    fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    fn expired(&self) -> bool {
        self.0.is_some_and(|end| Instant::now() >= end)
    }
}

pub struct Sequencer<T, B, D> {
    transport: T,
    board: B,
    delay: D,
    patch: BootPatch,
    config: Config,
    state: SequencerState,
    workaround_applied: bool,
    reset_pending: bool,
    /// The last run got as far as pulsing the core's soft reset.
    released: bool,
    cancel: CancelToken,
}

impl<T, B, D> Sequencer<T, B, D>
where
    T: DebugTransport,
    B: BoardControl,
    D: DelayNs,
{
    pub fn new(transport: T, board: B, delay: D, patch: BootPatch, config: Config) -> Self {
        Self {
            transport,
            board,
            delay,
            patch,
            config,
            state: SequencerState::Idle,
            workaround_applied: false,
            reset_pending: false,
            released: false,
            cancel: CancelToken::default(),
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Direct transport access, e.g. for the main loop to read target
    /// registers while holding the controller lock.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn patch(&self) -> &BootPatch {
        &self.patch
    }

    /// The patch has been written since power on.
    pub fn workaround_applied(&self) -> bool {
        self.workaround_applied
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    pub fn set_reset_pending(&mut self, pending: bool) {
        self.reset_pending = pending;
    }

    /// The core was released from soft reset during the last run, even if
    /// the run failed afterwards.
    pub fn released(&self) -> bool {
        self.released
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn enter(&mut self, state: SequencerState) {
        debug!("sequencer: {} -> {}", self.state, state);
        self.state = state;
    }

    /// Run the whole sequence once. On failure the transport is torn down
    /// and the sequencer returns to idle, ready to be run again.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self, trigger: Trigger) -> Result<SequenceReport, SequenceError> {
        info!("reset sequence started, trigger: {}", trigger);
        self.released = false;

        let result = self.sequence(trigger);
        if let Err(e) = &result {
            error!("reset sequence failed: {}", e);
            if let Err(e) = self.transport.teardown() {
                warn!("teardown after failure: {}", e);
            }
        }

        self.enter(SequencerState::Idle);
        result
    }

    fn sequence(&mut self, trigger: Trigger) -> Result<SequenceReport, SequenceError> {
        self.enter(SequencerState::AwaitingPowerGood);
        if !self.config.emulated {
            self.wait_power_good()?;
        }

        self.enter(SequencerState::BringingUpTransport);
        self.bring_up()?;

        self.enter(SequencerState::Patching);
        loader::apply(&mut self.transport, &self.patch, self.patch.base())?;
        self.workaround_applied = true;

        self.enter(SequencerState::Verifying);
        let verify = if self.config.verify_write {
            match loader::verify(&mut self.transport, &self.patch, self.patch.base()) {
                Ok(()) => VerifyOutcome::Passed,
                // the core is released anyway
                Err(LoaderError::Mismatch(m)) => {
                    warn!("bootrom verification failed at word {}", m.index);
                    VerifyOutcome::Failed(m)
                }
                Err(LoaderError::Transport(e)) => return Err(e.into()),
            }
        } else {
            VerifyOutcome::Skipped
        };

        self.enter(SequencerState::Releasing);
        loader::soft_reset_target(&mut self.transport)?;
        self.released = true;
        self.reset_pending = false;

        self.transport.reset()?;
        self.transport.teardown()?;

        info!("reset sequence complete");
        Ok(SequenceReport { trigger, verify })
    }

    fn bring_up(&mut self) -> Result<(), SequenceError> {
        self.board.set_mcu_reset(true).map_err(SequenceError::Pin)?;
        self.board.set_spi_reset(true).map_err(SequenceError::Pin)?;

        if let Err(e) = self.transport.init() {
            let _ = self.board.set_spi_reset(false);
            let _ = self.board.set_mcu_reset(false);
            return Err(e.into());
        }

        self.delay.delay_ms(1);

        self.board.set_spi_reset(false).map_err(SequenceError::Pin)?;
        self.board.set_mcu_reset(false).map_err(SequenceError::Pin)?;

        self.delay.delay_ms(2);

        self.transport.reset()?;
        if !self.config.emulated {
            self.wait_for_id()?;
        }

        self.transport.reset()?;
        self.wait_bus(regs::POSTCODE)?;

        self.transport.reset()?;
        Ok(())
    }

    fn wait_power_good(&mut self) -> Result<(), SequenceError> {
        let deadline = Deadline::after(self.config.power_good_timeout());
        loop {
            if self.board.power_good().map_err(SequenceError::Pin)? {
                debug!("power good");
                return Ok(());
            }
            self.cancel.check()?;
            if deadline.expired() {
                return Err(SequenceError::PowerGoodTimeout);
            }
        }
    }

    fn wait_for_id(&mut self) -> Result<u32, SequenceError> {
        let deadline = Deadline::after(self.config.id_timeout());
        loop {
            // the TAP may be out of step while the target comes out of reset
            self.transport.reset()?;
            let id = self.transport.read_id()?;
            if id == self.config.expected_id {
                debug!("target id {:#x}", id);
                return Ok(id);
            }
            trace!("target id {:#x}, waiting for {:#x}", id, self.config.expected_id);
            self.cancel.check()?;
            if deadline.expired() {
                return Err(SequenceError::IdTimeout { last_id: id });
            }
        }
    }

    fn wait_bus(&mut self, addr: u32) -> Result<(), SequenceError> {
        let deadline = Deadline::after(self.config.bus_ready_timeout());
        loop {
            if self.transport.wait_bus(addr)? {
                return Ok(());
            }
            self.cancel.check()?;
            if deadline.expired() {
                return Err(SequenceError::BusTimeout { addr });
            }
        }
    }
}

enum Wake {
    ResetSignal,
    Shutdown,
}

/// The sequencer behind its lock, plus the flags shared with the
/// reset-signal path.
pub struct ResetController<T, B, D> {
    sequencer: Mutex<Sequencer<T, B, D>>,
    load_on_reset_signal: bool,
    /// Tells the unrelated bus driver to abort, the transport is about to
    /// take the shared lines. Written and read without the lock.
    bus_cancel: AtomicBool,
    /// The core was reset since the main loop last acknowledged it.
    arc_reset: AtomicBool,
    signalled: AtomicBool,
    wake: Mutex<Option<Sender<Wake>>>,
}

impl<T, B, D> ResetController<T, B, D>
where
    T: DebugTransport,
    B: BoardControl,
    D: DelayNs,
{
    pub fn new(sequencer: Sequencer<T, B, D>) -> Self {
        let load_on_reset_signal = sequencer.config().load_on_reset_signal;
        Self {
            sequencer: Mutex::new(sequencer),
            load_on_reset_signal,
            bus_cancel: AtomicBool::new(false),
            arc_reset: AtomicBool::new(false),
            signalled: AtomicBool::new(false),
            wake: Mutex::new(None),
        }
    }

    /// Take the lock that serializes every use of the transport.
    pub fn lock(&self) -> MutexGuard<'_, Sequencer<T, B, D>> {
        self.sequencer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check the reset signal once at start-up. If the host has already
    /// released the target, the patch must be forced in; returns whether a
    /// reset is now pending.
    pub fn init(&self) -> Result<bool, SequenceError> {
        if !self.load_on_reset_signal {
            return Ok(false);
        }

        let mut seq = self.lock();
        if seq.board_mut().reset_released().map_err(SequenceError::Pin)? {
            info!("reset signal already released at start-up, forcing reset");
            seq.set_reset_pending(true);
        }
        Ok(seq.reset_pending())
    }

    /// Main loop entry point: run the full sequence under the lock.
    pub fn reset_sequence(&self, force: bool) -> Result<SequenceReport, SequenceError> {
        let mut seq = self.lock();
        if force {
            seq.set_reset_pending(true);
        }
        let trigger = match (force, seq.reset_pending()) {
            (true, _) => Trigger::Forced,
            (false, true) => Trigger::Pending,
            (false, false) => Trigger::PowerOn,
        };
        self.run_locked(&mut seq, trigger)
    }

    /// Reset requested by the host over the management interface.
    pub fn host_request(&self) -> Result<SequenceReport, SequenceError> {
        let mut seq = self.lock();
        seq.set_reset_pending(true);
        self.run_locked(&mut seq, Trigger::HostRequest)
    }

    fn run_locked(
        &self,
        seq: &mut Sequencer<T, B, D>,
        trigger: Trigger,
    ) -> Result<SequenceReport, SequenceError> {
        self.bus_cancel.store(true, Ordering::SeqCst);
        let result = seq.run(trigger);
        if seq.released() && self.load_on_reset_signal {
            self.arc_reset.store(true, Ordering::SeqCst);
        }
        self.bus_cancel.store(false, Ordering::SeqCst);
        result
    }

    pub fn needs_reset(&self) -> bool {
        self.lock().reset_pending()
    }

    pub fn force_reset(&self) {
        self.lock().set_reset_pending(true);
    }

    /// The core was reset since the last [`ack_reset`](Self::ack_reset).
    pub fn was_reset(&self) -> bool {
        self.arc_reset.load(Ordering::SeqCst)
    }

    pub fn ack_reset(&self) {
        self.arc_reset.store(false, Ordering::SeqCst);
    }

    pub fn bus_cancelled(&self) -> bool {
        self.bus_cancel.load(Ordering::SeqCst)
    }

    /// Called from the reset-signal interrupt. Only raises `bus_cancel` and
    /// wakes the worker; the sequence itself never runs here.
    pub fn on_reset_signal(&self) {
        if !self.load_on_reset_signal {
            return;
        }

        self.bus_cancel.store(true, Ordering::SeqCst);
        self.signalled.store(true, Ordering::SeqCst);

        let wake = self.wake.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = wake.as_ref() {
            if tx.send(Wake::ResetSignal).is_err() {
                warn!("reset worker is gone, signal left for service()");
            }
        }
    }

    /// Handle a reset signal raised since the last call. If the patch was
    /// already applied it is re-applied now, otherwise the reset is left
    /// pending for the main loop.
    pub fn service(&self) -> Result<Option<SequenceReport>, SequenceError> {
        if !self.signalled.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }

        let mut seq = self.lock();
        let result = if seq.workaround_applied() {
            self.run_locked(&mut seq, Trigger::ExternalSignal).map(Some)
        } else {
            debug!("reset signal before first patch, deferring to main loop");
            seq.set_reset_pending(true);
            Ok(None)
        };
        self.bus_cancel.store(false, Ordering::SeqCst);
        result
    }

    /// Stop the worker thread after it has handled everything already
    /// signalled.
    pub fn shutdown(&self) {
        let mut wake = self.wake.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = wake.take() {
            let _ = tx.send(Wake::Shutdown);
        }
    }
}

impl<T, B, D> ResetController<T, B, D>
where
    T: DebugTransport + Send + 'static,
    B: BoardControl + Send + 'static,
    D: DelayNs + Send + 'static,
{
    /// Start the task that services reset signals.
    pub fn spawn_worker(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel();
        *self.wake.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);

        let this = Arc::clone(self);
        thread::Builder::new().name("jtag-reset".into()).spawn(move || {
            while let Ok(wake) = rx.recv() {
                match wake {
                    Wake::ResetSignal => match this.service() {
                        Ok(Some(report)) => info!("re-patched after reset signal: {:?}", report.verify),
                        Ok(None) => {}
                        Err(e) => error!("re-patch after reset signal failed: {}", e),
                    },
                    Wake::Shutdown => break,
                }
            }
            debug!("reset worker exiting");
        })
    }
}
