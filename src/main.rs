use std::sync::Arc;

use jtagboot::board::{SimBoard, SpinDelay};
use jtagboot::config::Config;
use jtagboot::patch::BootPatch;
use jtagboot::sequencer::{ResetController, Sequencer};
use jtagboot::transport::emulated::EmulatedJtag;
use tracing_subscriber::EnvFilter;

/// Emulated instruction memory, in words.
const MEMORY_WORDS: usize = 64;

/// Stand-in boot image: a few little-endian words ending in a branch to self.
const BOOTCODE: [u8; 16] = [
    0x4a, 0x26, 0x00, 0x70, // nop
    0x4a, 0x26, 0x00, 0x70, // nop
    0x4a, 0x26, 0x00, 0x70, // nop
    0x00, 0x00, 0x00, 0x00, // b .
];

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if !config.emulated {
        tracing::warn!("only the emulated target is available here, enabling emulation");
        config.emulated = true;
    }

    let patch = BootPatch::from_le_bytes(&BOOTCODE, config.patch_offset)?;
    let jtag = EmulatedJtag::with_memory(vec![0; MEMORY_WORDS]);
    let sequencer = Sequencer::new(jtag, SimBoard::default(), SpinDelay, patch.clone(), config);

    let ctl = Arc::new(ResetController::new(sequencer));
    ctl.init()?;

    let report = ctl.reset_sequence(false)?;
    tracing::info!("bring-up done: {:?}", report);

    let worker = ctl.spawn_worker()?;

    // host pulses the target's reset line
    ctl.lock().board_mut().reset_released = true;
    ctl.on_reset_signal();

    ctl.shutdown();
    if worker.join().is_err() {
        anyhow::bail!("reset worker panicked");
    }

    if ctl.was_reset() {
        tracing::info!("target core was reset, acknowledging");
        ctl.ack_reset();
    }

    let seq = ctl.lock();
    for i in 0..patch.len() {
        let addr = patch.addr_of(i);
        tracing::info!("{:#06x}: {:#010x}", addr, seq.transport().read(addr)?);
    }

    Ok(())
}
