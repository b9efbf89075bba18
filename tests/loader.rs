mod common;

use common::{Event, Log, MockTransport};
use jtagboot::loader::{self, regs, LoaderError, Mismatch, Postcode};
use jtagboot::patch::BootPatch;
use jtagboot::transport::DebugTransport;

fn transport() -> (MockTransport, Log) {
    let log = Log::default();
    let mut t = MockTransport::new(log.clone());
    t.init().unwrap();
    (t, log)
}

fn writes(log: &Log) -> Vec<(u32, u32)> {
    log.events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Write(a, v) => Some((a, v)),
            _ => None,
        })
        .collect()
}

#[test]
fn apply_write_order() {
    let (mut t, log) = transport();
    let patch = BootPatch::new(vec![0xA, 0xB, 0xC], 0x80).unwrap();

    loader::apply(&mut t, &patch, 0x80).unwrap();

    assert_eq!(log.events()[1], Event::Reset);
    assert_eq!(
        writes(&log),
        vec![
            (regs::MISC_CNTL, 0xF0),
            (regs::MISC_CNTL, 0),
            (regs::GPIO_TRIEN, 0xFF00),
            (regs::POSTCODE, Postcode::PatchStart.value()),
            (0x80, 0xA),
            (0x84, 0xB),
            (0x88, 0xC),
            (regs::POSTCODE, Postcode::PatchDone.value()),
        ]
    );
}

#[test]
fn halt_pulse_preserves_other_bits() {
    let (mut t, log) = transport();
    t.memory.insert(regs::MISC_CNTL, 0x8000_0003);
    let patch = BootPatch::new(vec![1], 0).unwrap();

    loader::apply(&mut t, &patch, 0).unwrap();

    assert_eq!(log.writes_to(regs::MISC_CNTL), vec![0x8000_00F3, 0x8000_0003]);
    assert_eq!(t.word(regs::MISC_CNTL), 0x8000_0003);
}

#[test]
fn verify_stops_at_first_divergence() {
    let (mut t, log) = transport();
    let patch = BootPatch::new(vec![10, 11, 12, 13, 14], 0x80).unwrap();
    loader::apply(&mut t, &patch, 0x80).unwrap();

    let k = 3;
    t.corrupt.insert(patch.addr_of(k), 0xBAD);
    let reads_before = log.reads().len();

    assert_eq!(
        loader::verify(&mut t, &patch, 0x80),
        Err(LoaderError::Mismatch(Mismatch {
            index: k,
            addr: 0x8C,
            expected: 13,
            actual: 0xBAD,
        }))
    );

    assert_eq!(&log.reads()[reads_before..], &[0x80, 0x84, 0x88, 0x8C]);
    assert_eq!(
        log.events().last(),
        Some(&Event::Write(regs::POSTCODE, Postcode::VerifyFailed.value()))
    );
}

#[test]
fn verify_passes_without_postcode() {
    let (mut t, log) = transport();
    let patch = BootPatch::new(vec![0, 1, 2], 0).unwrap();
    loader::apply(&mut t, &patch, 0).unwrap();
    let writes_before = writes(&log).len();

    loader::verify(&mut t, &patch, 0).unwrap();
    assert_eq!(writes(&log).len(), writes_before);
}

#[test]
fn soft_reset_pulses_and_clears() {
    let (mut t, log) = transport();
    t.memory.insert(regs::MISC_CNTL, 0x1);

    loader::soft_reset_target(&mut t).unwrap();

    assert_eq!(log.events()[1], Event::Reset);
    assert_eq!(
        writes(&log),
        vec![
            (regs::MISC_CNTL, 0xF1),
            (regs::MISC_CNTL, 0x1),
            (regs::ROM_BASE, regs::RESET_VECTOR),
            (regs::MISC_CNTL, 0x1001),
            (regs::MISC_CNTL, 0x1),
        ]
    );
}

#[test]
fn transport_errors_propagate() {
    let log = Log::default();
    let mut t = MockTransport::new(log.clone());
    let patch = BootPatch::new(vec![1], 0).unwrap();

    assert!(loader::apply(&mut t, &patch, 0).is_err());
    assert!(matches!(loader::verify(&mut t, &patch, 0), Err(LoaderError::Transport(_))));
    assert!(log.events().is_empty());
}
