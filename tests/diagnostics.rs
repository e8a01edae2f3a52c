//! Diagnostic traffic glue: fault activity feeding the DTC manager, DM1
//! broadcasts on their period and DM2 answers to a request PGN.

use fusor::protocol::dtc::{parse_dtc, DtcConfig, DtcManager, Lamp};
use fusor::protocol::j1939::{
    encode_id, encode_request, pgn_of, J1939Config, J1939Driver, PGN_DM1,
    PGN_DM2, PGN_REQUEST,
};
use fusor::protocol::{CanFrame, ProtocolDriver};

const NODE: u8 = 0x25;

/// The application-level pump: broadcast DM1 when due, answer DM2 requests.
fn diagnostic_frames(
    manager: &mut DtcManager,
    driver: &mut J1939Driver,
    now_us: u64,
) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    if manager.dm1_due(now_us) {
        frames.push(CanFrame::new(
            encode_id(6, PGN_DM1, NODE),
            &manager.dm1_frame(),
        ));
    }
    if let Some(requested) = driver.take_request() {
        if requested == PGN_DM2 {
            frames.push(CanFrame::new(
                encode_id(6, PGN_DM2, NODE),
                &manager.dm2_frame(),
            ));
        }
    }
    frames
}

#[test]
fn dm1_broadcast_carries_the_active_fault() {
    let mut manager = DtcManager::new(DtcConfig::default());
    let mut driver = J1939Driver::new(J1939Config {
        node_address: NODE,
        ..J1939Config::default()
    });

    manager.set_active(100_500, 3, Lamp::Amber, 0);

    let frames = diagnostic_frames(&mut manager, &mut driver, 1_000_000);
    assert_eq!(frames.len(), 1);
    assert_eq!(pgn_of(frames[0].id), PGN_DM1);
    let (spn, fmi, occ) = parse_dtc(&frames[0].data);
    assert_eq!((spn, fmi, occ), (100_500, 3, 1));

    // Not due again within the period.
    let frames = diagnostic_frames(&mut manager, &mut driver, 1_400_000);
    assert!(frames.is_empty());
}

#[test]
fn dm2_is_served_on_request() {
    let mut manager = DtcManager::new(DtcConfig::default());
    let mut driver = J1939Driver::new(J1939Config {
        node_address: NODE,
        ..J1939Config::default()
    });

    // A fault that came and went: stored, not active.
    manager.set_active(520_100, 7, Lamp::Red, 0);
    manager.clear(520_100, 7);
    assert_eq!(manager.mil_status(), Lamp::Off);

    // Peer requests DM2.
    let mut request =
        CanFrame::new(encode_id(6, PGN_REQUEST, 0x10), &[0, 0, 0]);
    request.data[..3].copy_from_slice(&encode_request(PGN_DM2));
    let mut events = heapless::Vec::new();
    driver.decode(0, &request, &mut events);

    // Consume the DM1 slot first so only the answer remains.
    manager.dm1_due(1_000_000);
    let frames = diagnostic_frames(&mut manager, &mut driver, 1_000_001);
    let dm2 = frames
        .iter()
        .find(|f| pgn_of(f.id) == PGN_DM2)
        .expect("dm2 answer");
    let (spn, fmi, _) = parse_dtc(&dm2.data);
    assert_eq!((spn, fmi), (520_100, 7));
}
