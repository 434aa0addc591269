mod common;

use common::*;
use telink_rs::codec::{PacketCipher, TelinkCipher};
use telink_rs::constants::MAX_PAYLOAD_SIZE;
use telink_rs::crypto;
use telink_rs::packet::CommandPacket;
use telink_rs::VendorCode;

fn paired_session() -> SessionState {
    let mut session = SessionState::new(identity(), VendorCode::default());
    session.derive_shared_key(&[0, 1, 2, 3, 4, 5, 6, 7], &DEVICE_NONCE);
    session
}

#[test]
fn test_counter_after_n_builds() {
    let mut session = paired_session();
    for n in 0..300u16 {
        assert_eq!(session.packet_counter(), 1 + n);
        session.build_packet(&TelinkCipher, Command::StatusQuery, &[0x10]).unwrap();
    }
    assert_eq!(session.packet_counter(), 301);
}

#[test]
fn test_payload_bound() {
    let mut session = paired_session();
    for len in 0..=MAX_PAYLOAD_SIZE {
        let payload = vec![0x5A; len];
        assert!(session.build_packet(&TelinkCipher, Command::TimeSet, &payload).is_ok(), "len {len}");
    }
    for len in [11, 16, 20, 64] {
        let payload = vec![0x5A; len];
        assert!(matches!(
            session.build_packet(&TelinkCipher, Command::TimeSet, &payload),
            Err(TelinkError::PayloadTooLarge { size, max: 10 }) if size == len
        ));
    }
    assert_eq!(session.packet_counter(), 1 + MAX_PAYLOAD_SIZE as u16 + 1);
}

#[test]
fn test_identical_payloads_encrypt_differently() {
    let mut session = paired_session();
    let first = session.build_packet(&TelinkCipher, Command::LightOnOff, &[1, 0, 0]).unwrap();
    let second = session.build_packet(&TelinkCipher, Command::LightOnOff, &[1, 0, 0]).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_built_packet_fields() {
    let mut session = paired_session();
    session.set_vendor(VendorCode(0x1234));
    let key = session.key().unwrap().clone();

    let packet = session.build_packet(&TelinkCipher, Command::GroupEdit, &[0x01, 0x09, 0x00]).unwrap();
    let plaintext = session.decrypt_packet(&TelinkCipher, &packet).unwrap();
    assert_eq!(
        plaintext[..],
        hex_to_bytes("0100 00 0000 0000 d7 3412 010900 00000000000000")[..]
    );

    let parsed = CommandPacket::try_from(
        &TelinkCipher
            .decrypt(&key, &identity().reverse_address(), &packet)
            .unwrap()[..],
    )
    .unwrap();
    assert_eq!(parsed.vendor, 0x1234);
    assert_eq!(parsed.destination, 0);
}

#[test]
fn test_encrypt_requires_key_and_length() {
    let session = SessionState::new(identity(), VendorCode::default());
    assert!(matches!(
        session.encrypt_packet(&TelinkCipher, &[0; PACKET_SIZE]),
        Err(TelinkError::NoSessionKey)
    ));
    assert!(matches!(
        session.decrypt_packet(&TelinkCipher, &[0; PACKET_SIZE]),
        Err(TelinkError::NoSessionKey)
    ));

    let session = paired_session();
    assert!(matches!(
        session.encrypt_packet(&TelinkCipher, &[0; 19]),
        Err(TelinkError::InvalidPacketLength { expected: 20, actual: 19 })
    ));
}

#[test]
fn test_pairing_proof_matches_session_identity() {
    let session = paired_session();
    let nonce_a = [9, 9, 9, 9, 1, 1, 1, 1];
    let request = crypto::build_pair_request(session.identity(), &nonce_a).unwrap();

    let mut provisional = [0u8; 16];
    provisional[..8].copy_from_slice(&nonce_a);
    assert_eq!(request[9..], session.encrypt_identity(&provisional).unwrap()[..8]);
    assert!(matches!(
        session.encrypt_identity(&provisional[..8]),
        Err(TelinkError::InvalidKeyLength { expected: 16, actual: 8 })
    ));
    assert_eq!(session.combine_identity(), crypto::combine_identity(&identity()));
}
