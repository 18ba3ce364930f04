// SPDX-License-Identifier: Apache-2.0

use super::env::{server_reply, server_reply_frame, TEST_MAC};
use crate::{
    msg::{DhcpV4Outgoing, OVERLOAD_FILE, OVERLOAD_SNAME},
    DhcpV4Incoming, DhcpV4MessageType, DhcpV4OptionCode, ErrorKind,
};

#[test]
fn test_incoming_rejects_short_buffer() {
    let e = DhcpV4Incoming::parse(&[0u8; 10]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidDhcpMessage);
}

#[test]
fn test_incoming_rejects_bad_magic_cookie() {
    let mut raw = server_reply(&TEST_MAC, 1, DhcpV4MessageType::Offer, None);
    raw[236] = 0;
    let e = DhcpV4Incoming::parse(&raw).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidDhcpMessage);
}

#[test]
fn test_incoming_rejects_truncated_option() {
    let mut raw = server_reply(&TEST_MAC, 1, DhcpV4MessageType::Offer, None);
    // Replace the tail with an option claiming more payload than
    // remains.
    let len = raw.len();
    raw[len - 3] = u8::from(DhcpV4OptionCode::ClientIdentifier);
    raw[len - 2] = 200;
    let e = DhcpV4Incoming::parse(&raw).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidDhcpMessage);
}

#[test]
fn test_incoming_parses_eth_frame() {
    let frame =
        server_reply_frame(&TEST_MAC, 0xabcd, DhcpV4MessageType::Offer, None);
    let message = DhcpV4Incoming::parse_eth_frame(&frame).unwrap();
    assert_eq!(message.header().xid, 0xabcd);
    assert_eq!(message.message_type(), Some(DhcpV4MessageType::Offer));
}

#[test]
fn test_incoming_rejects_non_ethernet_bytes() {
    let e = DhcpV4Incoming::parse_eth_frame(&[0x55u8; 10]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidDhcpMessage);
}

#[test]
fn test_repeated_options_concatenate() {
    // RFC 3396: one logical option split over two instances.
    let mut raw = vec![0u8; 236];
    raw[0] = 2; // BOOTREPLY
    raw.extend_from_slice(&[99u8, 130, 83, 99]);
    raw.extend_from_slice(&[61, 2, 0xab, 0xcd]);
    raw.extend_from_slice(&[53, 1, 2]);
    raw.extend_from_slice(&[61, 2, 0xef, 0x01]);
    raw.push(255);

    let message = DhcpV4Incoming::parse(&raw).unwrap();
    assert_eq!(
        message.query(DhcpV4OptionCode::ClientIdentifier),
        Some(&[0xab, 0xcd, 0xef, 0x01][..])
    );
    assert_eq!(message.message_type(), Some(DhcpV4MessageType::Offer));
}

#[test]
fn test_pad_options_are_skipped() {
    let mut raw = vec![0u8; 236];
    raw[0] = 2;
    raw.extend_from_slice(&[99u8, 130, 83, 99]);
    raw.extend_from_slice(&[0, 0, 0, 53, 1, 5, 0, 255]);

    let message = DhcpV4Incoming::parse(&raw).unwrap();
    assert_eq!(message.message_type(), Some(DhcpV4MessageType::Ack));
}

#[test]
fn test_outgoing_overflow_without_overload() {
    let mut message = DhcpV4Outgoing::new(0);
    message
        .append(DhcpV4OptionCode::ErrorMessage, &[0x61; 250])
        .unwrap();
    let e = message
        .append(DhcpV4OptionCode::ClientIdentifier, &[0x62; 120])
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MessageOverflow);
}

#[test]
fn test_outgoing_rejects_oversized_option() {
    let mut message = DhcpV4Outgoing::new(0);
    let e = message
        .append(DhcpV4OptionCode::ErrorMessage, &[0x61; 300])
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_options_overload_into_sname() {
    let mut message = DhcpV4Outgoing::new(OVERLOAD_SNAME);
    message
        .append(DhcpV4OptionCode::ErrorMessage, &[0x61; 250])
        .unwrap();
    message
        .append(DhcpV4OptionCode::MessageType, &[0x62; 60])
        .unwrap();
    // Main area is full now, this one lands in the sname region.
    message
        .append(DhcpV4OptionCode::ServerIdentifier, &[0x63; 30])
        .unwrap();

    let raw = message.to_bytes();
    let parsed = DhcpV4Incoming::parse(&raw).unwrap();
    assert_eq!(
        parsed.query(DhcpV4OptionCode::OptionOverload),
        Some(&[OVERLOAD_SNAME][..])
    );
    assert_eq!(
        parsed.query(DhcpV4OptionCode::ServerIdentifier),
        Some(&[0x63; 30][..])
    );
    assert_eq!(
        parsed.query(DhcpV4OptionCode::ErrorMessage),
        Some(&[0x61; 250][..])
    );
    // The spilled option lives in the sname header region.
    assert_eq!(raw[44], u8::from(DhcpV4OptionCode::ServerIdentifier));
}

#[test]
fn test_options_overload_prefers_file_then_sname() {
    let mut message = DhcpV4Outgoing::new(OVERLOAD_FILE | OVERLOAD_SNAME);
    message
        .append(DhcpV4OptionCode::ErrorMessage, &[0x61; 250])
        .unwrap();
    message
        .append(DhcpV4OptionCode::MessageType, &[0x62; 60])
        .unwrap();
    message
        .append(DhcpV4OptionCode::ClientIdentifier, &[0x63; 120])
        .unwrap();
    message
        .append(DhcpV4OptionCode::ServerIdentifier, &[0x64; 60])
        .unwrap();

    let raw = message.to_bytes();
    let parsed = DhcpV4Incoming::parse(&raw).unwrap();
    assert_eq!(
        parsed.query(DhcpV4OptionCode::OptionOverload),
        Some(&[OVERLOAD_FILE | OVERLOAD_SNAME][..])
    );
    // file region starts after the 64 byte sname region.
    assert_eq!(raw[44 + 64], u8::from(DhcpV4OptionCode::ClientIdentifier));
    assert_eq!(raw[44], u8::from(DhcpV4OptionCode::ServerIdentifier));
    assert_eq!(
        parsed.query(DhcpV4OptionCode::ClientIdentifier),
        Some(&[0x63; 120][..])
    );
    assert_eq!(
        parsed.query(DhcpV4OptionCode::ServerIdentifier),
        Some(&[0x64; 60][..])
    );
}
