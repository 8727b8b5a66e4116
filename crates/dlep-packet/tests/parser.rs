use dlep_packet::*;
use hex_literal::hex;

#[test]
fn parse_heartbeat() {
    const PACKET: &[u8] = &hex!("00 10 00 00");
    let protocfg = ProtocolConfig::default_config();
    let pm = ProtocolMessage::parse(PACKET, &protocfg).unwrap();
    assert_eq!(pm.name(&protocfg), strings::HEARTBEAT);
    assert!(pm.data_items.is_empty());
}

#[test]
fn parse_session_initialization_response() {
    const PACKET: &[u8] = &hex!(
        "
00 02 00 0d
00 01 00 01 00
00 05 00 04 00 00 03 e8
"
    );
    let protocfg = ProtocolConfig::default_config();
    let pm = ProtocolMessage::parse(PACKET, &protocfg).unwrap();
    assert_eq!(pm.name(&protocfg), strings::SESSION_INITIALIZATION_RESPONSE);

    let (code, text) = pm.status(&protocfg).unwrap();
    assert_eq!(protocfg.status_name(code), strings::SUCCESS);
    assert!(text.is_empty());
    assert_eq!(pm.heartbeat_interval(&protocfg), Some(1000));

    // Emit must reproduce the original bytes.
    assert_eq!(&pm.to_bytes()[..], PACKET);
}

#[test]
fn parse_destination_up() {
    const PACKET: &[u8] = &hex!(
        "
00 07 00 1f
00 07 00 06 aa bb cc 00 00 01
00 10 00 08 00 00 00 00 00 00 13 88
00 08 00 05 01 0a 00 00 05
"
    );
    let protocfg = ProtocolConfig::default_config();
    let pm = ProtocolMessage::parse(PACKET, &protocfg).unwrap();
    assert_eq!(pm.name(&protocfg), strings::DESTINATION_UP);

    let mac = pm.mac(&protocfg).unwrap();
    assert_eq!(mac.to_string(), "aa:bb:cc:00:00:01");

    let stored = pm.metric_and_ip_items(&protocfg);
    assert_eq!(stored.len(), 2);
    assert_eq!(
        stored[0],
        DataItem::new(protocfg.item_id(strings::LATENCY), DataItemValue::U64(5000))
    );
    assert!(stored[1].is_add());
    assert_eq!(stored[1].net(), Some("10.0.0.5/32".parse().unwrap()));
}

#[test]
fn framing_two_messages() {
    const PACKET: &[u8] = &hex!(
        "
00 10 00 00
00 05 00 08 00 01 00 04 84 62 79 65
"
    );
    let protocfg = ProtocolConfig::default_config();

    let first_len = peek_message_length(PACKET);
    assert_eq!(first_len, 4);
    let (first, rest) = PACKET.split_at(first_len);
    let pm = ProtocolMessage::parse(first, &protocfg).unwrap();
    assert_eq!(pm.name(&protocfg), strings::HEARTBEAT);

    assert_eq!(peek_message_length(rest), rest.len());
    let pm = ProtocolMessage::parse(rest, &protocfg).unwrap();
    assert_eq!(pm.name(&protocfg), strings::SESSION_TERMINATION);
    let (code, text) = pm.status(&protocfg).unwrap();
    assert_eq!(protocfg.status_name(code), strings::TIMED_OUT);
    assert_eq!(text, "bye");
}

#[test]
fn truncated_item_rejected() {
    // Destination Up whose MAC item claims 6 value bytes but the message
    // payload ends after 2.
    const PACKET: &[u8] = &hex!("00 07 00 06 00 07 00 06 aa bb");
    let protocfg = ProtocolConfig::default_config();
    assert!(ProtocolMessage::parse(PACKET, &protocfg).is_err());
}

#[test]
fn unknown_data_item_rejected() {
    const PACKET: &[u8] = &hex!("00 10 00 05 ff fe 00 01 00");
    let protocfg = ProtocolConfig::default_config();
    assert!(matches!(
        ProtocolMessage::parse(PACKET, &protocfg),
        Err(DlepParseError::UnknownDataItem { item: 0xfffe })
    ));
}
