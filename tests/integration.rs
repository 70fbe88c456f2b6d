//! Integration tests for gearman-client.
//!
//! These tests verify the integration between the codec, job and config
//! modules.

use bytes::Bytes;
use gearman_client::protocol::{Header, Magic, Packet, PacketBuffer, PacketType, HEADER_SIZE};
use gearman_client::{ClientConfig, GearmanError, Job, JobPriority, JobStatus, WorkerConfig};
use std::time::Duration;

/// Test a submission packet through the buffer.
#[test]
fn test_submit_job_through_buffer() {
    let job = Job::new("reverse", "Hello World")
        .with_unique_id("uid-1")
        .with_priority(JobPriority::High);
    let bytes = job.to_packet().unwrap().encode();

    let mut buffer = PacketBuffer::new();
    let packets = buffer.push(&bytes).unwrap();
    assert_eq!(packets.len(), 1);

    let packet = &packets[0];
    assert!(packet.is_request());
    assert_eq!(packet.packet_type(), PacketType::SubmitJobHigh);

    let parts = packet.components(3).unwrap();
    assert_eq!(parts[0].as_ref(), b"reverse");
    assert_eq!(parts[1].as_ref(), b"uid-1");
    assert_eq!(parts[2].as_ref(), b"Hello World");
}

/// Test the submission type table.
#[test]
fn test_background_submission_types() {
    let cases = [
        (JobPriority::Low, PacketType::SubmitJobLowBg),
        (JobPriority::Normal, PacketType::SubmitJobBg),
        (JobPriority::High, PacketType::SubmitJobHighBg),
    ];
    for (priority, expected) in cases {
        let job = Job::new("f", "").with_priority(priority).background(true);
        let packet = job.to_packet().unwrap();
        assert_eq!(packet.packet_type(), expected);
        assert!(packet.packet_type().is_background_submission());
        assert_eq!(packet.packet_type().priority(), Some(priority));
    }
}

/// Test a job's lifecycle as a sequence of server packets.
#[test]
fn test_job_lifecycle_sequence() {
    let mut all_bytes = Vec::new();
    let sequence = [
        (PacketType::JobCreated, &b"H:srv:7"[..]),
        (PacketType::WorkStatus, &b"H:srv:7\x001\x004"[..]),
        (PacketType::WorkData, &b"H:srv:7\x00dlroW"[..]),
        (PacketType::WorkComplete, &b"H:srv:7\x00 olleH"[..]),
    ];
    for (packet_type, payload) in sequence {
        all_bytes.extend_from_slice(&Packet::response(packet_type, Bytes::copy_from_slice(payload)).encode());
    }

    let mut buffer = PacketBuffer::new();
    let packets = buffer.push(&all_bytes).unwrap();
    assert_eq!(packets.len(), 4);
    assert!(buffer.is_empty());

    for (packet, (packet_type, payload)) in packets.iter().zip(sequence) {
        assert!(packet.is_response());
        assert_eq!(packet.packet_type(), packet_type);
        assert_eq!(packet.payload(), payload);
        assert_eq!(packet.packet_type().is_work_update(), packet_type != PacketType::JobCreated);
    }
    assert!(packets[3].packet_type().is_terminal_work_update());

    let status = packets[1].components(3).unwrap();
    assert_eq!(status[1].as_ref(), b"1");
    assert_eq!(status[2].as_ref(), b"4");
}

/// Test that every packet type survives encoding in both directions.
#[test]
fn test_every_type_roundtrips() {
    let large: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let payloads = [
        Bytes::new(),
        Bytes::from_static(b"H:srv:1\0fn\0\0data\0with\0nul"),
        Bytes::from(large),
    ];

    let mut stream = Vec::new();
    let mut expected = Vec::new();
    for packet_type in PacketType::ALL {
        for magic in [Magic::Request, Magic::Response] {
            for payload in &payloads {
                let packet = Packet::new(magic, packet_type, payload.clone());
                let bytes = packet.encode();
                assert_eq!(bytes.len(), HEADER_SIZE + payload.len());

                let decoded = Packet::decode(&bytes).unwrap();
                assert_eq!(decoded.magic(), magic);
                assert_eq!(decoded.packet_type(), packet_type);
                assert_eq!(decoded.payload(), payload.as_ref());

                stream.extend_from_slice(&bytes);
                expected.push(packet);
            }
        }
    }

    let mut buffer = PacketBuffer::new();
    let mut received = Vec::new();
    for chunk in stream.chunks(7_919) {
        received.extend(buffer.push(chunk).unwrap());
    }
    assert!(buffer.is_empty());
    assert_eq!(received, expected);
}

/// Test STATUS_RES parsing.
#[test]
fn test_status_response() {
    let packet = Packet::from_components(
        Magic::Response,
        PacketType::StatusRes,
        &[&b"H:srv:1"[..], b"1", b"0", b"3", b"10"],
    )
    .unwrap();

    let status = JobStatus::from_packet(&packet).unwrap();
    assert!(status.known);
    assert!(!status.running);
    assert_eq!((status.numerator, status.denominator), (3, 10));
}

/// Test ERROR packet layout.
#[test]
fn test_error_packet() {
    let packet = Packet::from_components(
        Magic::Response,
        PacketType::Error,
        &[&b"ERR_UNKNOWN"[..], b"Unknown command"],
    )
    .unwrap();
    let bytes = packet.encode();
    assert_eq!(&bytes[..4], b"\0RES");
    assert_eq!(&bytes[4..8], &19u32.to_be_bytes());
    assert_eq!(&bytes[8..12], &27u32.to_be_bytes());

    let decoded = Packet::decode(&bytes).unwrap();
    let parts = decoded.components(2).unwrap();
    assert_eq!(parts[0].as_ref(), b"ERR_UNKNOWN");
    assert_eq!(parts[1].as_ref(), b"Unknown command");
}

/// Test fragmented packet parsing.
#[test]
fn test_fragmented_packet_parsing() {
    let payload = Bytes::from_static(b"H:srv:9\0reverse\0test data for fragmentation");
    let bytes = Packet::response(PacketType::JobAssign, payload.clone()).encode();

    let mut buffer = PacketBuffer::new();
    assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
    assert!(buffer.push(&bytes[5..HEADER_SIZE]).unwrap().is_empty());

    let mid = HEADER_SIZE + payload.len() / 2;
    assert!(buffer.push(&bytes[HEADER_SIZE..mid]).unwrap().is_empty());

    let packets = buffer.push(&bytes[mid..]).unwrap();
    assert_eq!(packets.len(), 1);
    let parts = packets[0].components(3).unwrap();
    assert_eq!(parts[1].as_ref(), b"reverse");
    assert_eq!(parts[2].as_ref(), b"test data for fragmentation");
}

/// Test that a corrupted header is rejected.
#[test]
fn test_corrupted_magic_rejected() {
    let mut bytes = Packet::request(PacketType::EchoReq, Bytes::from_static(b"DEADBEEF"))
        .encode()
        .to_vec();
    bytes[1] = b'X';

    assert!(matches!(Header::decode(&bytes), Err(GearmanError::BadMagic(_))));
    let mut buffer = PacketBuffer::new();
    assert!(matches!(buffer.push(&bytes), Err(GearmanError::BadMagic(_))));
}

/// Test configuration loading from JSON.
#[test]
fn test_config_from_json() {
    let client = ClientConfig::from_json(r#"{"submit_timeout_ms": 500}"#).unwrap();
    assert_eq!(client.submit_timeout, Duration::from_millis(500));
    assert_eq!(client.request_timeout, ClientConfig::default().request_timeout);

    let worker = WorkerConfig::from_json(
        r#"{"worker_id": "w-7", "poll_interval_ms": 25, "connection": {"read_chunk_size": 1024}}"#,
    )
    .unwrap();
    assert_eq!(worker.worker_id, "w-7");
    assert_eq!(worker.poll_interval, Duration::from_millis(25));
    assert_eq!(worker.connection.read_chunk_size, 1024);

    assert!(matches!(
        ClientConfig::from_json("{not json"),
        Err(GearmanError::Config(_))
    ));
}
