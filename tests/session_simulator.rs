//! End-to-end session tests against the simulated device

use chrono::NaiveDate;
use iflag_core::core::parameter::ParameterError;
use iflag_core::core::protocol::framing::NAK;
use iflag_core::core::simulator::{DeviceTemplates, ErrorInjectionConfig, VirtualDevice};
use iflag_core::{
    IflagError, ParameterCatalog, ParameterIdMap, ParameterRef, Session, SessionConfig,
    SessionState, Value, ValueKind, WriteOutcome,
};
use rust_decimal::Decimal;
use std::time::Duration;

fn config() -> SessionConfig {
    SessionConfig::default().with_timeout(Duration::from_millis(200))
}

fn corus() -> VirtualDevice {
    DeviceTemplates::corus("FL_b0040").unwrap()
}

async fn signed_on(device: &VirtualDevice, config: SessionConfig) -> Session {
    let mut session = Session::new(device.connect(), config);
    session.startup().await.unwrap();
    session
}

#[tokio::test]
async fn firmware_read_end_to_end() {
    let device = corus();
    let mut session = signed_on(&device, config()).await;

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.ident(), Some("ELS5\\Corus"));
    assert_eq!(session.read_firmware().await.unwrap(), "FL_b0040");
    assert_eq!(session.firmware(), Some("FL_b0040"));

    let report = session.shutdown().await;
    assert!(report.is_clean());
    assert!(report.logoff_sent);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(device.stats().logoffs, 1);
    assert!(!device.is_signed_on());
}

#[tokio::test]
async fn rejected_write_leaves_session_usable() {
    let at = NaiveDate::from_ymd_opt(2019, 10, 17)
        .unwrap()
        .and_hms_opt(13, 0, 0)
        .unwrap();
    let device = corus()
        .with_value(106, ValueKind::Date, &Value::Date(at))
        .unwrap()
        .with_read_only(106)
        .with_parameter(107, vec![0, 0]);
    let mut session = signed_on(&device, config()).await;

    let report = session
        .write_parameters(&[
            (ParameterRef::new(106, ValueKind::Date), Value::Date(at)),
            (ParameterRef::new(107, ValueKind::Word), Value::Word(300)),
        ])
        .await
        .unwrap();

    assert_eq!(report.get(106), Some(WriteOutcome::Rejected { code: NAK }));
    assert_eq!(report.get(107), Some(WriteOutcome::Acknowledged));
    assert!(!report.all_acknowledged());
    assert_eq!(device.parameter(107), Some(300u16.to_le_bytes().to_vec()));
    assert_eq!(device.writes().len(), 1);

    assert_eq!(session.state(), SessionState::Active);
    assert!(session.shutdown().await.is_clean());
}

#[tokio::test]
async fn unencodable_write_sends_nothing() {
    let device = corus().with_parameter(107, vec![0, 0]);
    let mut session = signed_on(&device, config()).await;
    let requests = device.stats().requests;

    let err = session
        .write_parameters(&[
            (ParameterRef::new(107, ValueKind::Word), Value::Word(1)),
            (ParameterRef::new(107, ValueKind::Word), Value::ULong(70_000)),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, IflagError::Codec(_)));
    assert_eq!(device.stats().requests, requests);
}

#[tokio::test]
async fn batch_with_unknown_parameter_keeps_the_others() {
    let device = corus()
        .with_parameter(0x10, 5u16.to_le_bytes().to_vec())
        .with_unavailable(0x11, ValueKind::Word)
        .with_parameter(0x12, 7u32.to_le_bytes().to_vec());
    let mut session = signed_on(&device, config()).await;

    let readout = session
        .read_parameters(&[
            ParameterRef::new(0x10, ValueKind::Word),
            ParameterRef::new(0x11, ValueKind::Word),
            ParameterRef::new(0x12, ValueKind::ULong),
        ])
        .await
        .unwrap();

    assert_eq!(readout.len(), 3);
    assert_eq!(readout.value(0x10), Some(&Value::Word(5)));
    assert_eq!(readout.value(0x12), Some(&Value::ULong(7)));
    assert!(readout.value(0x11).is_none());
    assert_eq!(readout.errors().map(|(id, _)| id).collect::<Vec<_>>(), vec![0x11]);
    assert!(!readout.is_complete());
}

#[tokio::test]
async fn batch_rejected_for_an_absent_id_keeps_the_others() {
    let device = corus()
        .with_parameter(0x10, 5u16.to_le_bytes().to_vec())
        .with_parameter(0x12, 7u32.to_le_bytes().to_vec());
    let mut session = signed_on(&device, config()).await;

    let readout = session
        .read_parameters(&[
            ParameterRef::new(0x10, ValueKind::Word),
            ParameterRef::new(0x11, ValueKind::Word),
            ParameterRef::new(0x12, ValueKind::ULong),
        ])
        .await
        .unwrap();

    assert_eq!(readout.len(), 3);
    assert_eq!(readout.value(0x10), Some(&Value::Word(5)));
    assert_eq!(readout.value(0x12), Some(&Value::ULong(7)));
    assert!(matches!(
        readout.get(0x11),
        Some(Err(ParameterError::UnknownParameter(0x11)))
    ));
    // one batch, then one read per id
    assert_eq!(device.stats().requests, 4);
    assert_eq!(device.stats().naks_sent, 2);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn small_payload_limit_splits_reads() {
    let mut device = corus();
    for id in 0..20u8 {
        device = device.with_parameter(id, u32::from(id).to_le_bytes().to_vec());
    }
    let refs: Vec<ParameterRef> = (0..20u8)
        .map(|id| ParameterRef::new(id, ValueKind::ULong))
        .collect();
    let mut session = signed_on(&device, config().with_max_payload(16)).await;

    let readout = session.read_parameters(&refs).await.unwrap();

    assert!(readout.is_complete());
    assert_eq!(readout.value(19), Some(&Value::ULong(19)));
    assert!(device.stats().requests > 1);
}

#[tokio::test]
async fn corrupted_response_is_a_checksum_error() {
    let device = corus();
    let mut session = signed_on(&device, config()).await;

    device.set_errors(ErrorInjectionConfig {
        corrupt_responses: 1,
        ..ErrorInjectionConfig::default()
    });
    let err = session.read_firmware().await.unwrap_err();
    assert!(matches!(err, IflagError::ChecksumError { .. }));
    assert!(err.is_recoverable());

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.read_firmware().await.unwrap(), "FL_b0040");
}

#[tokio::test]
async fn corrupted_length_byte_is_a_checksum_error() {
    let device = corus();
    let mut session = signed_on(&device, config()).await;

    // 8 becomes 9, so the frame ends one byte early
    device.set_errors(ErrorInjectionConfig {
        corrupt_length: 1,
        ..ErrorInjectionConfig::default()
    });
    let err = session.read_firmware().await.unwrap_err();
    assert!(matches!(err, IflagError::ChecksumError { .. }), "{err:?}");

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.read_firmware().await.unwrap(), "FL_b0040");
}

#[tokio::test]
async fn timeout_during_a_read_keeps_the_session_usable() {
    let device = corus()
        .with_parameter(0x10, 5u16.to_le_bytes().to_vec())
        .with_parameter(0x12, 70_000u32.to_le_bytes().to_vec());
    let mut session = signed_on(&device, config()).await;

    device.set_errors(ErrorInjectionConfig {
        late_responses: 1,
        ..ErrorInjectionConfig::default()
    });
    let err = session
        .read_parameters(&[ParameterRef::new(0x10, ValueKind::Word)])
        .await
        .unwrap_err();
    assert!(matches!(err, IflagError::TransportTimeout(_)), "{err:?}");
    assert!(err.is_recoverable());
    assert_eq!(session.state(), SessionState::Active);

    // The late reply to the first read is on the link by now and must not
    // be taken as the answer to this one
    let readout = session
        .read_parameters(&[ParameterRef::new(0x12, ValueKind::ULong)])
        .await
        .unwrap();
    assert_eq!(readout.value(0x12), Some(&Value::ULong(70_000)));

    let readout = session
        .read_parameters(&[ParameterRef::new(0x10, ValueKind::Word)])
        .await
        .unwrap();
    assert_eq!(readout.value(0x10), Some(&Value::Word(5)));
    assert!(session.shutdown().await.is_clean());
}

#[tokio::test]
async fn operations_require_an_active_session() {
    let device = corus();
    let mut session = Session::new(device.connect(), config());

    let err = session.read_firmware().await.unwrap_err();
    assert!(matches!(err, IflagError::SessionNotActive(SessionState::Idle)));
    assert_eq!(device.stats().bytes_received, 0);

    session.startup().await.unwrap();
    session.shutdown().await;

    let err = session
        .read_parameters(&[ParameterRef::firmware()])
        .await
        .unwrap_err();
    assert!(matches!(err, IflagError::SessionNotActive(SessionState::Closed)));
    assert!(matches!(
        session.startup().await,
        Err(IflagError::SessionNotActive(SessionState::Closed))
    ));
}

#[tokio::test]
async fn silent_device_fails_handshake_and_allows_retry() {
    let device = corus().with_errors(ErrorInjectionConfig {
        silent: true,
        ..ErrorInjectionConfig::default()
    });
    let mut session = Session::new(device.connect(), config());

    let err = session.startup().await.unwrap_err();
    assert!(matches!(err, IflagError::HandshakeFailed(_)));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.history().iter().any(|t| t.error.is_some()));

    device.set_errors(ErrorInjectionConfig::default());
    session.startup().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(device.stats().sign_ons, 1);
}

#[tokio::test]
async fn rejected_sign_on_is_a_handshake_failure() {
    let device = corus().with_errors(ErrorInjectionConfig {
        reject_sign_on: true,
        ..ErrorInjectionConfig::default()
    });
    let mut session = Session::new(device.connect(), config());

    assert!(matches!(
        session.startup().await,
        Err(IflagError::HandshakeFailed(_))
    ));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn names_resolve_through_the_firmware_catalog() {
    let catalog = ParameterCatalog::new().with(
        "FL_b0040",
        ParameterIdMap::new()
            .with("input_pulse_weight", ParameterRef::new(0x22, ValueKind::Float3))
            .with("index_unconverted", ParameterRef::new(0x2A, ValueKind::Index)),
    );
    let device = corus()
        .with_value(0x22, ValueKind::Float3, &Value::Float3(Decimal::new(1, 1)))
        .unwrap()
        .with_value(0x2A, ValueKind::Index, &Value::Index(Decimal::new(117_967, 1)))
        .unwrap();
    let mut session = signed_on(&device, config().with_catalog(catalog)).await;

    let readout = session
        .read_parameters_by_name(&["index_unconverted", "input_pulse_weight"])
        .await
        .unwrap();
    assert_eq!(
        readout.get_by_name("input_pulse_weight"),
        Some(&Ok(Value::Float3(Decimal::new(1, 1))))
    );
    assert_eq!(
        readout.get_by_name("index_unconverted"),
        Some(&Ok(Value::Index(Decimal::new(117_967, 1))))
    );

    let err = session.read_parameters_by_name(&["nope"]).await.unwrap_err();
    assert!(matches!(err, IflagError::UnknownParameterName(name) if name == "nope"));

    // the map is cached after the first lookup
    let requests = device.stats().requests;
    session.read_parameter_id_map(false).await.unwrap();
    assert_eq!(device.stats().requests, requests);
    session.read_parameter_id_map(true).await.unwrap();
    assert_eq!(device.stats().requests, requests + 1);
}

#[tokio::test]
async fn unknown_firmware_has_no_id_map() {
    let device = DeviceTemplates::corus("FL_x9999").unwrap();
    let mut session = signed_on(&device, config()).await;

    let err = session.read_parameter_id_map(false).await.unwrap_err();
    assert!(matches!(err, IflagError::UnknownFirmware(fw) if fw == "FL_x9999"));
}

#[tokio::test]
async fn dropping_an_active_session_logs_off() {
    let device = corus();
    let session = signed_on(&device, config()).await;
    drop(session);

    for _ in 0..50 {
        if device.stats().logoffs == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(device.stats().logoffs, 1);
}
