//! Association establishment over the wrapper transport

mod common;

use common::{spawn_meter, MeterConfig, LOCALHOST};
use cosem_application::AttributeDescriptor;
use cosem_asn1::{AareApdu, AarqApdu, SourceDiagnostic};
use cosem_client::DlmsConnection;
use cosem_core::{CosemError, DlmsData, ObisCode};
use cosem_security::constants::CONTEXT_LN_NO_CIPHER;

fn meter_objects() -> Vec<(u16, ObisCode, i8, DlmsData)> {
    vec![
        (
            1,
            ObisCode::new(0, 0, 96, 1, 0, 255),
            2,
            DlmsData::OctetString(b"74512095".to_vec()),
        ),
        (
            3,
            ObisCode::new(1, 0, 1, 8, 0, 255),
            2,
            DlmsData::Unsigned32(118_216),
        ),
    ]
}

#[tokio::test]
async fn lowest_level_connect_and_get() {
    let mut config = MeterConfig::new(0x0001, 0x0001);
    config.objects = meter_objects();
    let (address, meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let aconn = conn.app_connect_lowest_level(1, 1).await.unwrap();

    let serial = aconn
        .get(
            AttributeDescriptor::new(1, ObisCode::new(0, 0, 96, 1, 0, 255), 2),
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        serial.into_data().unwrap(),
        DlmsData::OctetString(b"74512095".to_vec())
    );

    let energy = aconn
        .get(
            AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2),
            None,
        )
        .await
        .unwrap();
    assert_eq!(energy.into_data().unwrap(), DlmsData::Unsigned32(118_216));

    aconn.close().await.unwrap();
    meter.await.unwrap();
}

#[tokio::test]
async fn get_list_preserves_partial_success() {
    let mut config = MeterConfig::new(0x0001, 0x0001);
    config.objects = meter_objects();
    let (address, _meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let aconn = conn.app_connect_lowest_level(1, 1).await.unwrap();

    let results = aconn
        .get_list(vec![
            (
                AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2),
                None,
            ),
            (
                AttributeDescriptor::new(3, ObisCode::new(1, 0, 2, 8, 0, 255), 2),
                None,
            ),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].access_result, 0);
    assert_eq!(
        results[0].clone().into_data().unwrap(),
        DlmsData::Unsigned32(118_216)
    );
    assert_eq!(results[1].access_result, 1);
    assert!(results[1].data.is_none());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn set_updates_the_meter() {
    let mut config = MeterConfig::new(0x0001, 0x0001);
    config.objects = meter_objects();
    let (address, _meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let aconn = conn.app_connect_lowest_level(1, 1).await.unwrap();

    let attribute = AttributeDescriptor::new(1, ObisCode::new(0, 0, 96, 1, 0, 255), 2);
    let access_result = aconn
        .set(
            attribute.clone(),
            None,
            DlmsData::OctetString(b"00000042".to_vec()),
        )
        .await
        .unwrap();
    assert_eq!(access_result, 0);

    let read_back = aconn.get(attribute, None).await.unwrap();
    assert_eq!(
        read_back.into_data().unwrap(),
        DlmsData::OctetString(b"00000042".to_vec())
    );

    conn.close().await.unwrap();
}

#[tokio::test]
async fn rejected_association_leaves_the_connection_open() {
    let mut config = MeterConfig::new(0x0001, 0x0001);
    config.reject_result = Some(1);
    let (address, _meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let error = conn.app_connect_lowest_level(1, 1).await.unwrap_err();
    assert!(matches!(
        error,
        CosemError::AssociationRejected { result: 1, .. }
    ));

    // The transport stays usable; only an explicit close tears it down.
    assert!(!conn.is_closed().await);
    conn.close().await.unwrap();
    assert!(conn.is_closed().await);
    // Closing again is a no-op.
    conn.close().await.unwrap();
}

#[tokio::test]
async fn low_level_connect_sends_the_password() {
    let mut config = MeterConfig::new(0x0001, 0x0001);
    config.objects = meter_objects();
    let (address, _meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let aconn = conn.app_connect_low_level(1, 1, b"12345678").await.unwrap();

    let serial = aconn
        .get(
            AttributeDescriptor::new(1, ObisCode::new(0, 0, 96, 1, 0, 255), 2),
            None,
        )
        .await
        .unwrap();
    assert_eq!(serial.access_result, 0);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn raw_association_compares_the_reply() {
    let config = MeterConfig::new(0x0001, 0x0001);
    let (address, _meter) = spawn_meter(config).await;

    let aarq = AarqApdu {
        application_context_name: CONTEXT_LN_NO_CIPHER.to_vec(),
        ..AarqApdu::default()
    };
    // The harness echoes the context and accepts without authentication.
    let expected_aare = AareApdu {
        application_context_name: CONTEXT_LN_NO_CIPHER.to_vec(),
        result: 0,
        result_source_diagnostic: SourceDiagnostic { tag: 1, value: 0 },
        responding_ap_title: None,
        mechanism_name: None,
        responding_authentication_value: None,
        user_information: None,
    };

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    conn.app_connect_raw(
        1,
        1,
        &aarq.encode().unwrap(),
        &expected_aare.encode().unwrap(),
    )
    .await
    .unwrap();

    conn.close().await.unwrap();
}
