//! HLS-5 (GMAC) association and ciphered traffic

mod common;

use common::{spawn_meter, MeterConfig, MeterSecurity, LOCALHOST};
use cosem_application::AttributeDescriptor;
use cosem_client::{DlmsConnection, Hls5Settings};
use cosem_core::{CosemError, DlmsData, ObisCode};

const CLIENT_TITLE: [u8; 8] = [0x4D, 0x45, 0x4C, 0x00, 0x00, 0x00, 0x00, 0x01];

fn secure_meter() -> MeterConfig {
    let mut config = MeterConfig::new(0x0001, 0x0001);
    config.security = Some(MeterSecurity::default());
    config.objects = vec![
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
            DlmsData::Unsigned32(990_017),
        ),
    ];
    config
}

fn client_settings() -> Hls5Settings {
    Hls5Settings::new(
        vec![0u8; 16],
        vec![0u8; 16],
        CLIENT_TITLE,
        b")HB+0F04".to_vec(),
    )
}

#[tokio::test]
async fn hls5_association_and_ciphered_exchange() {
    let (address, _meter) = spawn_meter(secure_meter()).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let (aconn, initiate_response) = conn
        .app_connect_hls5(1, 1, client_settings())
        .await
        .unwrap();
    assert_eq!(initiate_response.server_max_receive_pdu_size, 1024);

    // Everything from here on is glo-ciphered in both directions.
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

    let attribute = AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
    let access_result = aconn
        .set(attribute.clone(), None, DlmsData::Unsigned32(990_018))
        .await
        .unwrap();
    assert_eq!(access_result, 0);

    let read_back = aconn.get(attribute, None).await.unwrap();
    assert_eq!(read_back.into_data().unwrap(), DlmsData::Unsigned32(990_018));

    aconn.close().await.unwrap();
}

#[tokio::test]
async fn wrong_key_length_is_rejected_before_any_traffic() {
    let mut settings = client_settings();
    settings.authentication_key = vec![0u8; 12];
    let (address, _meter) = spawn_meter(secure_meter()).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let error = conn.app_connect_hls5(1, 1, settings).await.unwrap_err();
    assert!(matches!(error, CosemError::Config(_)));
}

#[tokio::test]
async fn short_challenge_is_rejected() {
    let (address, _meter) = spawn_meter(secure_meter()).await;
    let mut settings = client_settings();
    settings.client_to_server_challenge = b"short".to_vec();

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let error = conn.app_connect_hls5(1, 1, settings).await.unwrap_err();
    assert!(matches!(error, CosemError::Config(_)));
}

#[tokio::test]
async fn mechanism_mismatch_closes_the_connection() {
    let mut config = secure_meter();
    // Meter comes back claiming low level security.
    config.mechanism_override = Some(vec![2, 16, 756, 5, 8, 2, 1]);
    let (address, _meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let error = conn
        .app_connect_hls5(1, 1, client_settings())
        .await
        .unwrap_err();
    match error {
        CosemError::Security(reason) => assert!(reason.contains("mechanism mismatch")),
        other => panic!("expected a security error, got {:?}", other),
    }
    assert!(conn.is_closed().await);
}

#[tokio::test]
async fn rejected_secure_association_leaves_the_connection_open() {
    let mut config = secure_meter();
    config.reject_result = Some(1);
    let (address, _meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let error = conn
        .app_connect_hls5(1, 1, client_settings())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CosemError::AssociationRejected { result: 1, .. }
    ));
    assert!(!conn.is_closed().await);
}

#[tokio::test]
async fn bad_server_challenge_tag_fails_authentication() {
    let mut config = secure_meter();
    config.corrupt_challenge_reply = true;
    let (address, _meter) = spawn_meter(config).await;

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let error = conn
        .app_connect_hls5(1, 1, client_settings())
        .await
        .unwrap_err();
    assert!(matches!(error, CosemError::Authentication(_)));
    assert!(conn.is_closed().await);
}

#[tokio::test]
async fn wrong_authentication_key_is_caught_by_the_meter() {
    let (address, _meter) = spawn_meter(secure_meter()).await;
    let mut settings = client_settings();
    settings.authentication_key = vec![1u8; 16];

    let conn = DlmsConnection::tcp_connect(LOCALHOST, address.port())
        .await
        .unwrap();
    let error = conn
        .app_connect_hls5(1, 1, settings)
        .await
        .unwrap_err();
    // The AARE's ciphered initiate-response does not authenticate under
    // the wrong AK.
    assert!(matches!(error, CosemError::Authentication(_)));
}
