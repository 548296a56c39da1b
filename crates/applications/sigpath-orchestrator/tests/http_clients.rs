//! Wire-level tests for the HTTP collaborator clients

use serde_json::json;
use sigpath_core::{ApiError, BroadcasterApi, ControlApi, DirectoryApi, RedirectFlags, SourceId};
use sigpath_orchestrator::config::{BroadcasterConfig, ControlConfig, DirectoryConfig};
use sigpath_orchestrator::{Credentials, HttpBroadcaster, HttpControl, HttpDirectory};
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn broadcaster(server: &MockServer) -> HttpBroadcaster {
    let config = BroadcasterConfig {
        timeout_secs: 1,
        ..BroadcasterConfig::new("127.0.0.1")
    };
    HttpBroadcaster::with_base_url(
        "127.0.0.1",
        format!("{}/zixi", server.uri()),
        server.uri(),
        &config,
        &Credentials::new("user", "pass"),
    )
    .unwrap()
}

fn control(base_url: String) -> HttpControl {
    HttpControl::new(&ControlConfig {
        base_url,
        zone: "us-east4-a".to_string(),
        project: "encoders".to_string(),
        timeout_secs: 1,
    })
    .unwrap()
}

#[tokio::test]
async fn test_list_outputs_sends_auth_and_parses() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zixi/outputs.json"))
        .and(query_param("complete", "1"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "outputs": [
                {"id": "out-1", "name": "K4015_FOX4K_UHD", "stream_id": "K4015_FOX4K_SRC"},
                {"id": "out-2", "name": "K4020_CBS4K_UHD"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outputs = broadcaster(&server).list_outputs().await.unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].id, "out-1");
    assert_eq!(outputs[0].stream_id, "K4015_FOX4K_SRC");
    assert_eq!(outputs[1].stream_id, "");
}

#[tokio::test]
async fn test_list_streams() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zixi/streams.json"))
        .and(query_param("complete", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "streams": [{"id": "M2005_NFLNAL1_NFL_SES_PRI"}, {"id": "M2015_NFLNAL2_NFL_SES_PRI"}]
        })))
        .mount(&server)
        .await;

    let streams = broadcaster(&server).list_streams().await.unwrap();
    assert_eq!(streams[1].id, "M2015_NFLNAL2_NFL_SES_PRI");
}

#[tokio::test]
async fn test_seamless_redirect_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zixi/redirect_client.json"))
        .and(query_param("id", "out-1"))
        .and(query_param("stream", "K4015_FOX4K_SRC"))
        .and(query_param("update-remote", "1"))
        .and(query_param("seamless", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    broadcaster(&server)
        .redirect("out-1", "K4015_FOX4K_SRC", RedirectFlags::SEAMLESS)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_edit_output_toggles() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zixi/edit_output.json"))
        .and(query_param("id", "out-1"))
        .and(query_param("on", "0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    broadcaster(&server).set_output_enabled("out-1", false).await.unwrap();
}

#[tokio::test]
async fn test_broadcaster_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zixi/outputs.json"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = broadcaster(&server).list_outputs().await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_broadcaster_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zixi/streams.json"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let err = broadcaster(&server).list_streams().await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout { .. }));
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_control_status_and_service_calls() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/jane/gcpistatus"))
        .and(query_param("instance", "titan-east-01"))
        .and(query_param("zone", "us-east4-a"))
        .and(query_param("project", "encoders"))
        .and(body_string(""))
        .respond_with(ResponseTemplate::new(200).set_body_string("RUNNING"))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/jane/start"))
        .and(query_param("sid", "K4015"))
        .and(query_param("ip", "10.1.1.1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("started"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/jane/plant_pid_map"))
        .and(query_param("sid", "K4015"))
        .and(query_param("thumbs", "FALSE"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = control(format!("{}/jane/", server.uri()));
    let sid = SourceId::new("k4015");

    assert_eq!(client.vm_status("titan-east-01").await.unwrap(), "RUNNING");
    assert_eq!(client.start_service(&sid, "10.1.1.1").await.unwrap(), "started");
    client.reprobe(&sid).await.unwrap();
}

#[tokio::test]
async fn test_control_segment_answer_is_returned() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/jane/cmafsegment"))
        .and(query_param("sid", "K4020"))
        .and(query_param("ip", "10.1.1.2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Segment names updated successfully"))
        .mount(&server)
        .await;

    let client = control(format!("{}/jane", server.uri()));
    let answer = client
        .rename_segment(&SourceId::new("K4020"), "10.1.1.2")
        .await
        .unwrap();
    assert!(answer.contains("successfully"));
}

#[tokio::test]
async fn test_control_unreachable_is_transport_error() {
    let client = control("http://127.0.0.1:1/jane".to_string());
    let err = client.stop_vm("titan-east-01").await.unwrap_err();
    assert!(err.is_transport());
    assert!(err.endpoint().ends_with("/jane/stopgcpi"));
}

#[tokio::test]
async fn test_directory_lookup() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/services/devices"))
        .and(query_param("source_id", "K4015"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "service": "FOX4K",
            "devices": [
                {"role": "receiver", "name": "rx-east-01", "public_ip": "10.9.9.9"},
                {"role": "encoder", "name": "titan-east-01", "public_ip": "10.1.1.1"}
            ]
        }])))
        .mount(&server)
        .await;

    let directory = HttpDirectory::new(&DirectoryConfig {
        base_url: format!("{}/api/v2/services", server.uri()),
        facility_filter: vec!["east".to_string()],
        timeout_secs: 1,
    })
    .unwrap();

    let records = directory.lookup(&SourceId::new("K4015")).await.unwrap();
    assert_eq!(records[0].service, "FOX4K");
    assert_eq!(records[0].devices[1].name, "titan-east-01");
}
