use crate::harness::{spawn_server, ScriptProject};
use kiln_remote::mock::MockRemote;
use kiln_remote::{RemoteError, RemoteEvent, RemoteMethod, StoppedEvent};
use pretty_assertions::assert_eq;
use serde_json::json;

fn stop_at_breakpoint(remote: &MockRemote) {
    remote.emit(RemoteEvent::Stopped(StoppedEvent {
        session_id: Some("session-1".to_owned()),
        reason: "breakpoint".to_owned(),
        description: None,
        text: None,
        breakpoint_ids: vec![100],
    }));
}

#[tokio::test]
async fn terminate_stops_the_remote_session_and_clears_state() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.set_breakpoints(&program, json!([{ "line": 1 }])).await;
    client.start(&program).await;
    stop_at_breakpoint(&remote);
    client.wait_for_event("stopped").await;

    let terminate_seq = client.send_request("terminate", json!({})).await;
    let resp = client.wait_for_response(terminate_seq).await;
    assert_eq!(resp["success"], true);
    client.wait_for_event("terminated").await;

    let transcript = client.transcript();
    let response_at = transcript
        .iter()
        .position(|msg| msg["type"] == "response" && msg["request_seq"] == terminate_seq)
        .unwrap();
    let terminated_at = transcript
        .iter()
        .position(|msg| msg["type"] == "event" && msg["event"] == "terminated")
        .unwrap();
    assert!(response_at < terminated_at);

    assert_eq!(
        remote.calls_to(RemoteMethod::StopSession),
        vec![json!({ "sessionId": "session-1" })]
    );

    let eval = client.request("evaluate", json!({ "expression": "x" })).await;
    assert_eq!(eval["message"], "No active debug session");

    // Breakpoints went with the session: a new launch binds nothing.
    client.launch_program(&program).await;
    client.configuration_done().await;
    assert_eq!(remote.calls_to(RemoteMethod::SetBreakpoints).len(), 1);
    assert_eq!(
        remote.calls_to(RemoteMethod::Run),
        vec![json!({ "sessionId": "session-1" }), json!({ "sessionId": "session-2" })]
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_session_failures_are_swallowed() {
    let remote = MockRemote::new();
    remote.reply_with(RemoteMethod::StopSession, Err(RemoteError::ConnectionClosed));
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    let resp = client.request("terminate", json!({})).await;
    assert_eq!(resp["success"], true, "{resp}");
    client.wait_for_event("terminated").await;

    let resp = client.disconnect().await;
    assert_eq!(resp["success"], true);
    server_task.await.unwrap().unwrap();
    assert_eq!(remote.calls_to(RemoteMethod::StopSession).len(), 1);
}

#[tokio::test]
async fn disconnect_ends_the_session_and_the_server() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    let resp = client
        .request("disconnect", json!({ "terminateDebuggee": true }))
        .await;
    assert_eq!(resp["success"], true);

    server_task.await.unwrap().unwrap();
    assert_eq!(
        remote.calls_to(RemoteMethod::StopSession),
        vec![json!({ "sessionId": "session-1" })]
    );
}

#[tokio::test]
async fn disconnect_without_a_session_contacts_nobody() {
    let remote = MockRemote::new();
    let (client, server_task) = spawn_server(remote.clone());

    client.initialize_handshake().await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn disconnect_during_launch_stops_the_orphaned_session() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    let hold = remote.hold(RemoteMethod::StartSession);
    let launch_seq = client
        .send_request("launch", json!({ "program": program }))
        .await;
    remote.wait_for_calls(RemoteMethod::StartSession, 1).await;

    let resp = client.disconnect().await;
    assert_eq!(resp["success"], true);
    assert!(remote.calls_to(RemoteMethod::StopSession).is_empty());

    hold.release();
    let launch = client.wait_for_response(launch_seq).await;
    assert_eq!(launch["success"], false);
    server_task.await.unwrap().unwrap();

    assert_eq!(
        remote.calls_to(RemoteMethod::StopSession),
        vec![json!({ "sessionId": "session-1" })]
    );
    assert!(remote.calls_to(RemoteMethod::Run).is_empty());
}

#[tokio::test]
async fn closing_the_stream_ends_the_session() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    drop(client);

    server_task.await.unwrap().unwrap();
    assert_eq!(remote.calls_to(RemoteMethod::StopSession).len(), 1);
}

#[tokio::test]
async fn configuration_done_of_a_reset_launch_does_not_carry_over() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    let hold = remote.hold(RemoteMethod::StartSession);
    let launch_seq = client
        .send_request("launch", json!({ "program": program }))
        .await;
    remote.wait_for_calls(RemoteMethod::StartSession, 1).await;
    let done_seq = client.send_request("configurationDone", json!({})).await;

    let resp = client.request("terminate", json!({})).await;
    assert_eq!(resp["success"], true);
    let done = client.wait_for_response(done_seq).await;
    assert_eq!(done["success"], true);

    hold.release();
    let launch = client.wait_for_response(launch_seq).await;
    assert_eq!(launch["success"], false);
    remote.wait_for_calls(RemoteMethod::StopSession, 1).await;

    // A fresh launch waits for its own configurationDone before running.
    client.launch_program(&program).await;
    client.set_breakpoints(&program, json!([{ "line": 1 }])).await;
    client.configuration_done().await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();

    assert_eq!(
        remote.calls_to(RemoteMethod::Run),
        vec![json!({ "sessionId": "session-2" })]
    );
    let methods = remote.methods();
    let bind_at = methods
        .iter()
        .position(|m| *m == RemoteMethod::SetBreakpoints)
        .unwrap();
    let run_at = methods.iter().position(|m| *m == RemoteMethod::Run).unwrap();
    assert!(bind_at < run_at, "{methods:?}");
}
