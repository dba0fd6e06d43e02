use crate::harness::{spawn_server, ScriptProject};
use kiln_remote::mock::MockRemote;
use kiln_remote::{
    ExitedEvent, OutputEvent, RemoteEvent, RemoteMethod, StoppedEvent, TerminatedEvent,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn session(id: &str) -> Option<String> {
    Some(id.to_owned())
}

fn output(session_id: Option<String>, category: Option<&str>, text: &str) -> RemoteEvent {
    RemoteEvent::Output(OutputEvent {
        session_id,
        category: category.map(str::to_owned),
        output: text.to_owned(),
    })
}

#[tokio::test]
async fn stopped_events_report_the_single_thread() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    remote.emit(RemoteEvent::Stopped(StoppedEvent {
        session_id: session("session-1"),
        reason: "breakpoint".to_owned(),
        description: Some("Paused on breakpoint".to_owned()),
        text: None,
        breakpoint_ids: vec![101],
    }));

    let event = client.wait_for_event("stopped").await;
    assert_eq!(
        event["body"],
        json!({
            "reason": "breakpoint",
            "threadId": 1,
            "allThreadsStopped": true,
            "description": "Paused on breakpoint",
            "hitBreakpointIds": [101]
        })
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn output_keeps_its_category_or_defaults_to_console() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "print 'hi'\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    remote.emit(output(session("session-1"), Some("stderr"), "Traceback\n"));
    let event = client.wait_for_event("output").await;
    assert_eq!(event["body"], json!({ "category": "stderr", "output": "Traceback\n" }));

    remote.emit(output(session("session-1"), None, "hi\n"));
    let event = client.wait_for_event("output").await;
    assert_eq!(event["body"], json!({ "category": "console", "output": "hi\n" }));

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn exit_is_followed_by_terminated_and_ends_the_session() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    remote.emit(RemoteEvent::Exited(ExitedEvent {
        session_id: session("session-1"),
        exit_code: 3,
    }));

    let exited = client.wait_for_event("exited").await;
    assert_eq!(exited["body"], json!({ "exitCode": 3 }));
    client.wait_for_event("terminated").await;

    let transcript = client.transcript();
    let position = |name: &str| {
        transcript
            .iter()
            .position(|msg| msg["type"] == "event" && msg["event"] == name)
            .unwrap()
    };
    assert!(position("exited") < position("terminated"));

    let resp = client.request("next", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["message"], "No active debug session");

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn events_for_other_sessions_are_ignored() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    remote.emit(RemoteEvent::Stopped(StoppedEvent {
        session_id: session("session-99"),
        reason: "breakpoint".to_owned(),
        description: None,
        text: None,
        breakpoint_ids: Vec::new(),
    }));
    remote.emit(RemoteEvent::Terminated(TerminatedEvent {
        session_id: session("session-99"),
    }));
    remote.emit(output(session("session-1"), None, "still here\n"));

    // Events are relayed in order, so the marker proves the strays were dropped.
    let marker = client.wait_for_event("output").await;
    assert_eq!(marker["body"]["output"], "still here\n");
    assert!(!client.saw_event("stopped"));
    assert!(!client.saw_event("terminated"));

    let resp = client.request("pause", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], true);
    assert_eq!(
        remote.calls_to(RemoteMethod::Pause),
        vec![json!({ "sessionId": "session-1" })]
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn events_without_a_session_id_belong_to_the_active_session() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    remote.emit(RemoteEvent::Terminated(TerminatedEvent { session_id: None }));
    client.wait_for_event("terminated").await;

    // Nothing is relayed once the session is over.
    remote.emit(output(None, None, "late\n"));
    remote.emit(output(session("session-1"), None, "late\n"));
    let resp = client.request("threads", json!({})).await;
    assert_eq!(resp["success"], true);
    assert!(!client.saw_event("output"));

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
