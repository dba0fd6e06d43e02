use crate::harness::{spawn_server, ScriptProject};
use kiln_remote::mock::MockRemote;
use kiln_remote::{RemoteError, RemoteEvent, RemoteMethod, StoppedEvent};
use pretty_assertions::assert_eq;
use serde_json::json;

fn stopped(reason: &str) -> RemoteEvent {
    RemoteEvent::Stopped(StoppedEvent {
        session_id: Some("session-1".to_owned()),
        reason: reason.to_owned(),
        description: None,
        text: None,
        breakpoint_ids: Vec::new(),
    })
}

#[tokio::test]
async fn stepping_without_a_session_is_an_error() {
    let remote = MockRemote::new();
    let (client, server_task) = spawn_server(remote.clone());

    for command in ["continue", "next", "stepIn", "stepOut", "pause"] {
        let resp = client.request(command, json!({ "threadId": 1 })).await;
        assert_eq!(resp["success"], false, "{command}");
        assert_eq!(resp["message"], "No active debug session", "{command}");
    }
    assert!(remote.calls().is_empty());

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn each_control_request_maps_to_its_remote_command() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    remote.emit(stopped("breakpoint"));
    client.wait_for_event("stopped").await;

    for command in ["next", "stepIn", "stepOut", "pause"] {
        let resp = client.request(command, json!({ "threadId": 1 })).await;
        assert_eq!(resp["success"], true, "{command}: {resp}");
    }
    let resp = client.request("continue", json!({ "threadId": 1 })).await;
    assert_eq!(resp["body"], json!({ "allThreadsContinued": true }));

    let controls: Vec<RemoteMethod> = remote
        .methods()
        .into_iter()
        .filter(|method| {
            !matches!(
                method,
                RemoteMethod::StartSession | RemoteMethod::Run | RemoteMethod::SetBreakpoints
            )
        })
        .collect();
    assert_eq!(
        controls,
        vec![
            RemoteMethod::StepOver,
            RemoteMethod::StepInto,
            RemoteMethod::StepOut,
            RemoteMethod::Pause,
            RemoteMethod::Continue,
        ]
    );
    for params in remote.calls_to(RemoteMethod::StepOver) {
        assert_eq!(params, json!({ "sessionId": "session-1" }));
    }

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_steps_carry_the_remote_message() {
    let remote = MockRemote::new();
    remote.reply_once(
        RemoteMethod::StepInto,
        Err(RemoteError::rejected("Cannot step into native code")),
    );
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    remote.emit(stopped("step"));
    client.wait_for_event("stopped").await;

    let resp = client.request("stepIn", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["message"], "Cannot step into native code");

    // Still stopped with the same session: a retry goes out under the same id.
    let resp = client.request("stepIn", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], true);
    assert_eq!(
        remote.calls_to(RemoteMethod::StepInto),
        vec![json!({ "sessionId": "session-1" }); 2]
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn pause_resume_cycles_keep_the_session() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "while True: pass\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    for _ in 0..3 {
        let resp = client.request("pause", json!({ "threadId": 1 })).await;
        assert_eq!(resp["success"], true);
        remote.emit(stopped("pause"));
        let event = client.wait_for_event("stopped").await;
        assert_eq!(event["body"]["reason"], "pause");
        let resp = client.request("continue", json!({ "threadId": 1 })).await;
        assert_eq!(resp["success"], true);
    }

    let sessions: Vec<_> = remote
        .calls_to(RemoteMethod::Continue)
        .into_iter()
        .map(|params| params["sessionId"].clone())
        .collect();
    assert_eq!(sessions, vec![json!("session-1"); 3]);

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
