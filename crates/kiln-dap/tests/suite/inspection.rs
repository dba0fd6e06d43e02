use crate::harness::{spawn_server, ScriptProject};
use kiln_remote::mock::MockRemote;
use kiln_remote::{RemoteError, RemoteMethod};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn inspection_without_a_session_degrades_safely() {
    let remote = MockRemote::new();
    let (client, server_task) = spawn_server(remote.clone());

    let resp = client.request("stackTrace", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["body"]["stackFrames"], json!([]));

    let resp = client.request("scopes", json!({ "frameId": 1 })).await;
    assert_eq!(resp["body"]["scopes"], json!([]));

    let resp = client
        .request("variables", json!({ "variablesReference": 5 }))
        .await;
    assert_eq!(resp["body"]["variables"], json!([]));

    let resp = client.request("evaluate", json!({ "expression": "x" })).await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["message"], "No active debug session");

    assert!(remote.calls().is_empty());
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stack_frames_are_relayed_with_sources() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Main", "import Shared.Util\n");
    let util = project.module("Shared.Util", "def f():\n    pass\n");
    remote.reply_with(
        RemoteMethod::GetStackTrace,
        Ok(json!({
            "stackFrames": [
                { "id": 1001, "name": "f", "line": 2, "modulePath": "Shared.Util" },
                { "id": 1000, "name": "<module>", "line": 1, "column": 3, "filePath": program, "modulePath": "Main" }
            ],
            "totalFrames": 7
        })),
    );
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    let resp = client
        .request("stackTrace", json!({ "threadId": 1, "startFrame": 0, "levels": 2 }))
        .await;
    assert_eq!(resp["success"], true, "{resp}");

    let frames = resp["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(frames[0]["id"], 1001);
    assert_eq!(frames[0]["column"], 1);
    assert_eq!(frames[0]["source"]["name"], "Shared.Util");
    assert_eq!(frames[0]["source"]["path"], util.as_str());
    assert_eq!(frames[1]["column"], 3);
    assert_eq!(frames[1]["source"]["path"], program.as_str());
    assert_eq!(resp["body"]["totalFrames"], 7);

    let params = &remote.calls_to(RemoteMethod::GetStackTrace)[0];
    assert_eq!(
        *params,
        json!({ "sessionId": "session-1", "startFrame": 0, "levels": 2 })
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn scope_and_variable_references_pass_through() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = [1, 2]\n");
    remote.reply_with(
        RemoteMethod::GetScopes,
        Ok(json!({ "scopes": [{ "name": "Locals", "variablesReference": 4242 }] })),
    );
    remote.respond_with(RemoteMethod::GetVariables, |params| {
        Ok(json!({ "variables": [{
            "name": "x",
            "value": "[1, 2]",
            "type": "list",
            "variablesReference": params["variablesReference"].as_i64().unwrap_or(0) + 1,
            "indexedVariables": 2
        }] }))
    });
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    let scopes = client.request("scopes", json!({ "frameId": 1001 })).await;
    assert_eq!(
        scopes["body"]["scopes"],
        json!([{ "name": "Locals", "variablesReference": 4242, "expensive": false }])
    );
    assert_eq!(
        remote.calls_to(RemoteMethod::GetScopes)[0],
        json!({ "sessionId": "session-1", "frameId": 1001 })
    );

    let vars = client
        .request("variables", json!({ "variablesReference": 4242 }))
        .await;
    let x = &vars["body"]["variables"][0];
    assert_eq!(x["variablesReference"], 4243);
    assert_eq!(x["type"], "list");
    assert_eq!(x["indexedVariables"], 2);
    assert_eq!(
        remote.calls_to(RemoteMethod::GetVariables)[0]["variablesReference"],
        4242
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn evaluate_failure_is_surfaced_but_stack_trace_failure_is_not() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    remote.reply_with(
        RemoteMethod::Evaluate,
        Err(RemoteError::rejected("Unknown frame id 999")),
    );
    remote.reply_with(
        RemoteMethod::GetStackTrace,
        Err(RemoteError::rejected("Unknown frame id 999")),
    );
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    let eval = client
        .request("evaluate", json!({ "expression": "x", "frameId": 999, "context": "hover" }))
        .await;
    assert_eq!(eval["success"], false);
    assert_eq!(eval["message"], "Unknown frame id 999");
    assert_eq!(
        remote.calls_to(RemoteMethod::Evaluate)[0],
        json!({ "sessionId": "session-1", "expression": "x", "frameId": 999, "context": "hover" })
    );

    let frames = client.request("stackTrace", json!({ "threadId": 1 })).await;
    assert_eq!(frames["success"], true);
    assert_eq!(frames["body"]["stackFrames"], json!([]));

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn evaluate_results_are_reshaped() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    remote.reply_with(
        RemoteMethod::Evaluate,
        Ok(json!({ "result": "{'a': 1}", "type": "dict", "variablesReference": 77 })),
    );
    let (client, server_task) = spawn_server(remote);

    client.start(&program).await;
    let eval = client
        .request("evaluate", json!({ "expression": "d", "frameId": 1 }))
        .await;
    assert_eq!(
        eval["body"],
        json!({ "result": "{'a': 1}", "type": "dict", "variablesReference": 77 })
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn console_frames_point_at_the_virtual_source() {
    let remote = MockRemote::new();
    remote.reply_with(
        RemoteMethod::GetStackTrace,
        Ok(json!({ "stackFrames": [{ "id": 1, "name": "<module>", "line": 2 }] })),
    );
    let (client, server_task) = spawn_server(remote);

    client
        .launch(json!({ "isConsoleDebug": true, "consoleCode": "a = 1\nb = 2\n" }))
        .await;
    client.configuration_done().await;

    let resp = client.request("stackTrace", json!({ "threadId": 1 })).await;
    let source = &resp["body"]["stackFrames"][0]["source"];
    assert_eq!(*source, json!({ "name": "<console>", "sourceReference": 1 }));
    assert_eq!(resp["body"]["totalFrames"], 1);

    let content = client
        .request("source", json!({ "source": source, "sourceReference": 1 }))
        .await;
    assert_eq!(content["body"]["content"], "a = 1\nb = 2\n");

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn slow_remote_calls_do_not_block_later_requests() {
    let remote = MockRemote::new();
    let project = ScriptProject::new();
    let program = project.module("Shared.Foo", "x = 1\n");
    let (client, server_task) = spawn_server(remote.clone());

    client.start(&program).await;
    let hold = remote.hold(RemoteMethod::Evaluate);
    let eval_seq = client
        .send_request("evaluate", json!({ "expression": "x", "frameId": 1 }))
        .await;
    remote.wait_for_calls(RemoteMethod::Evaluate, 1).await;

    let threads = client.request("threads", json!({})).await;
    assert_eq!(threads["success"], true);
    let frames = client.request("stackTrace", json!({ "threadId": 1 })).await;
    assert_eq!(frames["success"], true);
    let step = client.request("next", json!({ "threadId": 1 })).await;
    assert_eq!(step["success"], true);

    let transcript = client.transcript();
    assert!(
        !transcript
            .iter()
            .any(|msg| msg["type"] == "response" && msg["request_seq"] == eval_seq),
        "evaluate answered before the host replied"
    );

    hold.release();
    let eval = client.wait_for_response(eval_seq).await;
    assert_eq!(eval["success"], true);
    assert_eq!(eval["body"]["result"], "None");

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
