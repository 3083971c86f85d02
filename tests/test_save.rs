mod utils;

use crate::utils::get;
use crate::utils::login;
use crate::utils::post_json;
use crate::utils::start_server;
use crate::utils::users_document;

const MISSIONS: &str = r#"
missions:
  sg237:
    pilotusers: [alice]
  sg012: {}
"#;

#[tokio::test]
async fn only_listed_pilot_can_save() {
    let users = users_document(&[("alice", "wonderland"), ("bob", "builder")]);
    let server = start_server("pilot", MISSIONS, &users).await;
    let cmdfile = server.path("sg237/cmdfile");

    let alice = login(&server, "Alice", "wonderland").await.unwrap();
    let (status, body) = post_json(
        &server,
        "/save/237/cmdfile",
        Some(&alice),
        r#"{"file": "cmdfile", "contents": "$D_TGT,500\n$GO\n"}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, "cmdfile saved ok");
    assert_eq!(
        std::fs::read_to_string(&cmdfile).unwrap(),
        "$D_TGT,500\n$GO\n"
    );

    let bob = login(&server, "bob", "builder").await.unwrap();
    let (status, body) = post_json(
        &server,
        "/save/237/cmdfile",
        Some(&bob),
        r#"{"file": "cmdfile", "contents": "$QUIT\n"}"#,
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body, "authorization failed");

    let (status, body) = post_json(
        &server,
        "/save/237/cmdfile",
        None,
        r#"{"file": "cmdfile", "contents": "$QUIT\n"}"#,
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body, "authorization failed");

    // neither denied request reached the handler
    assert_eq!(
        std::fs::read_to_string(&cmdfile).unwrap(),
        "$D_TGT,500\n$GO\n"
    );
}

#[tokio::test]
async fn unknown_missions_and_wrong_passwords_look_alike() {
    let users = users_document(&[("alice", "wonderland")]);
    let server = start_server("pilot", MISSIONS, &users).await;

    assert_eq!(
        login(&server, "alice", "nope").await,
        Err("authorization failed".to_string())
    );
    assert_eq!(
        login(&server, "mallory", "nope").await,
        Err("authorization failed".to_string())
    );

    let alice = login(&server, "alice", "wonderland").await.unwrap();
    let (status, body) = get(&server, "/control/999/cmdfile", Some(&alice)).await;
    assert_eq!(status, 404);
    assert_eq!(body, "not found");
}

#[tokio::test]
async fn control_files_round_trip_through_the_api() {
    let users = users_document(&[("alice", "wonderland")]);
    let server = start_server("pilot", MISSIONS, &users).await;
    let alice = login(&server, "alice", "wonderland").await.unwrap();

    let (_, body) = get(&server, "/control/237/targets", Some(&alice)).await;
    assert_eq!(body, "none");

    let (status, _) = post_json(
        &server,
        "/save/237/targets",
        Some(&alice),
        r#"{"file": "targets", "contents": "/ SEAWEED lat=4740 lon=-12220\n"}"#,
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = get(&server, "/control/237/targets", Some(&alice)).await;
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["file"], "targets");
    assert_eq!(json["dive"], -1);
    assert_eq!(json["contents"], "/ SEAWEED lat=4740 lon=-12220\n");

    let (status, body) = post_json(
        &server,
        "/save/237/cmdfile",
        Some(&alice),
        r#"{"file": "cmdfile", "contents": "$SHUTDOWN\n"}"#,
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body, "not allowed");
}

#[tokio::test]
async fn mission_list_and_user_check_follow_the_session() {
    let users = users_document(&[("alice", "wonderland")]);
    let server = start_server("pilot", MISSIONS, &users).await;

    let (_, body) = get(&server, "/missions", None).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["missions"].as_array().unwrap().len(), 1);
    assert_eq!(json["missions"][0]["glider"], 12);

    let (_, body) = get(&server, "/user", None).await;
    assert_eq!(body, "NO");

    let alice = login(&server, "alice", "wonderland").await.unwrap();
    let (_, body) = get(&server, "/missions", Some(&alice)).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["missions"].as_array().unwrap().len(), 2);

    let (_, body) = get(&server, "/user", Some(&alice)).await;
    assert_eq!(body, "YES");
}

#[tokio::test]
async fn pilot_routes_do_not_exist_on_public_servers() {
    let users = users_document(&[("alice", "wonderland")]);
    let server = start_server("public", MISSIONS, &users).await;
    let alice = login(&server, "alice", "wonderland").await.unwrap();

    let (status, body) = post_json(
        &server,
        "/save/237/cmdfile",
        Some(&alice),
        r#"{"file": "cmdfile", "contents": "$GO\n"}"#,
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body, "Page not found: /save/237/cmdfile");
}
