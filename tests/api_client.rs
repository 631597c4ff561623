mod support;

use std::time::Duration;

use panel_sync::models::{BotAction, BotKind, BotRunState, ClearScope, Command};
use panel_sync::{
    ActionEndpoint, ApiClient, Backend, CommandError, FailureKind, FetchError, FetchParams,
    Resource, Snapshot,
};
use serde_json::json;

use support::{TestPanel, TOKEN};

const PARAMS: FetchParams = FetchParams { ranking_limit: 2 };

fn client(panel: &TestPanel, token: Option<&str>, endpoint: ActionEndpoint) -> ApiClient {
    ApiClient::new(
        &format!("{}/api/", panel.base_url()),
        token.map(str::to_string),
        Duration::from_secs(2),
        endpoint,
    )
    .expect("client")
}

#[tokio::test]
async fn fetches_every_resource() {
    let panel = TestPanel::spawn().await;
    let client = client(&panel, Some(TOKEN), ActionEndpoint::PerBot);

    match client.fetch(Resource::Status, PARAMS).await.expect("status") {
        Snapshot::Status(status) => {
            assert!(!status.twitch);
            assert!(status.discord);
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }

    match client.fetch(Resource::BotStatus, PARAMS).await.expect("bots") {
        Snapshot::BotStatus(bots) => {
            assert_eq!(bots.twitch.status, BotRunState::Offline);
            assert_eq!(bots.discord.status, BotRunState::Online);
            assert_eq!(bots.discord.pid, Some(1002));
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }

    match client.fetch(Resource::Stats, PARAMS).await.expect("stats") {
        Snapshot::Stats(stats) => {
            assert_eq!(stats.twitch.vips.count(), 2);
            assert_eq!(stats.twitch.moderators.count(), 8);
            assert_eq!(stats.database.total_points, Some(9_160));
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }

    match client.fetch(Resource::Ranking, PARAMS).await.expect("ranking") {
        Snapshot::Ranking(ranking) => {
            let names: Vec<&str> = ranking
                .ranking
                .iter()
                .map(|entry| entry.username.as_str())
                .collect();
            assert_eq!(names, ["KranikUser", "stream_fan"]);
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }

    match client.fetch(Resource::Leaderboard, PARAMS).await.expect("leaderboard") {
        Snapshot::Leaderboard(rows) => {
            assert_eq!(rows.len(), 3);
            assert_eq!(rows[2].username, "lurker42");
            assert!(!rows[2].is_follower);
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }

    let paths: Vec<String> = panel.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        [
            "/api/status",
            "/api/bots/status",
            "/api/stats",
            "/api/users/ranking?limit=2",
            "/api/leaderboard",
        ]
    );
}

#[tokio::test]
async fn bad_credential_is_an_http_failure() {
    let panel = TestPanel::spawn().await;
    let client = client(&panel, Some("wrong"), ActionEndpoint::PerBot);

    let err = client
        .fetch(Resource::Status, PARAMS)
        .await
        .expect_err("unauthorized");
    assert!(matches!(err, FetchError::Http { status: 401, ref message } if message == "Unauthorized"));
    assert_eq!(err.kind(), FailureKind::HttpError);

    let anonymous = client_without_key(&panel);
    let err = anonymous
        .fetch(Resource::Status, PARAMS)
        .await
        .expect_err("no key");
    assert!(matches!(err, FetchError::MissingCredential));
    assert!(panel.requests().is_empty());
}

fn client_without_key(panel: &TestPanel) -> ApiClient {
    client(panel, None, ActionEndpoint::PerBot)
}

#[tokio::test]
async fn error_body_on_success_is_a_protocol_failure() {
    let panel = TestPanel::spawn().await;
    panel.set_stats_broken(true);
    let client = client(&panel, Some(TOKEN), ActionEndpoint::PerBot);

    let err = client
        .fetch(Resource::Stats, PARAMS)
        .await
        .expect_err("broken stats");
    assert_eq!(err.kind(), FailureKind::ProtocolError);
    assert!(err.to_string().contains("Brak połączenia z bazą danych"));
}

#[tokio::test]
async fn unreachable_server_is_a_network_failure() {
    let client = ApiClient::new(
        "http://127.0.0.1:1",
        Some(TOKEN.to_string()),
        Duration::from_secs(2),
        ActionEndpoint::PerBot,
    )
    .expect("client");
    let err = client
        .fetch(Resource::Status, PARAMS)
        .await
        .expect_err("refused");
    assert_eq!(err.kind(), FailureKind::NetworkUnreachable);
}

#[tokio::test]
async fn bot_actions_use_selected_route() {
    let panel = TestPanel::spawn().await;

    let per_bot = client(&panel, Some(TOKEN), ActionEndpoint::PerBot);
    let outcome = per_bot
        .execute(&Command::Bot {
            bot: BotKind::Twitch,
            action: BotAction::Start,
        })
        .await
        .expect("start twitch");
    assert_eq!(outcome.message, "Twitch bot uruchomiony");

    let combined = client(&panel, Some(TOKEN), ActionEndpoint::Combined);
    let outcome = combined
        .execute(&Command::Bot {
            bot: BotKind::Discord,
            action: BotAction::Stop,
        })
        .await
        .expect("stop discord");
    assert_eq!(outcome.message, "Discord bot zatrzymany");

    let requests = panel.requests();
    assert_eq!(requests[0].path, "/api/bot/twitch/start");
    assert_eq!(requests[0].body, json!({"action": "start"}));
    assert_eq!(requests[1].path, "/api/action");
    assert_eq!(requests[1].body, json!({"action": "stop_discord"}));
}

#[tokio::test]
async fn refusal_with_success_status_is_rejected_verbatim() {
    let panel = TestPanel::spawn().await;
    let client = client(&panel, Some(TOKEN), ActionEndpoint::PerBot);

    let err = client
        .execute(&Command::Bot {
            bot: BotKind::Discord,
            action: BotAction::Start,
        })
        .await
        .expect_err("already running");
    assert!(matches!(err, CommandError::Rejected(ref message) if message == "Discord bot już działa"));
}

#[tokio::test]
async fn points_commands_send_expected_bodies() {
    let panel = TestPanel::spawn().await;
    let client = client(&panel, Some(TOKEN), ActionEndpoint::PerBot);

    let added = client
        .execute(&Command::AddPoints {
            username: "lurker42".to_string(),
            points: 60,
        })
        .await
        .expect("add");
    assert_eq!(added.total_points, Some(700));

    let removed = client
        .execute(&Command::RemovePoints {
            username: "lurker42".to_string(),
            points: 100,
        })
        .await
        .expect("remove");
    assert_eq!(removed.total_points, Some(600));

    client
        .execute(&Command::ClearUserPoints {
            username: "stream_fan".to_string(),
        })
        .await
        .expect("clear user");
    assert_eq!(panel.points_of("stream_fan"), Some(0));

    let cleared = client
        .execute(&Command::ClearAllPoints {
            scope: ClearScope::NonFollowers,
        })
        .await
        .expect("clear non followers");
    assert_eq!(cleared.affected, Some(1));
    assert_eq!(panel.points_of("lurker42"), Some(0));
    assert_eq!(panel.points_of("KranikUser"), Some(5_400));

    let bodies: Vec<_> = panel.requests().into_iter().map(|r| r.body).collect();
    assert_eq!(
        bodies,
        [
            json!({"username": "lurker42", "points": 60}),
            json!({"username": "lurker42", "points": 100}),
            json!({"username": "stream_fan", "clear_all": true}),
            json!({"type": "non_followers"}),
        ]
    );
}

#[tokio::test]
async fn unknown_user_error_is_surfaced_verbatim() {
    let panel = TestPanel::spawn().await;
    let client = client(&panel, Some(TOKEN), ActionEndpoint::PerBot);

    let err = client
        .execute(&Command::AddPoints {
            username: "ghost".to_string(),
            points: 5,
        })
        .await
        .expect_err("unknown user");
    assert_eq!(err.to_string(), "Użytkownik ghost nie istnieje");
}
