use super::*;
use crate::node::NodeOptions;
use crate::test_support::{track, track_json};
use crate::voice::{ChannelKind, MockVoiceGateway};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GUILD: u64 = 42;
const US_EAST: &str = "us-east1234.discord.media:443";
const EU_WEST: &str = "eu-west77.discord.media:443";

fn voice_channel() -> VoiceChannel {
    VoiceChannel::new(100, GUILD, ChannelKind::Voice)
}

fn gateway(joins: usize) -> Arc<dyn VoiceGateway> {
    let mut mock = MockVoiceGateway::new();
    mock.expect_update_voice_state()
        .times(joins)
        .returning(|_, _, _, _| Ok(()));
    Arc::new(mock)
}

fn relaxed_gateway() -> Arc<dyn VoiceGateway> {
    let mut mock = MockVoiceGateway::new();
    mock.expect_update_voice_state()
        .returning(|_, _, _, _| Ok(()));
    Arc::new(mock)
}

fn us_server(token: &str) -> VoiceServer {
    VoiceServer::new(US_EAST, token)
}

async fn accept_everything(server: &MockServer) {
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

fn add_node(pool: &NodePool, label: &str, region: &str, server: &MockServer) -> Arc<Node> {
    let address = server.address();
    let options =
        NodeOptions::new(label, address.ip().to_string(), address.port(), "pw").region(region);
    let node = Node::new(options, 1).unwrap();
    node.mark_ready("sess");
    pool.register(Arc::clone(&node)).unwrap();
    node
}

/// Voice PATCH requests seen by `server`, as JSON bodies.
async fn voice_updates(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.method.as_str() == "PATCH")
        .filter_map(|request| request.body_json::<Value>().ok())
        .filter(|body| body.get("voice").is_some())
        .collect()
}

async fn patches(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.method.as_str() == "PATCH")
        .filter_map(|request| request.body_json::<Value>().ok())
        .collect()
}

async fn active_player(server: &MockServer) -> (NodePool, Player) {
    accept_everything(server).await;
    let pool = NodePool::new(1);
    add_node(&pool, "us", "us", server);

    let player = Player::new(pool.clone(), relaxed_gateway(), voice_channel());
    player.connect(ConnectOptions::default()).await.unwrap();
    player.on_server_update(us_server("tok")).await.unwrap();
    player.on_session_id("voice-1").await.unwrap();
    assert_eq!(player.phase(), PlayerPhase::Active);
    (pool, player)
}

#[tokio::test]
async fn connect_rejects_text_channels() {
    let pool = NodePool::new(1);
    let player = Player::new(
        pool,
        gateway(0),
        VoiceChannel::new(5, GUILD, ChannelKind::Text),
    );
    assert!(matches!(
        player.connect(ConnectOptions::default()).await,
        Err(Error::InvalidChannel)
    ));
    assert_eq!(player.phase(), PlayerPhase::Idle);
}

struct StalledGateway;

#[async_trait]
impl VoiceGateway for StalledGateway {
    fn name(&self) -> String {
        "stalled".to_string()
    }

    async fn update_voice_state(
        &self,
        _guild_id: u64,
        _channel_id: Option<u64>,
        _self_mute: bool,
        _self_deaf: bool,
    ) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[tokio::test]
async fn connect_times_out() {
    let player = Player::new(NodePool::new(1), Arc::new(StalledGateway), voice_channel());
    let options = ConnectOptions {
        timeout: Duration::from_millis(20),
        ..ConnectOptions::default()
    };
    assert!(matches!(player.connect(options).await, Err(Error::JoinTimeout)));
    assert_eq!(player.phase(), PlayerPhase::Idle);
    assert!(!player.is_connected());
}

#[tokio::test]
async fn credentials_dispatch_once_in_either_order() {
    for session_first in [true, false] {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("/v4/sessions/sess/players/{GUILD}")))
            .and(body_partial_json(json!({
                "voice": { "sessionId": "voice-1", "endpoint": US_EAST, "token": "tok" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let pool = NodePool::new(1);
        add_node(&pool, "us", "us", &server);
        let player = Player::new(pool.clone(), gateway(1), voice_channel());
        player.connect(ConnectOptions::default()).await.unwrap();
        assert_eq!(player.phase(), PlayerPhase::Joining);

        if session_first {
            player.on_session_id("voice-1").await.unwrap();
            assert_eq!(player.phase(), PlayerPhase::AwaitingHandshake);
            player.on_server_update(us_server("tok")).await.unwrap();
        } else {
            player.on_server_update(us_server("tok")).await.unwrap();
            assert_eq!(player.phase(), PlayerPhase::AwaitingHandshake);
            player.on_session_id("voice-1").await.unwrap();
        }

        assert_eq!(player.phase(), PlayerPhase::Active);
        assert!(player.is_connected());
        assert_eq!(player.node().unwrap().label(), "us");

        // Repeats of either fragment change nothing.
        player.on_session_id("voice-1").await.unwrap();
        player.on_server_update(us_server("tok")).await.unwrap();

        server.verify().await;
    }
}

#[tokio::test]
async fn changed_fragments_are_redispatched() {
    let server = MockServer::start().await;
    let (_pool, player) = active_player(&server).await;

    player.on_session_id("voice-2").await.unwrap();
    player.on_server_update(us_server("tok-2")).await.unwrap();

    let sent: Vec<_> = voice_updates(&server)
        .await
        .into_iter()
        .map(|body| {
            (
                body["voice"]["sessionId"].as_str().unwrap().to_string(),
                body["voice"]["token"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        sent,
        vec![
            ("voice-1".to_string(), "tok".to_string()),
            ("voice-2".to_string(), "tok".to_string()),
            ("voice-2".to_string(), "tok-2".to_string()),
        ]
    );
}

#[tokio::test]
async fn endpoint_change_moves_to_the_regional_node() {
    let us = MockServer::start().await;
    let eu = MockServer::start().await;
    accept_everything(&us).await;
    accept_everything(&eu).await;

    let pool = NodePool::new(1);
    let us_node = add_node(&pool, "us", "us", &us);
    let eu_node = add_node(&pool, "eu", "eu", &eu);

    let player = Player::new(pool.clone(), relaxed_gateway(), voice_channel());
    player.connect(ConnectOptions::default()).await.unwrap();
    player.on_session_id("voice-1").await.unwrap();
    player.on_server_update(us_server("tok")).await.unwrap();
    assert!(us_node.has_player(GUILD));

    player
        .on_server_update(VoiceServer::new(EU_WEST, "tok"))
        .await
        .unwrap();
    assert_eq!(player.node().unwrap().label(), "eu");
    assert!(eu_node.has_player(GUILD));
    assert!(!us_node.has_player(GUILD));
    assert_eq!(voice_updates(&us).await.len(), 1);
    assert_eq!(voice_updates(&eu).await.len(), 1);
}

#[tokio::test]
async fn no_connected_node_surfaces_without_state_change() {
    let pool = NodePool::new(1);
    let player = Player::new(pool, relaxed_gateway(), voice_channel());
    player.connect(ConnectOptions::default()).await.unwrap();

    assert!(matches!(
        player.on_server_update(us_server("tok")).await,
        Err(Error::NoNodesAvailable)
    ));
    assert_eq!(player.phase(), PlayerPhase::Joining);
}

#[tokio::test]
async fn server_update_is_kept_until_a_node_appears() {
    let server = MockServer::start().await;
    accept_everything(&server).await;
    let pool = NodePool::new(1);
    let player = Player::new(pool.clone(), relaxed_gateway(), voice_channel());
    player.connect(ConnectOptions::default()).await.unwrap();

    assert!(matches!(
        player.on_server_update(us_server("tok")).await,
        Err(Error::NoNodesAvailable)
    ));

    // The host does not resend the server update; the session id completes it.
    add_node(&pool, "us", "us", &server);
    player.on_session_id("voice-1").await.unwrap();

    assert_eq!(player.phase(), PlayerPhase::Active);
    assert_eq!(player.node().unwrap().label(), "us");
    let sent = voice_updates(&server).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["voice"]["endpoint"], US_EAST);
}

#[tokio::test]
async fn unregistered_node_is_replaced_on_next_voice_event() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    accept_everything(&first).await;
    accept_everything(&second).await;

    let pool = NodePool::new(1);
    add_node(&pool, "a", "us", &first);
    let b = add_node(&pool, "b", "us", &second);

    let player = Player::new(pool.clone(), relaxed_gateway(), voice_channel());
    player.connect(ConnectOptions::default()).await.unwrap();
    player.on_server_update(us_server("tok")).await.unwrap();
    player.on_session_id("voice-1").await.unwrap();
    assert_eq!(player.node().unwrap().label(), "a");

    pool.unregister("a").await.unwrap();
    assert!(player.node().is_none());
    assert!(!player.is_connected());
    assert_eq!(player.phase(), PlayerPhase::AwaitingHandshake);
    assert!(matches!(
        player.play(track("a", 1000)).await,
        Err(Error::PlayerNotConnected)
    ));

    // Even a repeated session id re-resolves once the node is gone.
    player.on_session_id("voice-1").await.unwrap();
    assert_eq!(player.node().unwrap().label(), "b");
    assert!(b.has_player(GUILD));
    assert_eq!(player.phase(), PlayerPhase::Active);
    assert_eq!(voice_updates(&second).await.len(), 1);
    assert_eq!(voice_updates(&first).await.len(), 1);
}

#[tokio::test]
async fn dropped_player_releases_its_assignment() {
    let server = MockServer::start().await;
    let (pool, player) = active_player(&server).await;
    let node = player.node().unwrap();
    assert_eq!(node.player_count(), 1);

    drop(player);
    assert!(!node.has_player(GUILD));
    assert!(pool.assignment(GUILD).is_none());
    assert_eq!(node.player_count(), 0);
}

#[tokio::test]
async fn commands_require_an_active_player() {
    let pool = NodePool::new(1);
    let player = Player::new(pool, relaxed_gateway(), voice_channel());

    assert!(matches!(
        player.play(track("a", 1000)).await,
        Err(Error::PlayerNotConnected)
    ));
    assert!(matches!(
        player.add_filter("x", Filter::default().with_volume(0.5), false).await,
        Err(Error::PlayerNotConnected)
    ));
    assert!(player.filter_labels().await.is_empty());
    assert!(player.current().is_none());
}

#[tokio::test]
async fn playback_updates_cache_and_reach_the_node() {
    let server = MockServer::start().await;
    let (_pool, player) = active_player(&server).await;

    player.play(track("a", 200_000)).await.unwrap();
    assert_eq!(player.current().unwrap().encoded, "enc-a");

    player.set_volume(5000).await.unwrap();
    assert_eq!(player.volume(), 1000);
    player.pause(true).await.unwrap();
    assert!(player.paused());

    player.seek(30_000).await.unwrap();
    assert!(player.position() >= 30_000);

    player.stop().await.unwrap();
    assert!(player.current().is_none());
    assert!(player.position() >= 30_000);

    let requests = server.received_requests().await.unwrap();
    let stop = requests
        .iter()
        .rev()
        .find(|request| request.method.as_str() == "PATCH")
        .unwrap();
    assert_eq!(stop.url.query(), Some("noReplace=false"));

    let bodies = patches(&server).await;
    let last = bodies.last().unwrap();
    assert_eq!(last, &json!({ "track": { "encoded": null } }));
    assert!(bodies.contains(&json!({ "track": { "encoded": "enc-a" } })));
    assert!(bodies.contains(&json!({ "volume": 1000 })));
}

#[tokio::test]
async fn filters_fold_in_label_order() {
    let server = MockServer::start().await;
    let (_pool, player) = active_player(&server).await;

    player
        .add_filter("quiet", Filter::default().with_volume(0.5), false)
        .await
        .unwrap();
    player
        .add_filter("loud", Filter::default().with_volume(2.0), false)
        .await
        .unwrap();
    assert_eq!(player.filter_labels().await, vec!["quiet", "loud"]);

    assert!(matches!(
        player.remove_filter("missing", false).await,
        Err(Error::FilterNotFound(label)) if label == "missing"
    ));
    assert_eq!(player.filter_labels().await.len(), 2);

    player.remove_filter("loud", false).await.unwrap();
    player.clear_filters(false).await.unwrap();

    let filters: Vec<_> = patches(&server)
        .await
        .into_iter()
        .filter_map(|body| body.get("filters").cloned())
        .collect();
    assert_eq!(
        filters,
        vec![
            json!({ "volume": 0.5 }),
            json!({ "volume": 2.0 }),
            json!({ "volume": 0.5 }),
            json!({}),
        ]
    );
}

#[tokio::test]
async fn fast_apply_seeks_after_filters() {
    let server = MockServer::start().await;
    let (_pool, player) = active_player(&server).await;
    player.play(track("a", 200_000)).await.unwrap();

    player
        .add_filter("speed", Filter::default().with_volume(0.8), true)
        .await
        .unwrap();

    let bodies = patches(&server).await;
    let n = bodies.len();
    assert!(bodies[n - 2].get("filters").is_some());
    assert!(bodies[n - 1].get("position").is_some());
}

#[tokio::test]
async fn destroy_twice_sends_one_delete() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/v4/sessions/sess/players/{GUILD}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    accept_everything(&server).await;

    let pool = NodePool::new(1);
    let node = add_node(&pool, "us", "us", &server);
    // Join plus a single leave.
    let player = Player::new(pool.clone(), gateway(2), voice_channel());
    player.connect(ConnectOptions::default()).await.unwrap();
    player.on_server_update(us_server("tok")).await.unwrap();
    player.on_session_id("voice-1").await.unwrap();

    player.destroy().await;
    player.destroy().await;

    assert!(player.is_destroyed());
    assert_eq!(player.phase(), PlayerPhase::Idle);
    assert!(!node.has_player(GUILD));
    assert!(pool.assignment(GUILD).is_none());
    assert!(matches!(
        player.on_session_id("voice-2").await,
        Err(Error::PlayerDestroyed)
    ));
    server.verify().await;
}

#[tokio::test]
async fn disconnect_cleans_up_even_if_the_host_fails() {
    let server = MockServer::start().await;
    accept_everything(&server).await;
    let pool = NodePool::new(1);
    add_node(&pool, "us", "us", &server);

    let mut mock = MockVoiceGateway::new();
    mock.expect_update_voice_state()
        .withf(|_, channel, _, _| channel.is_some())
        .returning(|_, _, _, _| Ok(()));
    mock.expect_update_voice_state()
        .withf(|_, channel, _, _| channel.is_none())
        .times(1)
        .returning(|_, _, _, _| Err(Error::Gateway("shard offline".to_string())));

    let player = Player::new(pool, Arc::new(mock), voice_channel());
    player.connect(ConnectOptions::default()).await.unwrap();
    player.on_server_update(us_server("tok")).await.unwrap();
    player.on_session_id("voice-1").await.unwrap();

    player.disconnect(false).await;
    assert_eq!(player.phase(), PlayerPhase::Idle);
    assert!(!player.is_connected());

    // Not connected any more, so this does not reach the host.
    player.disconnect(false).await;
}

#[tokio::test]
async fn node_reports_drive_position_and_current_track() {
    let server = MockServer::start().await;
    let (_pool, player) = active_player(&server).await;
    player.play(track("a", 10_000)).await.unwrap();

    let handle: &dyn SessionHandle = player.shared.as_ref();
    handle.update_state(&PlayerState {
        time: now_millis() - 60_000,
        position: 9_000,
        connected: true,
        ping: 12,
    });
    assert_eq!(player.position(), 10_000);
    assert_eq!(player.ping(), 12);

    let replaced: TrackEvent = serde_json::from_value(json!({
        "op": "event",
        "type": "TrackEndEvent",
        "guildId": GUILD.to_string(),
        "track": track_json("a", 10_000),
        "reason": "replaced"
    }))
    .unwrap();
    handle.handle_event(&replaced);
    assert!(player.current().is_some());

    let finished: TrackEvent = serde_json::from_value(json!({
        "op": "event",
        "type": "TrackEndEvent",
        "guildId": GUILD.to_string(),
        "track": track_json("a", 10_000),
        "reason": "finished"
    }))
    .unwrap();
    handle.handle_event(&finished);
    assert!(player.current().is_none());
}

#[tokio::test]
async fn resync_pushes_voice_and_playback_again() {
    let server = MockServer::start().await;
    let (_pool, player) = active_player(&server).await;
    player.play(track("a", 200_000)).await.unwrap();
    player.set_volume(80).await.unwrap();

    // voice, play, volume
    assert_eq!(patches(&server).await.len(), 3);

    player.node().unwrap().resync_players();
    let mut bodies = Vec::new();
    for _ in 0..100 {
        bodies = patches(&server).await;
        if bodies.len() >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(bodies.len(), 5);
    assert_eq!(voice_updates(&server).await.len(), 2);
    let restore = bodies.last().unwrap();
    assert_eq!(restore["track"]["encoded"], "enc-a");
    assert_eq!(restore["volume"], 80);
    assert_eq!(restore["paused"], false);
}

#[tokio::test]
async fn search_uses_assigned_node_or_any() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4/loadtracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "loadType": "track",
            "data": track_json("a", 1000)
        })))
        .mount(&server)
        .await;

    let pool = NodePool::new(1);
    add_node(&pool, "us", "us", &server);
    let player = Player::new(pool, relaxed_gateway(), voice_channel());
    assert!(player.node().is_none());

    let tracks = player
        .search("https://example.com/a", &SearchType::YouTube)
        .await
        .unwrap()
        .into_tracks();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].encoded, "enc-a");
}
