//! End-to-end engine scenarios over a stub provider and the loopback
//! transport.

use async_trait::async_trait;
use gkconfig::Config;
use gkengine::voice::LoopbackTransport;
use gkengine::{Engine, EngineError, EngineEvent, RejectKind, TransportErrorKind};
use gkqueue::{QueueStatus, UserQueueStatus};
use gksource::{MediaProvider, ProviderRegistry, SourceError};
use gktrack::{GuildId, SourceTag, TrackDescriptor, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Catalog-style provider: canonical URLs are stable, every resolve mints a
/// fresh transient URL.
struct StubProvider {
    resolve_counter: AtomicU64,
    fail_extract: Mutex<HashSet<String>>,
}

impl StubProvider {
    fn new() -> Self {
        Self {
            resolve_counter: AtomicU64::new(0),
            fail_extract: Mutex::new(HashSet::new()),
        }
    }

    fn fail_extract_for(&self, url: &str) {
        self.fail_extract.lock().unwrap().insert(url.to_string());
    }

    fn track_id(url: &str) -> Option<String> {
        url.split("id=").nth(1).map(|id| id.to_string()).or_else(|| {
            url.strip_prefix("https://tracks.test/")
                .map(|rest| rest.to_string())
        })
    }
}

#[async_trait]
impl MediaProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Netease
    }

    fn matches(&self, url: &str) -> bool {
        url.starts_with("https://music.163.com/song?id=")
            || url.starts_with("https://tracks.test/")
    }

    async fn extract(
        &self,
        url: &str,
        _cancel: &CancellationToken,
    ) -> gksource::Result<TrackDescriptor> {
        if self.fail_extract.lock().unwrap().contains(url) {
            return Err(SourceError::NotFound(url.to_string()));
        }
        let id = Self::track_id(url)
            .ok_or_else(|| SourceError::Malformed(format!("no track id in {url}")))?;
        Ok(TrackDescriptor {
            title: format!("Track {id}"),
            duration_ms: 180_000,
            canonical_url: url.to_string(),
            uploader: Some("Stub Artist".to_string()),
            thumbnail_url: None,
            source_tag: SourceTag::Netease,
        })
    }

    async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        _cancel: &CancellationToken,
    ) -> gksource::Result<String> {
        let id = Self::track_id(&descriptor.canonical_url)
            .ok_or_else(|| SourceError::Malformed(descriptor.canonical_url.clone()))?;
        let n = self.resolve_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("https://cdn.test/{id}/stream-{n}.mp3"))
    }
}

struct Harness {
    engine: Engine,
    transport: Arc<LoopbackTransport>,
    provider: Arc<StubProvider>,
    _dir: Option<TempDir>,
}

fn build_harness(yaml: &str, data_dir: Option<std::path::PathBuf>) -> Harness {
    let config = Arc::new(Config::from_yaml_str(yaml).unwrap());
    let transport = Arc::new(LoopbackTransport::new());
    let provider = Arc::new(StubProvider::new());
    let registry = Arc::new(
        ProviderRegistry::builder()
            .register(provider.clone())
            .build(),
    );

    let (dir, path) = match data_dir {
        Some(path) => (None, path),
        None => {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().to_path_buf();
            (Some(dir), path)
        }
    };

    let engine = Engine::builder()
        .transport(transport.clone())
        .config(config)
        .registry(registry)
        .data_dir(path)
        .build()
        .unwrap();

    Harness {
        engine,
        transport,
        provider,
        _dir: dir,
    }
}

fn harness() -> Harness {
    build_harness("", None)
}

fn guild() -> GuildId {
    GuildId::from("g1")
}

fn user(name: &str) -> UserId {
    UserId::from(name)
}

fn track_url(id: &str) -> String {
    format!("https://music.163.com/song?id={id}")
}

/// Polls the guild status until the predicate holds (2 s budget).
async fn wait_status<F>(engine: &Engine, guild: &GuildId, mut predicate: F)
where
    F: FnMut(&QueueStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let status = engine.status(guild).await;
            if predicate(&status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue status condition not reached within 2s");
}

/// Polls a user's status until the predicate holds (2 s budget).
async fn wait_user_status<F>(engine: &Engine, guild: &GuildId, who: &UserId, mut predicate: F)
where
    F: FnMut(&UserQueueStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let status = engine.my_status(guild, who).await;
            if predicate(&status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user status condition not reached within 2s");
}

/// Polls a synchronous condition until it holds (2 s budget).
async fn wait_sync<F: FnMut() -> bool>(mut condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}

fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn current_title_is(status: &QueueStatus, title: &str) -> bool {
    status
        .current
        .as_ref()
        .map(|entry| entry.title() == title)
        .unwrap_or(false)
}

#[tokio::test]
async fn test_fifo_order_and_single_flight() {
    let h = harness();
    let g = guild();
    for name in ["alice", "bob", "carol"] {
        h.transport.mark_reachable(&g, &user(name));
    }

    assert_eq!(
        h.engine
            .submit(&g, &user("alice"), "Alice", &track_url("1"))
            .await
            .position(),
        Some(1)
    );
    h.transport.wait_for_play_count(1).await;
    assert_eq!(
        h.engine
            .submit(&g, &user("bob"), "Bob", &track_url("2"))
            .await
            .position(),
        Some(1)
    );
    assert_eq!(
        h.engine
            .submit(&g, &user("carol"), "Carol", &track_url("3"))
            .await
            .position(),
        Some(2)
    );

    // play everything to the end, in order
    for expected_play in 1..=3u64 {
        h.transport.wait_for_play_count(expected_play).await;
        h.transport.finish_current(&g);
    }
    wait_status(&h.engine, &g, |s| s.current.is_none()).await;

    let played = h.transport.played_urls(&g);
    assert_eq!(played.len(), 3);
    assert!(played[0].starts_with("https://cdn.test/1/"));
    assert!(played[1].starts_with("https://cdn.test/2/"));
    assert!(played[2].starts_with("https://cdn.test/3/"));
    assert!(!h.transport.overlap_detected());
}

#[tokio::test]
async fn test_fairness_pending_cap_and_release() {
    let h = harness();
    let g = guild();
    for name in ["alice", "bob"] {
        h.transport.mark_reachable(&g, &user(name));
    }

    // bob's track occupies the player so alice's entry stays pending
    h.engine
        .submit(&g, &user("bob"), "Bob", &track_url("100"))
        .await;
    h.transport.wait_for_play_count(1).await;

    assert_eq!(
        h.engine
            .submit(&g, &user("alice"), "Alice", &track_url("101"))
            .await
            .position(),
        Some(1)
    );

    // second pending entry for alice hits the cap
    let outcome = h
        .engine
        .submit(&g, &user("alice"), "Alice", &track_url("102"))
        .await;
    assert_eq!(outcome.reject_reason(), Some(RejectKind::FairnessPending));

    // bob finishes, alice's track plays and finishes, then she may queue again
    h.transport.finish_current(&g);
    h.transport.wait_for_play_count(2).await;
    h.transport.finish_current(&g);
    wait_status(&h.engine, &g, |s| s.current.is_none()).await;

    assert_eq!(
        h.engine
            .submit(&g, &user("alice"), "Alice", &track_url("102"))
            .await
            .position(),
        Some(1)
    );
}

#[tokio::test]
async fn test_fairness_playing_strict() {
    let h = harness();
    let g = guild();
    h.transport.mark_reachable(&g, &user("alice"));

    h.engine
        .submit(&g, &user("alice"), "Alice", &track_url("1"))
        .await;
    h.transport.wait_for_play_count(1).await;

    // alice's own track is streaming; strict mode refuses another request
    let outcome = h
        .engine
        .submit(&g, &user("alice"), "Alice", &track_url("2"))
        .await;
    assert_eq!(outcome.reject_reason(), Some(RejectKind::FairnessPlaying));
}

#[tokio::test]
async fn test_duplicate_exemption_flips_at_threshold() {
    let h = harness();
    let g = guild();
    for name in ["alice", "bob", "carol", "dave", "erin", "frank"] {
        h.transport.mark_reachable(&g, &user(name));
    }
    let k = track_url("777");

    // bob's track occupies the player; the queue builds up behind it
    h.engine.submit(&g, &user("bob"), "Bob", &track_url("1")).await;
    h.transport.wait_for_play_count(1).await;

    assert!(h
        .engine
        .submit(&g, &user("alice"), "Alice", &k)
        .await
        .is_enqueued());
    assert!(h
        .engine
        .submit(&g, &user("carol"), "Carol", &track_url("2"))
        .await
        .is_enqueued());

    // 2 pending, below the threshold of 5: the duplicate is admitted
    let outcome = h.engine.submit(&g, &user("alice"), "Alice", &k).await;
    assert_eq!(outcome.position(), Some(3));

    for (name, id) in [("dave", "3"), ("erin", "4"), ("frank", "5")] {
        assert!(h
            .engine
            .submit(&g, &user(name), name, &track_url(id))
            .await
            .is_enqueued());
    }
    assert_eq!(h.engine.status(&g).await.pending_len, 6);

    // at or above the threshold the same duplicate is refused
    let outcome = h.engine.submit(&g, &user("alice"), "Alice", &k).await;
    assert_eq!(outcome.reject_reason(), Some(RejectKind::Duplicate));
}

#[tokio::test]
async fn test_canonical_url_survives_restart() {
    let shared_dir = tempfile::tempdir().unwrap();
    let g = guild();
    let url = track_url("1901371647");

    {
        let h = build_harness("", Some(shared_dir.path().to_path_buf()));
        h.transport.mark_reachable(&g, &user("alice"));
        h.engine.submit(&g, &user("alice"), "Alice", &url).await;
        h.transport.wait_for_play_count(1).await;

        // the stream used a transient CDN URL...
        let played = h.transport.played_urls(&g);
        assert!(played[0].starts_with("https://cdn.test/1901371647/"));

        h.engine.shutdown().await;

        // ...but the snapshot on disk only knows the catalog URL
        let raw =
            std::fs::read_to_string(shared_dir.path().join("queues/g1.json")).unwrap();
        assert!(raw.contains("https://music.163.com/song?id=1901371647"));
        assert!(!raw.contains("cdn.test"));
    }

    // restart: the restored track resolves a brand-new playable URL
    let h = build_harness("", Some(shared_dir.path().to_path_buf()));
    h.transport.mark_reachable(&g, &user("alice"));
    h.engine.start().await.unwrap();
    h.transport.wait_for_play_count(1).await;

    let played = h.transport.played_urls(&g);
    assert_eq!(played.len(), 1);
    assert!(played[0].starts_with("https://cdn.test/1901371647/"));
    wait_status(&h.engine, &g, |s| current_title_is(s, "Track 1901371647")).await;
}

#[tokio::test]
async fn test_expired_stream_retries_once() {
    let h = harness();
    let g = guild();
    h.transport.mark_reachable(&g, &user("alice"));
    h.transport.mark_reachable(&g, &user("bob"));

    h.engine
        .submit(&g, &user("alice"), "Alice", &track_url("1"))
        .await;
    h.transport.wait_for_play_count(1).await;
    h.engine
        .submit(&g, &user("bob"), "Bob", &track_url("2"))
        .await;

    // first expiry: the pump resolves a fresh URL and restarts the stream
    h.transport.fail_current(&g, TransportErrorKind::Expired);
    h.transport.wait_for_play_count(2).await;
    let played = h.transport.played_urls(&g);
    assert!(played[0].starts_with("https://cdn.test/1/"));
    assert!(played[1].starts_with("https://cdn.test/1/"));
    assert_ne!(played[0], played[1]);

    // second expiry is terminal for the track; the next entry starts
    h.transport.fail_current(&g, TransportErrorKind::Expired);
    h.transport.wait_for_play_count(3).await;
    assert!(h.transport.played_urls(&g)[2].starts_with("https://cdn.test/2/"));
    wait_status(&h.engine, &g, |s| current_title_is(s, "Track 2")).await;
    assert!(!h.transport.overlap_detected());
}

#[tokio::test]
async fn test_peek_discipline_and_playing_window() {
    let h = harness();
    let g = guild();
    h.transport.mark_reachable(&g, &user("alice"));
    h.transport.mark_reachable(&g, &user("bob"));

    h.engine
        .submit(&g, &user("alice"), "Alice", &track_url("1"))
        .await;
    h.transport.wait_for_play_count(1).await;
    h.engine
        .submit(&g, &user("bob"), "Bob", &track_url("2"))
        .await;

    // status peeks, never consumes: identical answers, identical revision
    let one = h.engine.status(&g).await;
    let two = h.engine.status(&g).await;
    assert_eq!(one.up_next.as_ref().unwrap().title(), "Track 2");
    assert_eq!(two.up_next.as_ref().unwrap().title(), "Track 2");
    assert_eq!(one.revision, two.revision);

    // the currently-playing attribution follows the stream exactly
    assert!(h.engine.my_status(&g, &user("alice")).await.is_currently_playing);
    assert!(!h.engine.my_status(&g, &user("bob")).await.is_currently_playing);

    h.transport.finish_current(&g);
    h.transport.wait_for_play_count(2).await;
    wait_user_status(&h.engine, &g, &user("bob"), |s| s.is_currently_playing).await;
    assert!(!h.engine.my_status(&g, &user("alice")).await.is_currently_playing);
    assert!(h.engine.status(&g).await.up_next.is_none());
}

#[tokio::test]
async fn test_unreachable_requesters_skipped_after_restore() {
    let shared_dir = tempfile::tempdir().unwrap();
    let g = guild();

    {
        let h = build_harness("", Some(shared_dir.path().to_path_buf()));
        for name in ["alice", "bob", "carol"] {
            h.transport.mark_reachable(&g, &user(name));
        }
        h.engine.submit(&g, &user("alice"), "Alice", &track_url("1")).await;
        h.transport.wait_for_play_count(1).await;
        h.engine.submit(&g, &user("bob"), "Bob", &track_url("2")).await;
        h.engine.submit(&g, &user("carol"), "Carol", &track_url("3")).await;
        h.engine.shutdown().await;
    }

    // restart with only carol still on the voice channel
    let h = build_harness("", Some(shared_dir.path().to_path_buf()));
    h.transport.mark_reachable(&g, &user("carol"));
    let mut events = h.engine.events();
    h.engine.start().await.unwrap();

    // alice's and bob's tracks are dropped without streaming; carol's plays
    h.transport.wait_for_play_count(1).await;
    let played = h.transport.played_urls(&g);
    assert_eq!(played.len(), 1);
    assert!(played[0].starts_with("https://cdn.test/3/"));
    wait_status(&h.engine, &g, |s| current_title_is(s, "Track 3")).await;

    let mut skipped: Vec<String> = Vec::new();
    for _ in 0..50 {
        for event in drain_events(&mut events) {
            if let EngineEvent::RequesterAbsentSkip { entry, .. } = event {
                skipped.push(entry.title().to_string());
            }
        }
        if skipped.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(skipped, vec!["Track 1".to_string(), "Track 2".to_string()]);
}

#[tokio::test]
async fn test_stop_is_bounded_and_empties_queue() {
    let h = harness();
    let g = guild();
    h.transport.mark_reachable(&g, &user("alice"));
    h.transport.mark_reachable(&g, &user("bob"));

    h.engine.submit(&g, &user("alice"), "Alice", &track_url("1")).await;
    h.transport.wait_for_play_count(1).await;
    h.engine.submit(&g, &user("bob"), "Bob", &track_url("2")).await;

    let dropped = tokio::time::timeout(Duration::from_secs(1), h.engine.stop(&g))
        .await
        .expect("stop exceeded its bound")
        .unwrap();
    assert_eq!(dropped, 2);

    let status = h.engine.status(&g).await;
    assert_eq!(status.pending_len, 0);
    assert!(status.current.is_none());
    wait_sync(|| !h.transport.is_streaming(&g)).await;

    // the guild keeps working after a stop
    assert!(h
        .engine
        .submit(&g, &user("alice"), "Alice", &track_url("9"))
        .await
        .is_enqueued());
    h.transport.wait_for_play_count(2).await;
    assert!(h.transport.played_urls(&g)[1].starts_with("https://cdn.test/9/"));
}

#[tokio::test]
async fn test_skip_moves_to_next_track() {
    let h = harness();
    let g = guild();
    h.transport.mark_reachable(&g, &user("alice"));
    h.transport.mark_reachable(&g, &user("bob"));

    h.engine.submit(&g, &user("alice"), "Alice", &track_url("1")).await;
    h.transport.wait_for_play_count(1).await;
    h.engine.submit(&g, &user("bob"), "Bob", &track_url("2")).await;

    let skipped = tokio::time::timeout(Duration::from_secs(1), h.engine.skip(&g))
        .await
        .expect("skip exceeded its bound")
        .unwrap();
    assert_eq!(skipped.title(), "Track 1");
    // the skipped entry leaves `current` synchronously, before the pump
    // has torn the stream down
    assert!(!current_title_is(&h.engine.status(&g).await, "Track 1"));
    h.transport.wait_for_play_count(2).await;
    wait_status(&h.engine, &g, |s| current_title_is(s, "Track 2")).await;

    h.engine.skip(&g).await.unwrap();
    wait_status(&h.engine, &g, |s| s.current.is_none()).await;
    assert!(matches!(
        h.engine.skip(&g).await,
        Err(EngineError::NotPlaying)
    ));
}

#[tokio::test]
async fn test_queue_full() {
    let h = build_harness("queue:\n  max_queue_length: 1\n", None);
    let g = guild();
    h.transport.mark_reachable(&g, &user("alice"));
    h.transport.mark_reachable(&g, &user("bob"));
    h.transport.mark_reachable(&g, &user("carol"));

    h.engine.submit(&g, &user("alice"), "Alice", &track_url("1")).await;
    h.transport.wait_for_play_count(1).await;
    assert!(h
        .engine
        .submit(&g, &user("bob"), "Bob", &track_url("2"))
        .await
        .is_enqueued());

    let outcome = h
        .engine
        .submit(&g, &user("carol"), "Carol", &track_url("3"))
        .await;
    assert_eq!(outcome.reject_reason(), Some(RejectKind::QueueFull));
}

#[tokio::test]
async fn test_unsupported_and_extract_failures() {
    let h = harness();
    let g = guild();

    let outcome = h
        .engine
        .submit(&g, &user("alice"), "Alice", "https://example.com/page.html")
        .await;
    assert_eq!(outcome.reject_reason(), Some(RejectKind::Unsupported));

    let url = track_url("500");
    h.provider.fail_extract_for(&url);
    let outcome = h.engine.submit(&g, &user("alice"), "Alice", &url).await;
    assert_eq!(outcome.reject_reason(), Some(RejectKind::ExtractFailed));

    // a failed submission leaves no trace in the queue
    assert_eq!(h.engine.status(&g).await.pending_len, 0);
}

#[tokio::test]
async fn test_host_disconnect_suspends_until_resume() {
    let h = harness();
    let g = guild();
    h.transport.mark_reachable(&g, &user("alice"));
    h.transport.mark_reachable(&g, &user("bob"));

    h.engine.submit(&g, &user("alice"), "Alice", &track_url("1")).await;
    h.transport.wait_for_play_count(1).await;
    h.engine.submit(&g, &user("bob"), "Bob", &track_url("2")).await;

    h.transport
        .fail_current(&g, TransportErrorKind::Disconnected);
    wait_status(&h.engine, &g, |s| s.paused_suspended).await;

    // no new stream starts while suspended
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.total_play_count(), 1);

    h.engine.resume(&g).await;
    h.transport.wait_for_play_count(2).await;
    assert!(!h.engine.status(&g).await.paused_suspended);
    assert!(h.transport.played_urls(&g)[1].starts_with("https://cdn.test/2/"));
}

#[tokio::test]
async fn test_up_next_notification_for_absent_requester() {
    let h = harness();
    let g = guild();
    h.transport.mark_reachable(&g, &user("carol"));
    h.transport.mark_reachable(&g, &user("alice"));
    // bob never joins voice

    h.engine.submit(&g, &user("carol"), "Carol", &track_url("1")).await;
    h.transport.wait_for_play_count(1).await;
    h.engine.submit(&g, &user("alice"), "Alice", &track_url("2")).await;
    h.engine.submit(&g, &user("bob"), "Bob", &track_url("3")).await;

    let mut events = h.engine.events();
    // carol finishes; alice's track starts with bob's track up next
    h.transport.finish_current(&g);
    h.transport.wait_for_play_count(2).await;

    let mut saw_up_next = false;
    for _ in 0..50 {
        for event in drain_events(&mut events) {
            if let EngineEvent::UpNext { entry, .. } = event {
                assert_eq!(entry.title(), "Track 3");
                saw_up_next = true;
            }
        }
        if saw_up_next {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_up_next, "expected an UpNext event for the absent requester");
}

#[tokio::test]
async fn test_my_status_for_unknown_guild() {
    let h = harness();
    let status = h.engine.my_status(&guild(), &user("nobody")).await;
    assert_eq!(status.pending_count, 0);
    assert!(!status.is_currently_playing);
    assert!(status.can_add_more);
}
