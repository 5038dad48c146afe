mod support;

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use chrono::Duration;
use photocache_core::{
    CacheEntry, EntryState, MaxAge, StaticRegistry, TrackedKey, TransferStatus, UrlScheme,
};
use photocache_engine::{
    AcquisitionCache, AlwaysOnline, CacheEvent, CacheSettings, ParserSelectors,
    SelectorPageParser, TransferQueue,
};
use pretty_assertions::assert_eq;
use support::{harness, queue_settings, serve_entity, sub_item_url, urls, FakeTransport, Harness};
use tempfile::TempDir;

async fn tick_until(h: &Harness, key: &str, state: EntryState) {
    for _ in 0..20 {
        if h.cache.entry(key).map(|e| e.state) == Some(state) {
            return;
        }
        h.cache.run_tick().await.unwrap();
    }
    panic!("{key} never reached {state}");
}

#[tokio::test]
async fn fresh_entries_reach_done_without_revisiting_states() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    serve_entity(&transport, "202", 3);
    let h = harness(
        root.path(),
        transport,
        vec![TrackedKey::new("kite", "101"), TrackedKey::new("owl", "202")],
    );

    let mut ticks = 0;
    loop {
        let report = h.cache.run_tick().await.unwrap();
        ticks += 1;
        assert_eq!(report.failed, 0);
        if report.pending == 0 {
            break;
        }
        assert!(ticks < 30, "pipeline did not terminate");
    }

    let mut last_state: HashMap<String, EntryState> = HashMap::new();
    for event in h.sink.events() {
        if let CacheEvent::StateChanged { key, from, to } = event {
            assert!(to > from, "{key} went back from {from} to {to}");
            if let Some(previous) = last_state.insert(key.clone(), to) {
                assert_eq!(previous, from);
            }
        }
    }

    let kite = h.cache.entry("kite").unwrap();
    assert_eq!(kite.state, EntryState::Done);
    assert_eq!(kite.expected_sub_item_count, Some(2));
    assert!(kite.content_hash.is_some());
    assert_eq!(h.cache.summary_fields("kite").unwrap().title, "Taxon 101");

    let photos = h.cache.sub_items_for_key("owl");
    assert_eq!(photos.len(), 3);
    assert_eq!(photos[2].source_url, sub_item_url("202", 3));
    assert_eq!(photos[2].author.as_deref(), Some("Author 3"));
    for photo in &photos {
        let local = photo.local_file_ref.as_deref().unwrap();
        assert!(root.path().join(local).is_file());
    }

    // Temporary pages are gone from the queue once parsed; sub-item files stay.
    let urls = urls();
    assert!(h.queue.find(&urls.first_page_url("101")).is_none());
    assert!(h.queue.find(&urls.page_url("101", 1)).is_none());
    assert!(h.queue.find(&urls.summary_url("101")).is_none());
    assert_eq!(h.queue.len(), 5);
}

#[tokio::test]
async fn entity_without_photos_skips_to_summary() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "303", 0);
    let h = harness(root.path(), transport, vec![TrackedKey::new("rare", "303")]);

    tick_until(&h, "rare", EntryState::Done).await;

    let entry = h.cache.entry("rare").unwrap();
    assert_eq!(entry.expected_sub_item_count, Some(0));
    assert!(entry.sub_items.is_empty());
    let visited: Vec<EntryState> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            CacheEvent::StateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert!(!visited.contains(&EntryState::WaitingAllPages));
    assert!(visited.contains(&EntryState::RequestingSummaryPage));
}

#[tokio::test]
async fn downloaded_sub_items_advance_to_summary_request() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);

    tick_until(&h, "kite", EntryState::WaitingAllSubItems).await;
    for index in 1..=2 {
        let item = h.queue.find(&sub_item_url("101", index)).unwrap();
        assert_eq!(item.status, TransferStatus::Downloaded);
    }

    h.cache.run_tick().await.unwrap();

    let entry = h.cache.entry("kite").unwrap();
    assert_eq!(entry.state, EntryState::RequestingSummaryPage);
    assert!(entry.content_hash.is_some());
    assert!(entry.sub_items.iter().all(|s| s.local_file_ref.is_some()));
}

#[tokio::test]
async fn removed_sub_item_fails_closed_until_key_is_removed() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);

    tick_until(&h, "kite", EntryState::ParsingAllPagesAndRequestingSubItems).await;
    h.online.set_online(false);
    h.cache.run_tick().await.unwrap();
    assert_eq!(h.cache.entry("kite").unwrap().state, EntryState::WaitingAllSubItems);
    assert_eq!(
        h.queue.find(&sub_item_url("101", 1)).unwrap().status,
        TransferStatus::Required
    );

    h.queue.remove(&sub_item_url("101", 1)).unwrap();
    let report = h.cache.run_tick().await.unwrap();
    assert_eq!(report.failed, 1);
    let failed = h.cache.entry("kite").unwrap();
    assert_eq!(failed.state, EntryState::Error);
    assert!(failed.last_error.unwrap().contains(&sub_item_url("101", 1)));

    // Error is terminal: further ticks neither retry nor report it again.
    h.online.set_online(true);
    let report = h.cache.run_tick().await.unwrap();
    assert_eq!((report.failed, report.advanced), (0, 0));
    assert_eq!(h.cache.entry("kite").unwrap().state, EntryState::Error);
    assert!(h.cache.sub_items_for_key("kite").is_empty());

    // Removing the key and letting the registry report it again starts over.
    assert!(h.cache.remove_key("kite").unwrap());
    assert!(h.queue.find(&sub_item_url("101", 2)).is_none());
    let report = h.cache.run_tick().await.unwrap();
    assert_eq!(report.discovered, 1);
    let fresh = h.cache.entry("kite").unwrap();
    assert_eq!(fresh.state, EntryState::WaitingFirstPage);
    assert!(fresh.last_error.is_none());
}

#[tokio::test]
async fn deleted_payload_of_downloaded_sub_item_fails_the_entry() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);

    tick_until(&h, "kite", EntryState::WaitingAllSubItems).await;
    let item = h.queue.find(&sub_item_url("101", 1)).unwrap();
    assert_eq!(item.status, TransferStatus::Downloaded);
    fs::remove_file(root.path().join(&item.local_file_ref)).unwrap();

    let report = h.cache.run_tick().await.unwrap();

    assert_eq!(report.failed, 1);
    let failed = h.cache.entry("kite").unwrap();
    assert_eq!(failed.state, EntryState::Error);
    assert!(failed.last_error.unwrap().contains("cannot read payload"));
    assert!(!h.cache.has_pending_work());
}

#[tokio::test]
async fn removed_page_fails_waiting_all_pages() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);

    tick_until(&h, "kite", EntryState::WaitingAllPages).await;
    h.queue.remove(&urls().page_url("101", 2)).unwrap();
    h.cache.run_tick().await.unwrap();

    assert_eq!(h.cache.entry("kite").unwrap().state, EntryState::Error);
}

#[tokio::test]
async fn one_failing_entry_does_not_stop_the_others() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 1);
    // "404" is never served: its first page download fails and the entry
    // keeps waiting for an explicit retry.
    let h = harness(
        root.path(),
        transport.clone(),
        vec![TrackedKey::new("kite", "101"), TrackedKey::new("ghost", "404")],
    );

    tick_until(&h, "kite", EntryState::Done).await;

    assert_eq!(h.cache.entry("ghost").unwrap().state, EntryState::WaitingFirstPage);
    let first_page = urls().first_page_url("404");
    assert_eq!(h.queue.find(&first_page).unwrap().status, TransferStatus::Failed);
    assert!(h.cache.has_pending_work());

    serve_entity(&transport, "404", 0);
    assert_eq!(h.queue.retry_failed().unwrap(), 1);
    tick_until(&h, "ghost", EntryState::Done).await;
}

#[tokio::test]
async fn reset_key_restarts_an_errored_entry() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 1);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);

    tick_until(&h, "kite", EntryState::WaitingAllPages).await;
    assert!(!h.cache.reset_key("kite").unwrap());
    h.queue.remove(&urls().page_url("101", 1)).unwrap();
    h.cache.run_tick().await.unwrap();

    assert!(h.cache.reset_key("kite").unwrap());
    assert_eq!(h.cache.entry("kite").unwrap().state, EntryState::New);
    tick_until(&h, "kite", EntryState::Done).await;
}

#[tokio::test]
async fn remove_all_drops_entries_and_their_payloads() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);
    tick_until(&h, "kite", EntryState::Done).await;
    let photo = h.cache.sub_items_for_key("kite")[0].clone();
    let payload = root.path().join(photo.local_file_ref.unwrap());
    assert!(payload.exists());

    assert_eq!(h.cache.remove_all().unwrap(), 1);

    assert!(h.cache.entries().is_empty());
    assert!(h.queue.is_empty());
    assert!(!payload.exists());
    assert!(h
        .sink
        .events()
        .contains(&CacheEvent::EntryRemoved { key: "kite".into() }));
}

#[tokio::test]
async fn state_survives_restart() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(root.path(), transport.clone(), vec![TrackedKey::new("kite", "101")]);
    tick_until(&h, "kite", EntryState::WaitingAllSubItems).await;
    let before: CacheEntry = h.cache.entry("kite").unwrap();
    let queue_before = h.queue.items();
    drop(h);

    let queue = Arc::new(
        TransferQueue::load(queue_settings(root.path()), transport, Arc::new(AlwaysOnline))
            .unwrap(),
    );
    assert_eq!(queue.items(), queue_before);
    let cache = AcquisitionCache::load(
        CacheSettings::with_root(root.path()),
        queue,
        Arc::new(StaticRegistry::new(vec![TrackedKey::new("kite", "101")])),
        Arc::new(SelectorPageParser::new(&ParserSelectors::default(), None).unwrap()),
        Arc::new(urls()),
    )
    .unwrap();
    assert_eq!(cache.entry("kite").unwrap(), before);

    for _ in 0..5 {
        cache.run_tick().await.unwrap();
    }
    assert_eq!(cache.entry("kite").unwrap().state, EntryState::Done);
    assert!(fs::read(root.path().join("cache.json")).unwrap().len() > 2);
}

#[tokio::test]
async fn keys_sharing_a_remote_id_both_complete() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(
        root.path(),
        transport,
        vec![TrackedKey::new("kite", "101"), TrackedKey::new("red-kite", "101")],
    );

    for _ in 0..20 {
        let report = h.cache.run_tick().await.unwrap();
        assert_eq!(report.failed, 0);
        if report.pending == 0 {
            break;
        }
    }

    for key in ["kite", "red-kite"] {
        assert_eq!(h.cache.entry(key).unwrap().state, EntryState::Done, "{key}");
    }
    assert_eq!(h.cache.sub_items_for_key("kite"), h.cache.sub_items_for_key("red-kite"));
    // Pages are removed by whichever entry parses them last.
    assert!(h.queue.find(&urls().first_page_url("101")).is_none());
    assert!(h.queue.find(&urls().summary_url("101")).is_none());
    assert_eq!(h.queue.len(), 2);
}

#[tokio::test]
async fn removing_a_key_keeps_files_another_entry_uses() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(
        root.path(),
        transport,
        vec![TrackedKey::new("kite", "101"), TrackedKey::new("red-kite", "101")],
    );
    tick_until(&h, "red-kite", EntryState::Done).await;
    assert_eq!(h.cache.entry("kite").unwrap().state, EntryState::Done);

    assert!(h.cache.remove_key("kite").unwrap());

    let photos = h.cache.sub_items_for_key("red-kite");
    assert_eq!(photos.len(), 2);
    for photo in &photos {
        assert!(h.queue.find(&photo.source_url).is_some());
        assert!(root.path().join(photo.local_file_ref.as_deref().unwrap()).is_file());
    }

    assert!(h.cache.remove_key("red-kite").unwrap());
    assert!(h.queue.is_empty());
    for photo in &photos {
        assert!(!root.path().join(photo.local_file_ref.as_deref().unwrap()).exists());
    }
}

#[tokio::test]
async fn stale_entry_is_released_and_acquired_again() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 1);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);
    let h = Harness {
        cache: h.cache.with_invalidation(Arc::new(MaxAge(Duration::zero()))),
        ..h
    };

    tick_until(&h, "kite", EntryState::Done).await;
    let photo = h.cache.sub_items_for_key("kite")[0].clone();
    let payload = root.path().join(photo.local_file_ref.unwrap());
    assert!(payload.is_file());

    h.cache.run_tick().await.unwrap();

    assert!(h.sink.events().contains(&CacheEvent::StateChanged {
        key: "kite".into(),
        from: EntryState::Done,
        to: EntryState::New,
    }));
    let restarted = h.cache.entry("kite").unwrap();
    assert_eq!(restarted.state, EntryState::WaitingFirstPage);
    assert!(restarted.sub_items.is_empty());
    assert!(restarted.content_hash.is_none());
    assert!(h.queue.find(&sub_item_url("101", 1)).is_none());
    assert!(!payload.exists());

    tick_until(&h, "kite", EntryState::Done).await;
    let first_page = urls().first_page_url("101");
    let fetches = h.transport.gets().iter().filter(|url| **url == first_page).count();
    assert_eq!(fetches, 2);
    let photos = h.cache.sub_items_for_key("kite");
    assert_eq!(photos.len(), 1);
    assert!(root.path().join(photos[0].local_file_ref.as_deref().unwrap()).is_file());
}
