#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use photocache_core::{StaticRegistry, TemplateUrls, TrackedKey, UrlScheme};
use photocache_engine::{
    AcquisitionCache, CacheEvent, CacheSettings, ChangeSink, ConnectivityFlag, FailureKind,
    FetchError, FetchMetadata, FetchOutput, ParserSelectors, QueueSettings, SelectorPageParser,
    Transport, TransferQueue,
};

/// In-memory network: serves registered bodies, 404 for anything else.
#[derive(Default)]
pub struct FakeTransport {
    bodies: Mutex<HashMap<String, (Vec<u8>, &'static str)>>,
    gets: Mutex<Vec<String>>,
    posts: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn serve_html(&self, url: &str, html: &str) {
        self.serve(url, html.as_bytes().to_vec(), "text/html; charset=utf-8");
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>, content_type: &'static str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), (bytes, content_type));
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    async fn respond(&self, url: &str) -> Result<FetchOutput, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let found = self.bodies.lock().unwrap().get(url).cloned();
        match found {
            Some((bytes, content_type)) => Ok(FetchOutput {
                metadata: FetchMetadata {
                    original_url: url.to_string(),
                    final_url: url.to_string(),
                    status: 200,
                    content_type: Some(content_type.to_string()),
                    byte_len: bytes.len() as u64,
                },
                bytes,
            }),
            None => Err(FetchError {
                kind: FailureKind::HttpStatus(404),
                message: "404 Not Found".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<FetchOutput, FetchError> {
        self.gets.lock().unwrap().push(url.to_string());
        self.respond(url).await
    }

    async fn post(&self, url: &str, body: String) -> Result<FetchOutput, FetchError> {
        self.posts.lock().unwrap().push((url.to_string(), body));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(FetchOutput {
            bytes: Vec::new(),
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url: url.to_string(),
                status: 200,
                content_type: None,
                byte_len: 0,
            },
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ChangeSink for RecordingSink {
    fn notify(&self, event: &CacheEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn urls() -> TemplateUrls {
    TemplateUrls::new(
        "https://photos.example/taxa/{id}",
        "https://photos.example/taxa/{id}/photos?page={page}",
        "https://photos.example/about/{id}",
    )
}

pub fn sub_item_url(remote_id: &str, index: u32) -> String {
    format!("https://img.example/{remote_id}/{index}.jpg")
}

/// Serves a complete remote site for `remote_id` with `photos` paged pages.
pub fn serve_entity(transport: &FakeTransport, remote_id: &str, photos: u32) {
    let urls = urls();
    transport.serve_html(
        &urls.first_page_url(remote_id),
        &format!(r#"<html><body><div class="photo-count">{photos} photos</div></body></html>"#),
    );
    for index in 1..=photos {
        transport.serve_html(
            &urls.page_url(remote_id, index),
            &format!(
                r#"<html><body><img class="photo" src="{}">
                <span class="photo-author">Author {index}</span>
                <span class="photo-label">Photo {index}</span></body></html>"#,
                sub_item_url(remote_id, index)
            ),
        );
        transport.serve(
            &sub_item_url(remote_id, index),
            format!("jpeg bytes {remote_id} {index}").into_bytes(),
            "image/jpeg",
        );
    }
    transport.serve_html(
        &urls.summary_url(remote_id),
        &format!("<html><body><h1>Taxon {remote_id}</h1><h2>Latin</h2><p class=description>About it.</p></body></html>"),
    );
}

pub fn queue_settings(root: &Path) -> QueueSettings {
    QueueSettings::with_root(root.to_path_buf())
}

pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub online: Arc<ConnectivityFlag>,
    pub queue: Arc<TransferQueue>,
    pub cache: AcquisitionCache,
    pub sink: Arc<RecordingSink>,
}

pub fn harness(root: &Path, transport: Arc<FakeTransport>, keys: Vec<TrackedKey>) -> Harness {
    photocache_logging::initialize_for_tests();
    let online = Arc::new(ConnectivityFlag::new(true));
    let queue = Arc::new(TransferQueue::new(
        queue_settings(root),
        transport.clone(),
        online.clone(),
    ));
    let parser = SelectorPageParser::new(&ParserSelectors::default(), None).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let cache = AcquisitionCache::new(
        CacheSettings::with_root(root),
        queue.clone(),
        Arc::new(StaticRegistry::new(keys)),
        Arc::new(parser),
        Arc::new(urls()),
    )
    .with_change_sink(sink.clone());
    Harness {
        transport,
        online,
        queue,
        cache,
        sink,
    }
}
