//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use dist_tracker::clock::MockClock;
use dist_tracker::config::{Config, Layers};
use dist_tracker::dispatch::MemorySink;
use dist_tracker::emitter::Emitter;
use dist_tracker::model::{DeviceContext, Size};
use dist_tracker::payload::EventPayloadBuilder;
use dist_tracker::sequence::SequenceCounter;
use dist_tracker::session::SessionContext;
use dist_tracker::store::{MemoryStore, Store};

pub const SDK_ID: &str = "sdk-test";
pub const DISTRIBUTOR: &str = "acme-benefits";

pub struct Harness {
    pub emitter: Arc<Emitter>,
    pub sink: Arc<MemorySink>,
    pub clock: MockClock,
    pub store: Arc<dyn Store>,
}

pub fn device() -> DeviceContext {
    DeviceContext {
        user_id: Some("user-42".to_string()),
        user_agent: "DistApp/3.1 (iOS 17.4)".to_string(),
        platform: "ios".to_string(),
        os_version: "17.4".to_string(),
        app_version: "3.1.0".to_string(),
        language: "en-US".to_string(),
        timezone: "America/New_York".to_string(),
        screen: Size {
            width: 1179,
            height: 2556,
        },
        viewport: Size {
            width: 393,
            height: 852,
        },
    }
}

pub fn harness() -> Harness {
    let clock = MockClock::fixed();
    let sink = Arc::new(MemorySink::new());
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let emitter = Arc::new(Emitter::new(
        EventPayloadBuilder::new(DISTRIBUTOR, device()),
        SequenceCounter::new(Arc::clone(&store)),
        SessionContext::new(Arc::clone(&store), Arc::new(clock.clone())),
        sink.clone(),
        Arc::new(clock.clone()),
    ));
    Harness {
        emitter,
        sink,
        clock,
        store,
    }
}

/// A config resolved from explicit values only (no process env).
pub fn config(base_url: &str) -> Config {
    let base_url = base_url.to_string();
    Config::resolve_with(Layers {
        overrides: None,
        env: move |name: &str| match name {
            "DIST_TRACKER_BASE_URL" => Some(base_url.clone()),
            "DIST_TRACKER_SDK_ID" => Some(SDK_ID.to_string()),
            "DIST_TRACKER_DISTRIBUTOR" => Some(DISTRIBUTOR.to_string()),
            _ => None,
        },
        manifest: None,
    })
    .expect("test config should resolve")
}
