#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use regrets_reporter_lib::instrumentation::RawEvent;
use regrets_reporter_lib::sharing::{DataPointKind, DataSink, SharedDataPoint};
use regrets_reporter_lib::store::{MemoryStorageArea, Store};
use regrets_reporter_lib::{ExtensionGlue, PipelineConfig};
use serde_json::{json, Value};

#[derive(Default)]
pub struct RecordingSink {
    pub failing: AtomicBool,
    received: Mutex<Vec<SharedDataPoint>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<SharedDataPoint> {
        self.received.lock().unwrap().clone()
    }

    pub fn count_of(&self, kind: DataPointKind) -> usize {
        self.received().iter().filter(|p| p.kind() == kind).count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataSink for RecordingSink {
    async fn transmit(&self, point: &SharedDataPoint) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("sink offline");
        }
        self.received.lock().unwrap().push(point.clone());
        Ok(())
    }
}

pub fn memory_store() -> Store {
    Store::new(Arc::new(MemoryStorageArea::new()))
}

pub fn glue_with_sink() -> (ExtensionGlue, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let glue = ExtensionGlue::new(PipelineConfig::default(), memory_store(), sink.clone());
    (glue, sink)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

pub fn raw_event(kind: &str, uuid: &str, tab: i64, timestamp: DateTime<Utc>, payload: Value) -> RawEvent {
    serde_json::from_value(json!({
        "type": kind,
        "navigationUuid": uuid,
        "tabId": tab,
        "timestamp": timestamp,
        "payload": payload,
    }))
    .unwrap()
}

pub fn navigation_start(uuid: &str, tab: i64, url: &str, timestamp: DateTime<Utc>) -> RawEvent {
    raw_event(
        "navigation",
        uuid,
        tab,
        timestamp,
        json!({"url": url, "phase": "committed", "transitionType": "link"}),
    )
}

pub fn navigation_completed(uuid: &str, tab: i64, url: &str, timestamp: DateTime<Utc>) -> RawEvent {
    raw_event("navigation", uuid, tab, timestamp, json!({"url": url, "phase": "completed"}))
}

pub fn http_response(uuid: &str, tab: i64, url: &str, body: Option<&str>, timestamp: DateTime<Utc>) -> RawEvent {
    raw_event(
        "http",
        uuid,
        tab,
        timestamp,
        json!({
            "url": url,
            "phase": "response",
            "resourceType": "main_frame",
            "statusCode": 200,
            "responseBody": body,
        }),
    )
}
