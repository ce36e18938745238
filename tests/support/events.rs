use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use dx_streams::{StreamEvent, SyncConfig};

/// Short timings so the flows finish quickly on real time.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        data_debounce: Duration::from_millis(60),
        metadata_debounce: Duration::from_millis(40),
        reconnect_debounce: Duration::from_millis(100),
        readiness_poll: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
        ..SyncConfig::default()
    }
}

/// Returns the first event matching `pred`, skipping others. Panics after 5s.
pub async fn expect_event(
    events: &mut UnboundedReceiver<StreamEvent<Value>>,
    mut pred: impl FnMut(&StreamEvent<Value>) -> bool,
) -> StreamEvent<Value> {
    let wait = async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event")
}
