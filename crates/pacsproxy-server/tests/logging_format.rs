// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::sync::{Arc, Mutex};

use pacsproxy_model::{ResourceKey, Uid};
use pacsproxy_server::{CacheMetrics, ConcurrencyLimiter, FetchCoordinator};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn json_lines(sink: &SharedBuffer) -> Vec<serde_json::Value> {
    let bytes = sink.0.lock().expect("lock output").clone();
    String::from_utf8(bytes)
        .expect("utf8 log output")
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("json log line"))
        .collect()
}

#[tokio::test]
async fn retrieval_lifecycle_is_logged_as_json() {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .json()
        .with_max_level(Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let coordinator: FetchCoordinator<u32> = FetchCoordinator::new(
        ConcurrencyLimiter::new(1),
        None,
        Arc::new(CacheMetrics::default()),
    );
    let key = ResourceKey::series(
        Uid::parse("1.2").expect("study"),
        Uid::parse("1.2.3").expect("series"),
    );
    let out = coordinator.retrieve(&key, |_| async { Ok(1) }).await;
    assert_eq!(out, Ok(1));

    let lines = json_lines(&sink);
    let start = lines
        .iter()
        .find(|l| l["fields"]["message"] == "retrieval start")
        .expect("start event");
    assert_eq!(start["level"], "INFO");
    assert_eq!(start["fields"]["key"], "1.2/1.2.3");
    let finish = lines
        .iter()
        .find(|l| l["fields"]["message"] == "retrieval finished")
        .expect("finish event");
    assert!(finish["fields"]["elapsed_ms"].is_u64());
}
