//! [`FakeRemote`], an in-memory remote endpoint for proxy tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use artifact_core::{RemoteClient, RemoteError, RemoteResponse};
use artifact_fs::checksum::compute_content_checksums;
use artifact_fs::{ChecksumAlgorithm, Checksums};

#[derive(Debug, Clone)]
struct Served {
    body: Vec<u8>,
    checksums: Checksums,
}

/// Remote serving registered URLs, with scriptable failures and latency.
#[derive(Debug, Default)]
pub struct FakeRemote {
    served: Mutex<HashMap<String, Served>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `body` at `url`, declaring its correct SHA-1.
    pub fn serve(&self, url: &str, body: &[u8]) {
        let checksums = compute_content_checksums(body, &[ChecksumAlgorithm::Sha1]);
        self.serve_with_checksums(url, body, checksums);
    }

    /// Serve `body` at `url` declaring arbitrary digests.
    pub fn serve_with_checksums(&self, url: &str, body: &[u8], checksums: Checksums) {
        self.served.lock().unwrap().insert(
            url.to_string(),
            Served {
                body: body.to_vec(),
                checksums,
            },
        );
    }

    /// Fail the next `times` fetches of `url` with a transient error.
    pub fn fail_transiently(&self, url: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
    }

    /// Sleep this long in every fetch.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Fetches made so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl RemoteClient for FakeRemote {
    fn fetch(&self, url: &str) -> Result<RemoteResponse, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        if let Some(remaining) = self.transient_failures.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transient("connection reset".into()));
            }
        }

        match self.served.lock().unwrap().get(url) {
            Some(served) => Ok(RemoteResponse::new(Cursor::new(served.body.clone()))
                .with_checksums(served.checksums.clone())),
            None => Err(RemoteError::NotFound),
        }
    }
}
