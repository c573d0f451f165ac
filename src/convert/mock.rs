use super::ConvertService;
use crate::models::MediaKind;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Minimal GIF header returned by the mock for every successful conversion.
pub const MOCK_GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

#[derive(Clone)]
pub struct MockConverter {
    failing_kinds: Arc<Mutex<HashSet<MediaKind>>>,
    failing_inputs: Arc<Mutex<HashSet<Vec<u8>>>>,
    convert_count: Arc<Mutex<usize>>,
}

impl MockConverter {
    pub fn new() -> Self {
        Self {
            failing_kinds: Arc::new(Mutex::new(HashSet::new())),
            failing_inputs: Arc::new(Mutex::new(HashSet::new())),
            convert_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_failure_for(self, kind: MediaKind) -> Self {
        self.failing_kinds.lock().unwrap().insert(kind);
        self
    }

    /// Fails any conversion whose input bytes equal `data`.
    pub fn with_failure_on_input(self, data: &[u8]) -> Self {
        self.failing_inputs.lock().unwrap().insert(data.to_vec());
        self
    }

    pub fn get_convert_count(&self) -> usize {
        *self.convert_count.lock().unwrap()
    }
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConvertService for MockConverter {
    async fn convert(&self, kind: MediaKind, data: Bytes) -> Result<Bytes> {
        *self.convert_count.lock().unwrap() += 1;

        if kind == MediaKind::Unsupported {
            return Err(Error::Unsupported("mock".to_string()));
        }
        if self.failing_kinds.lock().unwrap().contains(&kind) {
            return Err(Error::Encode(format!("Mock failure for {}", kind.as_str())));
        }
        if self.failing_inputs.lock().unwrap().contains(data.as_ref()) {
            return Err(Error::Decode("Mock failure for input".to_string()));
        }

        Ok(Bytes::from_static(MOCK_GIF))
    }
}
