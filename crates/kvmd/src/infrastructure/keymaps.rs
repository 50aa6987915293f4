//! Stage-1 state sources with fixed tags.
//!
//! These are not registry adapters: they have no lifecycle, they just answer
//! once per new realtime session.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::application::StateSource;
use crate::domain::config::KeymapsConfig;

pub const KEYMAPS_EVENT: &str = "hid_keymaps_state";
pub const OCR_EVENT: &str = "streamer_ocr_state";

/// Keymap catalog: every file name in the keymaps directory.
pub struct KeymapsSource {
    dir: PathBuf,
    default: String,
}

impl KeymapsSource {
    pub fn new(config: &KeymapsConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            default: config.default.clone(),
        }
    }

    async fn available(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("can't list keymaps in {}", self.dir.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl StateSource for KeymapsSource {
    fn event_type(&self) -> &str {
        KEYMAPS_EVENT
    }

    async fn fetch(&self) -> anyhow::Result<Value> {
        let available = self.available().await?;
        Ok(json!({
            "keymaps": {
                "default": self.default,
                "available": available,
            }
        }))
    }
}

/// OCR capability.  No recognizer is wired in, so it always reports
/// disabled with no languages.
#[derive(Default)]
pub struct OcrSource;

#[async_trait]
impl StateSource for OcrSource {
    fn event_type(&self) -> &str {
        OCR_EVENT
    }

    async fn fetch(&self) -> anyhow::Result<Value> {
        Ok(json!({
            "ocr": {
                "enabled": false,
                "langs": {"default": [], "available": []},
            }
        }))
    }
}
