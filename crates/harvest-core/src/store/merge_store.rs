//! MergeStore - 実行キーごとの JSON ドキュメントを読み込み・マージ・書き戻す
//!
//! # 方針
//! - 壊れたファイルは上書きも黙殺もしない。`.corrupted` に退避し、退避できなければ削除する
//!   （書き込み経路が恒久的に塞がらないように）。
//! - 書き込みは一時ファイル + rename。途中まで書かれたファイルは残さない。
//! - あるターゲットへの書き込み失敗は他のターゲットを止めない。どこにも書けなければ `None`。

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, error, info, warn};

use super::document::{Document, merge_documents, reorder_keys};
use crate::domain::{HarvestError, RunKey};

pub const QUARANTINE_SUFFIX: &str = ".corrupted";

/// Directory layout of one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetLayout {
    /// `<root>/<file>`
    #[default]
    Flat,
    /// `<root>/<site>/<YYYY.MM.DD>/<file>`
    SiteDate,
}

/// One output location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub root: PathBuf,
    #[serde(default)]
    pub layout: TargetLayout,
    /// A fragment containing any of these modules is not written to this target.
    #[serde(default)]
    pub skip_modules: BTreeSet<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, layout: TargetLayout) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            layout,
            skip_modules: BTreeSet::new(),
        }
    }

    pub fn with_skip_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn path_for(&self, key: &RunKey) -> PathBuf {
        match self.layout {
            TargetLayout::Flat => self.root.join(key.file_name()),
            TargetLayout::SiteDate => self
                .root
                .join(&key.site)
                .join(key.date_folder())
                .join(key.file_name()),
        }
    }

    fn skips<'a>(&self, fragment: &'a Document) -> Option<&'a str> {
        fragment
            .keys()
            .find(|k| self.skip_modules.contains(k.as_str()))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct MergeStore {
    targets: Vec<Target>,
    module_order: Vec<String>,
}

impl MergeStore {
    pub fn new(targets: Vec<Target>, module_order: Vec<String>) -> Self {
        Self {
            targets,
            module_order,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Merge `fragment` into the document for `key` on every applicable target.
    ///
    /// Returns the first path written, or `None` when nothing could be written.
    pub fn merge_and_write(&self, fragment: &Document, key: &RunKey) -> Option<PathBuf> {
        let applicable: Vec<(&Target, PathBuf)> = self
            .targets
            .iter()
            .filter(|target| match target.skips(fragment) {
                Some(module) => {
                    info!(output = %target.name, module, "skipping target for this document");
                    false
                }
                None => true,
            })
            .map(|target| (target, target.path_for(key)))
            .collect();

        if applicable.is_empty() {
            warn!(run_key = %key, "no applicable output target");
            return None;
        }

        // 全ターゲットを検査する（壊れたファイルはすべて退避）。最初の正常なものをベースにする
        let mut base = None;
        for (target, path) in &applicable {
            if let Some(existing) = load_existing(path) {
                debug!(output = %target.name, path = %path.display(), "loaded existing document");
                if base.is_none() {
                    base = Some(existing);
                }
            }
        }

        let merged = merge_documents(base.unwrap_or_default(), fragment.clone());
        let document = reorder_keys(merged, &self.module_order);
        let bytes = match to_pretty_json(&document) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(run_key = %key, %err, "failed to serialize document");
                return None;
            }
        };

        let mut written = None;
        for (target, path) in applicable {
            match write_atomic(&path, &bytes) {
                Ok(()) => {
                    info!(output = %target.name, path = %path.display(), "document written");
                    written.get_or_insert(path);
                }
                Err(err) => {
                    error!(output = %target.name, path = %path.display(), %err, "failed to write document");
                }
            }
        }

        if written.is_none() {
            error!(run_key = %key, "document could not be written to any target");
        }
        written
    }
}

/// Read an existing document. Missing and empty files yield `None`; corrupt files are
/// quarantined and also yield `None`.
fn load_existing(path: &Path) -> Option<Document> {
    let metadata = fs::metadata(path).ok()?;
    if metadata.len() == 0 {
        return None;
    }
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), %err, "existing document unreadable");
            return None;
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!(path = %path.display(), "existing document is not a JSON object");
            quarantine(path);
            None
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "existing document is corrupted");
            quarantine(path);
            None
        }
    }
}

pub fn quarantine_path(path: &Path) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(QUARANTINE_SUFFIX);
    PathBuf::from(raw)
}

/// Move a corrupt file aside; delete it if it cannot be moved.
fn quarantine(path: &Path) {
    let backup = quarantine_path(path);
    if backup.exists() {
        if let Err(err) = fs::remove_file(&backup) {
            warn!(path = %backup.display(), %err, "failed to remove previous quarantine file");
        }
    }
    match fs::rename(path, &backup) {
        Ok(()) => warn!(path = %path.display(), backup = %backup.display(), "quarantined corrupted document"),
        Err(err) => {
            error!(path = %path.display(), %err, "failed to quarantine corrupted document");
            match fs::remove_file(path) {
                Ok(()) => warn!(path = %path.display(), "deleted corrupted document"),
                Err(err) => error!(path = %path.display(), %err, "failed to delete corrupted document"),
            }
        }
    }
}

/// Pretty JSON with 4-space indentation and a trailing newline.
pub fn to_pretty_json(document: &Document) -> Result<Vec<u8>, HarvestError> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents).map_err(|e| HarvestError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| HarvestError::io(path, e))?;
    Ok(())
}
