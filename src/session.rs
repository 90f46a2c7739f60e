use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Deserialize;
use walkdir::WalkDir;

/// Directory under each Gemini home that holds per-project chat logs.
pub const SESSIONS_DIR: &str = "tmp";
const CHATS_DIR: &str = "chats";
const MODEL_RESPONSE: &str = "gemini";

/// One recorded chat session, as written by the Gemini CLI.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens: Option<TokenBreakdown>,
}

impl SessionMessage {
    pub fn is_model_response(&self) -> bool {
        self.kind == MODEL_RESPONSE
    }
}

/// Token counts of one model response. Absent fields stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenBreakdown {
    pub input: Option<u64>,
    pub cached: Option<u64>,
    pub output: Option<u64>,
    pub thoughts: Option<u64>,
}

impl TokenBreakdown {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("input", self.input),
            ("cached", self.cached),
            ("output", self.output),
            ("thoughts", self.thoughts),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Supplies the session records the dashboard aggregates on load and refresh.
pub trait SessionSource {
    fn load(&self) -> Result<Vec<SessionRecord>>;
}

/// Session logs discovered under one or more Gemini home directories.
pub struct SessionDirs {
    data_dirs: Vec<PathBuf>,
}

impl SessionDirs {
    pub fn new(data_dirs: Vec<PathBuf>) -> Self {
        SessionDirs { data_dirs }
    }

    pub fn data_dirs(&self) -> &[PathBuf] {
        &self.data_dirs
    }
}

impl SessionSource for SessionDirs {
    fn load(&self) -> Result<Vec<SessionRecord>> {
        let files = collect_session_files(&self.data_dirs);
        tracing::debug!(files = files.len(), "discovered session files");
        load_sessions(&files)
    }
}

pub fn collect_session_files(data_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for dir in data_dirs {
        let root = dir.join(SESSIONS_DIR);
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.into_path();
            if is_session_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn is_session_file(path: &Path) -> bool {
    let in_chats = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        == Some(CHATS_DIR);
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("session-") && n.ends_with(".json"));
    in_chats && name_ok
}

pub fn load_sessions(files: &[PathBuf]) -> Result<Vec<SessionRecord>> {
    let records: Vec<SessionRecord> = files
        .par_iter()
        .filter_map(|file| match read_session(file) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::debug!(file = %file.display(), error = %err, "skipping session file");
                None
            }
        })
        .collect();
    Ok(records)
}

pub fn read_session(path: &Path) -> Result<SessionRecord> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading session {}", path.display()))?;
    parse_session(&content, path)
}

fn parse_session(content: &str, path: &Path) -> Result<SessionRecord> {
    let mut record: SessionRecord = serde_json::from_str(content)
        .with_context(|| format!("parsing session {}", path.display()))?;
    if record.session_id.is_empty() {
        record.session_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gemini_session_document() {
        let json = r#"{
            "sessionId": "abc",
            "startTime": "2026-01-20T12:00:00Z",
            "messages": [
                {"type": "user", "content": "hello"},
                {"type": "gemini", "model": "gemini-2.5-flash",
                 "tokens": {"input": 100, "cached": 50, "output": 20, "thoughts": 10}}
            ]
        }"#;
        let record = parse_session(json, Path::new("session-1.json")).unwrap();
        assert_eq!(record.session_id, "abc");
        assert_eq!(record.messages.len(), 2);
        assert!(!record.messages[0].is_model_response());
        assert!(record.messages[1].is_model_response());
        assert_eq!(record.messages[1].tokens.unwrap().thoughts, Some(10));
    }

    #[test]
    fn missing_session_id_falls_back_to_file_stem() {
        let record =
            parse_session(r#"{"startTime": "2026-01-20T00:00:00Z"}"#, Path::new("session-9.json"))
                .unwrap();
        assert_eq!(record.session_id, "session-9");
        assert!(record.messages.is_empty());
    }

    #[test]
    fn reports_missing_token_fields() {
        let tokens: TokenBreakdown = serde_json::from_str(r#"{"input": 5}"#).unwrap();
        assert_eq!(tokens.missing_fields(), vec!["cached", "output", "thoughts"]);
    }

    #[test]
    fn discovers_only_chat_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let chats = dir.path().join(SESSIONS_DIR).join("proj").join(CHATS_DIR);
        std::fs::create_dir_all(&chats).unwrap();
        std::fs::write(chats.join("session-1.json"), "{}").unwrap();
        std::fs::write(chats.join("notes.json"), "{}").unwrap();
        std::fs::write(dir.path().join(SESSIONS_DIR).join("proj").join("session-2.json"), "{}")
            .unwrap();
        std::fs::write(chats.join("session-3.json"), "not json").unwrap();

        let files = collect_session_files(&[dir.path().to_path_buf()]);
        assert_eq!(files.len(), 2);
        let records = SessionDirs::new(vec![dir.path().to_path_buf()]).load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, "session-1");
    }
}
