use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Build a log root with the `projects/<session-dir>/<file>.jsonl` layout
/// the discovery module expects.
pub fn setup_log_root() -> Result<TempDir> {
    let root = tempfile::tempdir()?;
    fs::create_dir_all(root.path().join("projects"))?;
    Ok(root)
}

pub fn write_jsonl(root: &Path, session_dir: &str, file_name: &str, lines: &[String]) -> Result<PathBuf> {
    let dir = root.join("projects").join(session_dir);
    fs::create_dir_all(&dir)?;
    let path = dir.join(file_name);
    fs::write(&path, format!("{}\n", lines.join("\n")))?;
    Ok(path)
}

#[allow(dead_code)]
pub fn append_jsonl(path: &Path, lines: &[String]) -> Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new().append(true).open(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// One usage record line in the on-disk schema.
pub fn usage_line(
    timestamp: &str,
    session_id: &str,
    request_id: &str,
    message_id: &str,
    input_tokens: u64,
    output_tokens: u64,
) -> String {
    format!(
        r#"{{"timestamp":"{}","sessionId":"{}","requestId":"{}","message":{{"id":"{}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{},"output_tokens":{},"cache_creation_input_tokens":0,"cache_read_input_tokens":0}}}},"costUSD":0.01}}"#,
        timestamp, session_id, request_id, message_id, input_tokens, output_tokens
    )
}
