use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use quill_core::{
    Block, EntryId, EntryManager, EventBus, HttpRemoteStore, JournalEntry, SqliteStore,
    StaticSession, SyncConfig, SyncOp, SyncTask,
};
use serde::Serialize;

use crate::cli::Cli;
use crate::error::CliError;

/// Placeholder endpoint for commands that never reach the network
const OFFLINE_API_URL: &str = "http://localhost:8787";
const SHORT_ID_LEN: usize = 18;

pub type CliManager = EntryManager<SqliteStore, HttpRemoteStore>;

/// Effective configuration after merging flags, environment and defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub api_url: Option<String>,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self, CliError> {
        Self::resolve_with(cli, |key| env::var(key).ok())
    }

    /// Flags win over `lookup`, which is consulted for `QUILL_*` variables.
    pub fn resolve_with(
        cli: &Cli,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CliError> {
        let pick = |flag: Option<&String>, key: &str| {
            non_empty(flag.cloned()).or_else(|| non_empty(lookup(key)))
        };

        let db_path = match cli.db_path.clone() {
            Some(path) => path,
            None => match non_empty(lookup("QUILL_DB_PATH")) {
                Some(path) => PathBuf::from(path),
                None => default_db_path()?,
            },
        };

        Ok(Self {
            db_path,
            api_url: pick(cli.api_url.as_ref(), "QUILL_API_URL"),
            access_token: pick(cli.access_token.as_ref(), "QUILL_ACCESS_TOKEN"),
            user_id: pick(cli.user.as_ref(), "QUILL_USER_ID"),
            config_path: cli
                .config
                .clone()
                .or_else(|| non_empty(lookup("QUILL_CONFIG")).map(PathBuf::from)),
        })
    }

    pub fn require_user(&self) -> Result<&str, CliError> {
        self.user_id.as_deref().ok_or(CliError::UserNotConfigured)
    }

    pub fn sync_config(&self) -> Result<SyncConfig, CliError> {
        match &self.config_path {
            Some(path) => Ok(SyncConfig::load(path)?),
            None => Ok(SyncConfig::default()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("quill").join("quill.db"))
        .ok_or(CliError::NoDataDir)
}

/// Open the local database and wire a manager around it
pub fn open_manager(settings: &Settings, bus: EventBus) -> Result<CliManager, CliError> {
    let store = SqliteStore::open(&settings.db_path)?;
    let remote = HttpRemoteStore::new(
        settings.api_url.as_deref().unwrap_or(OFFLINE_API_URL),
        settings.access_token.clone(),
    )?;
    let session = settings.user_id.as_ref().map_or_else(StaticSession::signed_out, |user| {
        StaticSession::signed_in(user.clone(), settings.access_token.clone())
    });

    Ok(EntryManager::builder(Arc::new(store), remote)
        .session(session)
        .bus(bus)
        .config(settings.sync_config()?)
        .build()?)
}

/// Find an entry by exact id or unique id prefix among `owner_id`'s entries
pub fn resolve_entry(
    query: &str,
    owner_id: &str,
    manager: &CliManager,
) -> Result<JournalEntry, CliError> {
    if let Ok(id) = query.parse::<EntryId>() {
        if let Some(entry) = manager.get_entry(&id)? {
            if entry.owner_id == owner_id {
                return Ok(entry);
            }
        }
    }

    let mut matching = manager
        .list_entries(owner_id)?
        .into_iter()
        .filter(|entry| entry.id.as_str().starts_with(query))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::EntryNotFound(query.to_string())),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|entry| short_id(&entry.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousEntryId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Split text into paragraph blocks on blank lines.
///
/// Blocks at the same position in `existing` keep their id and kind so edits
/// do not churn block identity or flatten headings and todos.
pub fn text_to_blocks(text: &str, existing: &[Block], now: i64) -> Vec<Block> {
    split_paragraphs(text)
        .into_iter()
        .enumerate()
        .map(|(index, paragraph)| match existing.get(index) {
            Some(previous) => Block {
                id: previous.id.clone(),
                content: previous.content.with_text(paragraph),
                created_at: previous.created_at,
            },
            None => Block::paragraph(paragraph, now),
        })
        .collect()
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

pub fn entry_text(entry: &JournalEntry) -> String {
    entry
        .blocks
        .iter()
        .map(Block::text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn short_id(id: &EntryId) -> String {
    id.as_str().chars().take(SHORT_ID_LEN).collect()
}

#[derive(Debug, Serialize)]
pub struct EntryListItem {
    pub id: String,
    pub date: String,
    pub kind: String,
    pub preview: String,
    pub text: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub unsynced: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub entry_id: String,
    pub op: SyncOp,
    pub attempts: u32,
    pub next_attempt: String,
    pub last_error: Option<String>,
}

pub fn entry_to_list_item(entry: &JournalEntry, unsynced: bool, now_ms: i64) -> EntryListItem {
    EntryListItem {
        id: entry.id.to_string(),
        date: entry.date.to_string(),
        kind: kind_label(entry),
        preview: entry_preview(entry, 80),
        text: entry_text(entry),
        created_at: entry.created_at,
        updated_at: entry.updated_at,
        relative_time: format_relative_time(entry.updated_at, now_ms),
        unsynced,
    }
}

pub fn task_to_queue_item(task: &SyncTask) -> QueueItem {
    QueueItem {
        entry_id: task.entry_id.to_string(),
        op: task.op,
        attempts: task.attempts,
        next_attempt: format_timestamp(task.next_eligible_at),
        last_error: task.last_error.map(|kind| format!("{kind:?}").to_lowercase()),
    }
}

pub fn format_entry_lines(entries: &[(JournalEntry, bool)], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|(entry, unsynced)| {
            let marker = if *unsynced { "*" } else { " " };
            let id = short_id(&entry.id);
            let preview = entry_preview(entry, 40);
            let relative_time = format_relative_time(entry.updated_at, now_ms);
            format!(
                "{marker} {id:<18}  {}  {:<10}  {preview:<40}  {relative_time}",
                entry.date,
                kind_label(entry)
            )
        })
        .collect()
}

pub fn format_queue_lines(tasks: &[SyncTask]) -> Vec<String> {
    tasks
        .iter()
        .map(|task| {
            let item = task_to_queue_item(task);
            let op = format!("{:?}", item.op).to_lowercase();
            let mut line = format!(
                "{op:<6}  {}  attempts={}  next={}",
                item.entry_id, item.attempts, item.next_attempt
            );
            if let Some(error) = item.last_error {
                line.push_str("  last_error=");
                line.push_str(&error);
            }
            line
        })
        .collect()
}

fn kind_label(entry: &JournalEntry) -> String {
    serde_json::to_value(entry.kind)
        .ok()
        .and_then(|value| value.as_str().map(ToString::to_string))
        .unwrap_or_default()
}

pub fn entry_preview(entry: &JournalEntry, max_chars: usize) -> String {
    let text = entry.preview(usize::MAX);
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn resolve_entry_text(text_parts: &[String]) -> Result<String, CliError> {
    if let Some(text) = normalize_content(&text_parts.join(" ")) {
        return Ok(text);
    }

    if let Some(text) = read_piped_stdin()? {
        return Ok(text);
    }

    if let Some(text) = capture_editor_input_with_initial("")? {
        return Ok(text);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_entry_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyEntryId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_entry_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let status = Command::new(program).args(parts).arg(file_path).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_entry_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("quill-entry-{}-{now}.md", std::process::id()))
}
