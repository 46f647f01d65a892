use std::fs::File;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ImportConfig, DEFAULT_BATCH_SIZE};
use crate::db::{open_archive, reset_archive};
use crate::error::CoreError;
use crate::models::{MessageRow, ThreadRow};

#[path = "importer/batch.rs"]
mod batch;
#[path = "importer/export.rs"]
pub mod export;
#[path = "importer/stats.rs"]
mod stats;
#[path = "importer/stream.rs"]
mod stream;

use batch::{FlushCounts, ImportBatch};
use export::{ExportMessage, ExportThread};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Messages buffered before one transactional flush.
    pub batch_size: usize,
    /// Stored on every thread row when set.
    pub guild_id: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            guild_id: None,
        }
    }
}

impl From<&ImportConfig> for ImportOptions {
    fn from(config: &ImportConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub import_id: String,
    pub threads: i64,
    pub messages: i64,
    pub users: i64,
    pub attachments: i64,
    pub reactions: i64,
    pub mentions: i64,
    pub duplicate_messages: i64,
    pub skipped_threads: i64,
    pub skipped_messages: i64,
    pub flushes: usize,
}

impl ImportReport {
    fn absorb(&mut self, counts: FlushCounts) {
        self.threads += counts.threads;
        self.messages += counts.messages;
        self.duplicate_messages += counts.duplicate_messages;
        self.attachments += counts.attachments;
        self.reactions += counts.reactions;
        self.mentions += counts.mentions;
        self.flushes += 1;
    }
}

pub fn import_export(source_path: &Path, archive_path: &Path, options: &ImportOptions) -> Result<ImportReport, CoreError> {
    import_export_with_progress(source_path, archive_path, options, |_| {})
}

/// Rebuilds the archive at `archive_path` from the export document at
/// `source_path`. Any existing archive is discarded first.
///
/// On a malformed document the batches flushed so far stay committed and
/// [`CoreError::ImportAborted`] reports how much made it in.
pub fn import_export_with_progress<F>(
    source_path: &Path,
    archive_path: &Path,
    options: &ImportOptions,
    progress: F,
) -> Result<ImportReport, CoreError>
where
    F: Fn(&str),
{
    if options.batch_size == 0 {
        return Err(CoreError::InvalidArgument("batch size must be >= 1".to_string()));
    }
    if !source_path.is_file() {
        return Err(CoreError::InvalidArgument(format!(
            "export file not found: {}",
            source_path.display()
        )));
    }
    let source = File::open(source_path)?;
    let source_filename = source_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("export.json")
        .to_string();

    progress("Preparing archive...");
    reset_archive(archive_path)?;
    let mut archive = open_archive(archive_path)?;

    let import_id = Uuid::new_v4().to_string();
    archive.conn.execute(
        "INSERT INTO imports (id, imported_at, source_filename, status, stats_json)
         VALUES (?1, ?2, ?3, 'running', NULL);",
        params![import_id, Utc::now().timestamp_millis(), source_filename],
    )?;
    info!(%import_id, source = %source_path.display(), batch_size = options.batch_size, "import started");

    let outcome = {
        let mut importer = Importer::new(&mut archive.conn, options, &progress);
        importer.report.import_id = import_id.clone();
        let streamed = stream::for_each_thread(source, |thread| importer.ingest_thread(thread));
        match streamed.and_then(|()| importer.flush()) {
            Ok(()) => Ok(importer.report),
            Err(err) => Err((err, importer.report)),
        }
    };

    let mut report = match outcome {
        Ok(report) => report,
        Err((err, partial)) => {
            warn!(%import_id, threads = partial.threads, messages = partial.messages, error = %err, "import aborted");
            mark_import(&archive.conn, &import_id, "failed", &failure_json(&err, &partial));
            return Err(CoreError::ImportAborted {
                threads: partial.threads,
                messages: partial.messages,
                reason: err.to_string(),
            });
        }
    };

    report.users = match stats::finalize_archive(&mut archive.conn, &progress) {
        Ok(users) => users,
        Err(err) => {
            mark_import(&archive.conn, &import_id, "failed", &failure_json(&err, &report));
            return Err(err);
        }
    };
    let stats_json = serde_json::to_string(&report)?;
    mark_import(&archive.conn, &import_id, "success", &stats_json);
    info!(
        %import_id,
        threads = report.threads,
        messages = report.messages,
        flushes = report.flushes,
        skipped = report.skipped_messages,
        "import finished"
    );
    progress("Import complete");
    Ok(report)
}

fn mark_import(conn: &Connection, import_id: &str, status: &str, stats_json: &str) {
    if let Err(err) = conn.execute(
        "UPDATE imports SET status = ?2, stats_json = ?3 WHERE id = ?1;",
        params![import_id, status, stats_json],
    ) {
        warn!(%import_id, error = %err, "could not record import status");
    }
}

fn failure_json(err: &CoreError, partial: &ImportReport) -> String {
    serde_json::json!({
        "error": err.to_string(),
        "threads": partial.threads,
        "messages": partial.messages,
        "flushes": partial.flushes,
    })
    .to_string()
}

struct Importer<'a, F> {
    conn: &'a mut Connection,
    batch: ImportBatch,
    batch_size: usize,
    guild_id: Option<String>,
    progress: &'a F,
    report: ImportReport,
}

impl<'a, F> Importer<'a, F>
where
    F: Fn(&str),
{
    fn new(conn: &'a mut Connection, options: &ImportOptions, progress: &'a F) -> Self {
        Self {
            conn,
            batch: ImportBatch::default(),
            batch_size: options.batch_size,
            guild_id: options.guild_id.clone(),
            progress,
            report: ImportReport::default(),
        }
    }

    fn ingest_thread(&mut self, thread: ExportThread) -> Result<(), CoreError> {
        let Some(thread_id) = thread.channel.id.clone() else {
            self.report.skipped_threads += 1;
            self.report.skipped_messages += thread.messages.len() as i64;
            debug!(name = ?thread.channel.name, "thread without id skipped");
            return Ok(());
        };
        self.batch.push_thread(
            ThreadRow {
                thread_id: thread_id.clone(),
                category_id: thread.channel.category_id,
                name: thread.channel.name,
                exported_at: thread.exported_at,
            },
            self.guild_id.clone(),
        );
        for message in thread.messages {
            self.ingest_message(&thread_id, message)?;
        }
        Ok(())
    }

    /// A full batch is flushed only when the next usable message arrives, so
    /// trailing threads without messages ride along with the last batch.
    fn ingest_message(&mut self, thread_id: &str, message: ExportMessage) -> Result<(), CoreError> {
        let Some((message_id, seq)) = message
            .id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok().map(|seq| (id.to_string(), seq)))
        else {
            self.report.skipped_messages += 1;
            return Ok(());
        };
        let Some(author) = message.author.as_ref().filter(|author| author.id.is_some()) else {
            self.report.skipped_messages += 1;
            return Ok(());
        };
        if self.batch.message_count() >= self.batch_size {
            self.flush()?;
        }
        let Some(author_id) = self.batch.push_user(author) else {
            self.report.skipped_messages += 1;
            return Ok(());
        };

        let accepted = self.batch.push_message(
            seq,
            MessageRow {
                message_id: message_id.clone(),
                thread_id: thread_id.to_string(),
                author_id: author_id.clone(),
                content: message.content,
                timestamp: message.timestamp,
                reply_to_msg_id: message.reference.and_then(|r| r.message_id),
            },
        );
        if !accepted {
            self.report.duplicate_messages += 1;
            return Ok(());
        }

        for attachment in message.attachments {
            self.batch
                .push_attachment(&message_id, attachment.url, attachment.file_name, attachment.file_size_bytes);
        }
        for reaction in message.reactions {
            for user in &reaction.users {
                if let Some(user_id) = self.batch.push_user(user) {
                    self.batch.push_reaction(
                        &message_id,
                        user_id,
                        reaction.emoji.name.clone(),
                        reaction.emoji.image_url.clone(),
                    );
                }
            }
        }
        for mentioned in &message.mentions {
            if let Some(user_id) = self.batch.push_user(mentioned) {
                self.batch.push_mention(&message_id, user_id, &author_id);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CoreError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        let counts = self.batch.flush(&tx)?;
        tx.commit()?;
        self.report.absorb(counts);
        debug!(flush = self.report.flushes, messages = counts.messages, "batch committed");
        (self.progress)(&format!("Importing messages... {}", self.report.messages));
        Ok(())
    }
}
