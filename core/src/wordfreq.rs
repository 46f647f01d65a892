//! CJK word-frequency statistics.
//!
//! Words are runs of two or more ideographs in U+4E00..=U+9FA5. Anything else
//! (latin text, emoji, punctuation) separates words and is never counted.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CHAR_BUDGET;
use crate::db::open_reader;
use crate::error::CoreError;
use crate::models::WordWeight;

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{4e00}-\u{9fa5}]{2,}").expect("word pattern compiles"));

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "什么", "这个", "那个", "怎么", "可以", "因为", "所以", "但是", "就是", "这就",
        "感觉", "时候", "现在", "还是", "没有", "一样", "知道", "觉得", "出来", "其实",
        "这种", "那样", "一下", "然后", "虽然", "不是", "还有", "这里", "那里", "今天",
        "明天", "真的", "可能", "图片", "表情", "回复", "一个", "自己", "只是", "非常",
        "不能", "不要", "需要", "如果", "以及", "我们", "你们", "他们", "看到", "不过",
        "确实", "已经", "大家", "为什么", "不会", "这样", "这么", "那么", "那些",
    ]
    .into_iter()
    .collect()
});

pub fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word)
}

/// True when `word` may appear in any counter: ideographs only, at least two
/// of them, and not a stop word.
pub fn is_valid_word(word: &str) -> bool {
    word.chars().count() >= 2 && word.chars().all(is_cjk_ideograph) && !is_stop_word(word)
}

pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|word| !is_stop_word(word))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCounter {
    counts: BTreeMap<String, u64>,
}

impl WordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, word: &str) -> u64 {
        self.counts.get(word).copied().unwrap_or(0)
    }

    pub fn add(&mut self, word: &str, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.entry(word.to_string()).or_insert(0) += count;
    }

    pub fn add_text(&mut self, text: &str) {
        for word in tokenize(text) {
            self.add(word, 1);
        }
    }

    /// Additive merge of `other` into `self`.
    pub fn merge(&mut self, other: WordCounter) {
        if self.counts.is_empty() {
            self.counts = other.counts;
            return;
        }
        for (word, count) in other.counts {
            *self.counts.entry(word).or_insert(0) += count;
        }
    }

    /// Drops every entry failing [`is_valid_word`]; returns how many went.
    pub fn retain_valid(&mut self) -> usize {
        let before = self.counts.len();
        self.counts.retain(|word, count| *count > 0 && is_valid_word(word));
        before - self.counts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(w, c)| (w.as_str(), *c))
    }
}

impl<S: AsRef<str>> FromIterator<(S, u64)> for WordCounter {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut counter = WordCounter::new();
        for (word, count) in iter {
            counter.add(word.as_ref(), count);
        }
        counter
    }
}

pub fn merge_counters(left: WordCounter, right: WordCounter) -> WordCounter {
    let (mut base, other) = if left.len() >= right.len() { (left, right) } else { (right, left) };
    base.merge(other);
    base
}

/// Counts words over `texts`, reading at most `char_budget` characters.
pub fn count_words<I, S>(texts: I, char_budget: usize) -> WordCounter
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counter = WordCounter::new();
    let mut remaining = char_budget;
    for text in texts {
        if remaining == 0 {
            break;
        }
        let text = text.as_ref();
        let slice = match text.char_indices().nth(remaining) {
            Some((cut, _)) => &text[..cut],
            None => text,
        };
        remaining -= slice.chars().count();
        counter.add_text(slice);
    }
    counter
}

/// Ranks valid words by descending count. Equal counts keep the counter's
/// lexical order.
pub fn format_word_cloud(counter: &WordCounter, limit: Option<usize>) -> Vec<WordWeight> {
    let mut items: Vec<(&str, u64)> = counter.iter().filter(|(word, _)| is_valid_word(word)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1));
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
        .into_iter()
        .map(|(text, weight)| WordWeight {
            text: text.to_string(),
            weight,
        })
        .collect()
}

pub fn word_cloud<I, S>(texts: I, limit: Option<usize>) -> Vec<WordWeight>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    format_word_cloud(&count_words(texts, DEFAULT_CHAR_BUDGET), limit)
}

#[derive(Debug, Clone)]
pub struct DeltaOptions {
    pub workers: usize,
    pub partitions_per_worker: usize,
    pub char_budget: usize,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            partitions_per_worker: 4,
            char_budget: DEFAULT_CHAR_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeltaOutcome {
    pub counter: WordCounter,
    pub messages: usize,
    pub partitions: usize,
    pub failed_partitions: usize,
}

/// Splits sorted, distinct ids into about `target` contiguous half-open
/// ranges `(start, end]` covering every id exactly once.
pub fn partition_ranges(ids: &[i64], target: usize) -> Vec<(i64, i64)> {
    if ids.is_empty() {
        return Vec::new();
    }
    let target = target.max(1);
    let chunk_size = (ids.len() + target - 1) / target;
    ids.chunks(chunk_size)
        .map(|chunk| (chunk[0] - 1, chunk[chunk.len() - 1]))
        .collect()
}

pub fn count_range(conn: &Connection, start: i64, end: i64, char_budget: usize) -> Result<WordCounter, CoreError> {
    let mut stmt = conn.prepare_cached("SELECT content FROM messages WHERE seq > ?1 AND seq <= ?2;")?;
    let rows = stmt.query_map(params![start, end], |row| row.get::<_, Option<String>>(0))?;
    let mut contents = Vec::new();
    for row in rows {
        if let Some(content) = row? {
            contents.push(content);
        }
    }
    Ok(count_words(contents, char_budget))
}

/// Counts words of every message with `after < seq <= upto` using a pool of
/// worker threads, each with its own read-only connection.
///
/// A partition whose query fails contributes nothing; the failure is logged
/// and reported in [`DeltaOutcome::failed_partitions`].
pub fn compute_delta(
    archive_path: &Path,
    after: i64,
    upto: i64,
    options: &DeltaOptions,
) -> Result<DeltaOutcome, CoreError> {
    compute_delta_with(archive_path, after, upto, options, count_range)
}

type PartitionResult = ((i64, i64), Result<WordCounter, CoreError>);

/// [`compute_delta`] with the per-partition counting step supplied by the
/// caller. Each partition's result is sent back as soon as it is counted, so
/// a worker that dies loses only the partition it was holding.
pub(crate) fn compute_delta_with<C>(
    archive_path: &Path,
    after: i64,
    upto: i64,
    options: &DeltaOptions,
    count: C,
) -> Result<DeltaOutcome, CoreError>
where
    C: Fn(&Connection, i64, i64, usize) -> Result<WordCounter, CoreError> + Send + Sync + 'static,
{
    let started = Instant::now();
    let ids: Vec<i64> = {
        let conn = open_reader(archive_path)?;
        let mut stmt = conn.prepare("SELECT seq FROM messages WHERE seq > ?1 AND seq <= ?2 ORDER BY seq;")?;
        let rows = stmt.query_map(params![after, upto], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };
    if ids.is_empty() {
        return Ok(DeltaOutcome::default());
    }

    let workers = options.workers.max(1);
    let ranges = Arc::new(partition_ranges(&ids, workers * options.partitions_per_worker.max(1)));
    let workers = workers.min(ranges.len());
    info!(
        messages = ids.len(),
        partitions = ranges.len(),
        workers,
        after,
        upto,
        "counting words over new messages"
    );

    let count = Arc::new(count);
    let next_index = Arc::new(AtomicUsize::new(0));
    let (sender, receiver) = mpsc::channel::<PartitionResult>();
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let ranges = Arc::clone(&ranges);
        let next_index = Arc::clone(&next_index);
        let count = Arc::clone(&count);
        let sender = sender.clone();
        let path = archive_path.to_path_buf();
        let char_budget = options.char_budget;
        let handle = thread::spawn(move || {
            let conn = open_reader(&path);
            loop {
                let idx = next_index.fetch_add(1, Ordering::Relaxed);
                if idx >= ranges.len() {
                    break;
                }
                let (start, end) = ranges[idx];
                let result = match &conn {
                    Ok(conn) => count(conn, start, end, char_budget),
                    Err(err) => Err(CoreError::InvalidArgument(format!("worker {worker} has no connection: {err}"))),
                };
                if sender.send(((start, end), result)).is_err() {
                    break;
                }
            }
        });
        handles.push(handle);
    }
    drop(sender);

    let mut outcome = DeltaOutcome {
        messages: ids.len(),
        partitions: ranges.len(),
        ..DeltaOutcome::default()
    };
    let mut counted = 0;
    for ((start, end), result) in receiver {
        match result {
            Ok(counter) => {
                outcome.counter.merge(counter);
                counted += 1;
            }
            Err(err) => warn!(start, end, error = %err, "word count partition failed"),
        }
    }
    for handle in handles {
        if handle.join().is_err() {
            warn!("word count worker panicked");
        }
    }
    // Partitions never reported (their worker panicked) count as failed too.
    outcome.failed_partitions = outcome.partitions - counted;
    outcome.counter.retain_valid();
    debug!(
        words = outcome.counter.len(),
        failed = outcome.failed_partitions,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "word count delta finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_keeps_cjk_runs_only() {
        let words: Vec<&str> = tokenize("今天天气hello不错啊，我们去公园散步吧 ok 好").collect();
        assert_eq!(words, vec!["今天天气", "不错啊", "我们去公园散步吧"]);
    }

    #[test]
    fn stop_words_removed() {
        let counter = count_words(["什么", "我们 什么 火锅", "火锅"], 1_000);
        assert_eq!(counter.get("什么"), 0);
        assert_eq!(counter.get("我们"), 0);
        assert_eq!(counter.get("火锅"), 2);
    }

    #[test]
    fn char_budget_truncates_input() {
        let counter = count_words(["火锅火锅", "烧烤"], 3);
        assert_eq!(counter.get("火锅火"), 1);
        assert_eq!(counter.get("烧烤"), 0);
    }

    #[test]
    fn retain_valid_drops_mixed_script_entries() {
        let mut counter: WordCounter = [("火锅", 3), ("abc", 2), ("火", 1), ("火锅x", 4), ("这个", 9)]
            .into_iter()
            .collect();
        let removed = counter.retain_valid();
        assert_eq!(removed, 4);
        assert_eq!(counter.len(), 1);
        assert!(counter.iter().all(|(w, _)| is_valid_word(w)));
    }

    #[test]
    fn merge_is_commutative_with_identity() {
        let a: WordCounter = [("火锅", 2), ("烧烤", 1)].into_iter().collect();
        let b: WordCounter = [("火锅", 5), ("奶茶", 7)].into_iter().collect();
        assert_eq!(merge_counters(a.clone(), b.clone()), merge_counters(b, a.clone()));
        assert_eq!(merge_counters(a.clone(), WordCounter::new()), a);
        assert_eq!(merge_counters(WordCounter::new(), a.clone()), a);
    }

    #[test]
    fn format_ranks_by_count_with_limit() {
        let counter: WordCounter = [("火锅", 2), ("烧烤", 9), ("奶茶", 5)].into_iter().collect();
        let top = format_word_cloud(&counter, Some(2));
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].text, "烧烤");
        assert_eq!(top[1].text, "奶茶");
        assert_eq!(format_word_cloud(&counter, None).len(), 3);
    }

    #[test]
    fn partitions_cover_ids_once() {
        let ids: Vec<i64> = vec![3, 4, 9, 10, 11, 20, 21];
        let ranges = partition_ranges(&ids, 3);
        assert_eq!(ranges.len(), 3);
        for id in &ids {
            let hits = ranges.iter().filter(|(s, e)| id > s && id <= e).count();
            assert_eq!(hits, 1, "id {id} covered {hits} times");
        }
        assert!(partition_ranges(&[], 4).is_empty());
    }

    fn archive_with_messages(dir: &Path, count: i64) -> std::path::PathBuf {
        let path = dir.join("words.sqlite");
        let db = crate::db::open_archive(&path).expect("open");
        db.conn
            .execute_batch(
                "INSERT INTO users (user_id, username) VALUES ('1', 'one');
                 INSERT INTO threads (thread_id, name) VALUES ('t', 't');",
            )
            .expect("seed");
        for seq in 1..=count {
            db.conn
                .execute(
                    "INSERT INTO messages (seq, message_id, thread_id, author_id, content) VALUES (?1, ?2, 't', '1', '火锅');",
                    params![seq, seq.to_string()],
                )
                .expect("message");
        }
        path
    }

    fn options(workers: usize) -> DeltaOptions {
        DeltaOptions {
            workers,
            partitions_per_worker: 4,
            char_budget: DEFAULT_CHAR_BUDGET,
        }
    }

    #[test]
    fn failing_partition_is_counted_and_skipped() {
        let dir = tempfile::tempdir().expect("temp");
        let path = archive_with_messages(dir.path(), 40);
        // 40 ids over 8 partitions of 5; the one holding seq 1 fails.
        let outcome = compute_delta_with(&path, 0, 40, &options(2), |conn: &Connection, start, end, budget| {
            if start == 0 {
                return Err(CoreError::InvalidArgument("unreadable range".to_string()));
            }
            count_range(conn, start, end, budget)
        })
        .expect("delta");
        assert_eq!(outcome.partitions, 8);
        assert_eq!(outcome.failed_partitions, 1);
        assert_eq!(outcome.messages, 40);
        assert_eq!(outcome.counter.get("火锅"), 35);
    }

    #[test]
    fn panicking_worker_loses_only_its_partition() {
        let dir = tempfile::tempdir().expect("temp");
        let path = archive_with_messages(dir.path(), 40);
        let outcome = compute_delta_with(&path, 0, 40, &options(2), |conn: &Connection, start, end, budget| {
            if start == 20 {
                panic!("worker died mid-partition");
            }
            count_range(conn, start, end, budget)
        })
        .expect("delta");
        assert_eq!(outcome.failed_partitions, 1);
        assert_eq!(outcome.counter.get("火锅"), 35);
    }
}
