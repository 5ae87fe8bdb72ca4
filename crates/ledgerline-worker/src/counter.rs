//! Precomputed row counters.
//!
//! A counter stores how many rows of a table match a filter, keyed by the
//! filter's query string (`block_number=10&from_address%7Cto_address=0xab`).
//! [`CounterProcessor`] folds new rows into counters in record-number order
//! and takes them back out when their blocks are reverted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use ledgerline_db::repository::{CountableRecord, Counter, CounterRepository};
use ledgerline_db::{DbError, TransactionOptions, UnitOfWork};

/// Separates alternative fields inside one criteria group.
pub const FIELD_ALTERNATIVE_SEPARATOR: char = '|';

/// Value used for a field that is `NULL`.
const NULL_VALUE: &str = "null";

/// Field groups combined with AND. A group `from_address|to_address`
/// matches a record through any of its fields, and a record counts once per
/// distinct value among them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterCriteria {
    groups: Vec<String>,
}

impl CounterCriteria {
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { groups: groups.into_iter().map(Into::into).collect() }
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    fn fields(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flat_map(|group| group.split(FIELD_ALTERNATIVE_SEPARATOR))
    }
}

/// Sorted `key=value` pairs, form-urlencoded and joined with `&`.
pub fn query_string(pairs: &[(&str, &str)]) -> String {
    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(key, value)| format!("{}={}", form_encode(key), form_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'*' | b'-' | b'.' | b'_' => out.push(char::from(byte)),
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Counters contributed by `records` to `table_name`.
///
/// The first counter is always the table total (empty query string),
/// followed by one counter per distinct query string, in query-string order.
pub fn calculate_counters(
    table_name: &str,
    records: &[CountableRecord],
    criteria_list: &[CounterCriteria],
) -> Vec<Counter> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();

    for criteria in criteria_list {
        for record in records {
            let mut combinations: Vec<Vec<(&str, &str)>> = Vec::new();
            for group in criteria.groups() {
                let to_extend = std::mem::take(&mut combinations);
                let mut seen = HashSet::new();
                for field in group.split(FIELD_ALTERNATIVE_SEPARATOR) {
                    let value = record.value(field).unwrap_or(NULL_VALUE);
                    if !seen.insert(value) {
                        continue;
                    }
                    if to_extend.is_empty() {
                        combinations.push(vec![(group.as_str(), value)]);
                    }
                    for base in &to_extend {
                        let mut extended = base.clone();
                        extended.push((group.as_str(), value));
                        combinations.push(extended);
                    }
                }
            }
            for combination in combinations {
                *counts.entry(query_string(&combination)).or_default() += 1;
            }
        }
    }

    let total = Counter {
        table_name: table_name.to_string(),
        query_string: String::new(),
        count: i64::try_from(records.len()).unwrap_or(i64::MAX),
    };
    std::iter::once(total)
        .chain(counts.into_iter().map(|(query_string, count)| Counter {
            table_name: table_name.to_string(),
            query_string,
            count,
        }))
        .collect()
}

/// Maintains the counters of one table.
#[derive(Debug)]
pub struct CounterProcessor {
    table_name: String,
    criteria_list: Vec<CounterCriteria>,
    fields: Vec<String>,
    batch_size: usize,
    uow: UnitOfWork,
    counters: CounterRepository,
    /// Cached watermark. Held for the whole of a batch or a revert, so the
    /// two never interleave.
    last_processed: Mutex<Option<i64>>,
}

impl CounterProcessor {
    pub fn new(
        table_name: impl Into<String>,
        criteria_list: Vec<CounterCriteria>,
        batch_size: usize,
        uow: UnitOfWork,
    ) -> Self {
        let mut fields: Vec<String> = Vec::new();
        for field in criteria_list.iter().flat_map(CounterCriteria::fields) {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
        Self {
            table_name: table_name.into(),
            criteria_list,
            fields,
            batch_size: batch_size.max(1),
            counters: CounterRepository::new(uow.clone()),
            uow,
            last_processed: Mutex::new(None),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Fold the next batch of records into counters.
    ///
    /// Returns `true` when the batch was full, meaning more records are
    /// probably waiting. On error the cached watermark is dropped and
    /// re-read on the next call.
    pub async fn process_next_batch(&self) -> Result<bool, DbError> {
        let mut cached = self.last_processed.lock().await;
        let outcome = self.fold_next_batch(*cached).await;
        match outcome {
            Ok((watermark, full)) => {
                *cached = Some(watermark);
                Ok(full)
            }
            Err(e) => {
                *cached = None;
                Err(e)
            }
        }
    }

    async fn fold_next_batch(&self, cached: Option<i64>) -> Result<(i64, bool), DbError> {
        let last = match cached {
            Some(number) => number,
            None => self.counters.last_processed_record_number(&self.table_name).await?,
        };
        debug!(table = %self.table_name, from = last + 1, "fetching records for counters");
        let records = self
            .counters
            .countable_records(&self.table_name, &self.fields, last + 1, None, None, self.batch_size)
            .await?;
        let Some(newest) = records.last() else {
            debug!(table = %self.table_name, "no new records for counters");
            return Ok((last, false));
        };
        let watermark = newest.number;

        let counters = calculate_counters(&self.table_name, &records, &self.criteria_list);
        self.uow
            .use_transaction(
                || self.counters.increment_counters(&counters, watermark),
                TransactionOptions::default(),
            )
            .await?;
        debug!(table = %self.table_name, records = records.len(), watermark, "counters updated");
        Ok((watermark, records.len() == self.batch_size))
    }

    /// Take back the contribution of every processed record in a block
    /// above `last_correct_block`.
    ///
    /// Runs against the caller's transaction context when there is one.
    pub async fn revert(&self, last_correct_block: u64) -> Result<(), DbError> {
        let _exclusive = self.last_processed.lock().await;
        let last_processed = self.counters.last_processed_record_number(&self.table_name).await?;
        let mut last_reverted: i64 = -1;

        while last_processed > last_reverted {
            let records = self
                .counters
                .countable_records(
                    &self.table_name,
                    &self.fields,
                    last_reverted + 1,
                    Some(last_processed),
                    Some(last_correct_block),
                    self.batch_size,
                )
                .await?;
            let Some(newest) = records.last() else {
                break;
            };
            debug!(
                table = %self.table_name,
                starting_from = records[0].number,
                records = records.len(),
                "reverting counters"
            );
            let counters = calculate_counters(&self.table_name, &records, &self.criteria_list);
            self.counters.decrement_counters(&counters).await?;

            last_reverted = newest.number;
            if records.len() < self.batch_size {
                break;
            }
        }
        Ok(())
    }
}

/// All counter processors of the worker.
#[derive(Debug, Clone)]
pub struct CounterService {
    processors: Vec<Arc<CounterProcessor>>,
    counters: CounterRepository,
}

impl CounterService {
    pub fn new(processors: Vec<CounterProcessor>, uow: UnitOfWork) -> Self {
        Self {
            processors: processors.into_iter().map(Arc::new).collect(),
            counters: CounterRepository::new(uow),
        }
    }

    /// Processors for the `transactions` and `transfers` tables.
    pub fn with_default_processors(uow: UnitOfWork, batch_size: usize) -> Self {
        let transactions = CounterProcessor::new(
            "transactions",
            vec![CounterCriteria::new(["from_address|to_address"])],
            batch_size,
            uow.clone(),
        );
        let transfers = CounterProcessor::new(
            "transfers",
            vec![
                CounterCriteria::new(["token_address"]),
                CounterCriteria::new(["from_address|to_address"]),
                CounterCriteria::new(["token_address", "from_address|to_address"]),
            ],
            batch_size,
            uow.clone(),
        );
        Self::new(vec![transactions, transfers], uow)
    }

    pub fn processors(&self) -> &[Arc<CounterProcessor>] {
        &self.processors
    }

    /// Revert every processor to `last_correct_block`, then drop counters
    /// that reached zero.
    pub async fn revert(&self, last_correct_block: u64) -> Result<(), DbError> {
        for processor in &self.processors {
            processor.revert(last_correct_block).await?;
        }
        self.counters.delete_empty().await?;
        Ok(())
    }

    /// One background loop per processor: full batches are followed
    /// immediately by the next one, otherwise the loop waits
    /// `update_interval`.
    pub fn spawn_workers(&self, update_interval: Duration) -> Vec<JoinHandle<()>> {
        self.processors
            .iter()
            .map(|processor| {
                let processor = Arc::clone(processor);
                tokio::spawn(async move {
                    info!(table = %processor.table_name(), "counter worker started");
                    loop {
                        match processor.process_next_batch().await {
                            Ok(true) => continue,
                            Ok(false) => {}
                            Err(e) => {
                                error!(table = %processor.table_name(), error = %e, "counter batch failed");
                            }
                        }
                        tokio::time::sleep(update_interval).await;
                    }
                })
            })
            .collect()
    }
}
