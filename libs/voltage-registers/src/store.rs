//! Sparse register store with transactional updates
//!
//! Committed versions are immutable [`RegisterSnapshot`]s published through an
//! [`ArcSwap`]. Readers load the current version without locking; writers build
//! a private copy inside [`RegisterStore::perform_update`] and publish it only
//! when the transaction reports success.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{RegisterError, Result};
use crate::range::{AddressRange, MAX_ADDRESS};
use crate::time::{millis_to_utc, SystemTimeProvider, TimeProvider};

/// Read access to raw register words
pub trait WordSource {
    /// Last written word at `address`, `None` if never written
    fn read_word(&self, address: u16) -> Option<u16>;

    /// Fill `out` with consecutive words starting at `start`
    ///
    /// Returns false if any word is unknown or the run passes the last address.
    fn read_words(&self, start: u16, out: &mut [u16]) -> bool {
        for (offset, slot) in out.iter_mut().enumerate() {
            let Some(address) = offset_address(start, offset) else {
                return false;
            };
            match self.read_word(address) {
                Some(word) => *slot = word,
                None => return false,
            }
        }
        true
    }

    /// Like [`WordSource::read_words`] but keeps going past unknown words
    fn read_word_run(&self, start: u16, out: &mut [Option<u16>]) {
        for (offset, slot) in out.iter_mut().enumerate() {
            *slot = offset_address(start, offset).and_then(|address| self.read_word(address));
        }
    }
}

fn offset_address(start: u16, offset: usize) -> Option<u16> {
    u16::try_from(start as usize + offset).ok()
}

/// Immutable register contents at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    words: BTreeMap<u16, u16>,
    timestamp_ms: Option<i64>,
}

impl RegisterSnapshot {
    /// Milliseconds since the Unix epoch of the last successful update
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp_ms
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms.and_then(millis_to_utc)
    }

    /// Number of known addresses
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Known words in ascending address order
    pub fn words(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.words.iter().map(|(&a, &w)| (a, w))
    }

    /// Copy of the known words inside `range`, timestamp preserved
    pub fn slice(&self, range: AddressRange) -> RegisterSnapshot {
        RegisterSnapshot {
            words: self
                .words
                .range(range.start()..=range.end())
                .map(|(&a, &w)| (a, w))
                .collect(),
            timestamp_ms: self.timestamp_ms,
        }
    }
}

impl WordSource for RegisterSnapshot {
    fn read_word(&self, address: u16) -> Option<u16> {
        self.words.get(&address).copied()
    }
}

impl fmt::Display for RegisterSnapshot {
    /// Debug dump with two words per row, rows aligned to even addresses
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegisterSnapshot{")?;
        let mut row: Option<u16> = None;
        for (&address, &word) in &self.words {
            let row_start = address & !1;
            if row != Some(row_start) {
                write!(f, "\n\t{row_start:5}: ")?;
                if address != row_start {
                    f.write_str("      , ")?;
                }
                row = Some(row_start);
            } else {
                f.write_str(", ")?;
            }
            write!(f, "0x{word:04X}")?;
        }
        if !self.words.is_empty() {
            f.write_str("\n")?;
        }
        f.write_str("}")
    }
}

/// Mutable view handed to a transaction body
///
/// Writes land in a private copy of the store and become visible only when the
/// transaction commits.
#[derive(Debug)]
pub struct RegisterUpdate {
    words: BTreeMap<u16, u16>,
    writes: usize,
}

impl RegisterUpdate {
    fn new(words: BTreeMap<u16, u16>) -> Self {
        Self { words, writes: 0 }
    }

    /// Write `words` to consecutive addresses beginning at `start`
    pub fn write_contiguous(&mut self, words: &[u16], start: u16) -> Result<()> {
        if words.is_empty() {
            return Ok(());
        }
        let end = start as usize + words.len() - 1;
        if end > MAX_ADDRESS as usize {
            return Err(RegisterError::invalid_range(start as u32, end as u32));
        }
        for (address, &word) in (start..=end as u16).zip(words) {
            self.words.insert(address, word);
        }
        self.writes += words.len();
        Ok(())
    }

    /// Write an arbitrary set of address/word pairs
    pub fn write_sparse<I>(&mut self, words: I)
    where
        I: IntoIterator<Item = (u16, u16)>,
    {
        for (address, word) in words {
            self.words.insert(address, word);
            self.writes += 1;
        }
    }

    /// Write bytes as big-endian word pairs starting at `start`
    ///
    /// A trailing odd byte becomes the high byte of a zero-padded word.
    pub fn write_bytes(&mut self, bytes: &[u8], start: u16) -> Result<()> {
        let words: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect();
        self.write_contiguous(&words, start)
    }

    /// Number of word writes made so far in this transaction
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl WordSource for RegisterUpdate {
    fn read_word(&self, address: u16) -> Option<u16> {
        self.words.get(&address).copied()
    }
}

/// Sparse, versioned map of register address to word
pub struct RegisterStore {
    current: ArcSwap<RegisterSnapshot>,
    writer: Mutex<()>,
    clock: Arc<dyn TimeProvider>,
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegisterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.load();
        f.debug_struct("RegisterStore")
            .field("len", &current.len())
            .field("timestamp_ms", &current.timestamp_ms)
            .finish()
    }
}

impl RegisterStore {
    /// Empty store stamped by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemTimeProvider))
    }

    /// Empty store stamped by the given clock
    pub fn with_clock(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegisterSnapshot::default()),
            writer: Mutex::new(()),
            clock,
        }
    }

    /// Run a transaction against a private copy of the store
    ///
    /// `Ok(true)` publishes every write at once and stamps the store with the
    /// time the transaction started. `Ok(false)`, an error, or a panic in
    /// `action` leaves the store untouched. Returns whether the update was
    /// committed.
    pub fn perform_update<F, E>(&self, action: F) -> std::result::Result<bool, E>
    where
        F: FnOnce(&mut RegisterUpdate) -> std::result::Result<bool, E>,
    {
        let _guard = self.writer.lock();
        let now = self.clock.now_millis();
        let base = self.current.load_full();
        let mut update = RegisterUpdate::new(base.words.clone());

        if !action(&mut update)? {
            trace!("Register update discarded ({} writes)", update.writes);
            return Ok(false);
        }

        debug!(
            "Register update committed: {} writes, {} known addresses",
            update.writes,
            update.words.len()
        );
        self.current.store(Arc::new(RegisterSnapshot {
            words: update.words,
            timestamp_ms: Some(now),
        }));
        Ok(true)
    }

    /// Clear the timestamp so the data reads as stale; words are kept
    pub fn expire(&self) {
        let _guard = self.writer.lock();
        let base = self.current.load_full();
        if base.timestamp_ms.is_none() {
            return;
        }
        self.current.store(Arc::new(RegisterSnapshot {
            words: base.words.clone(),
            timestamp_ms: None,
        }));
        debug!("Register data expired");
    }

    /// Time of the most recent successful update, in epoch milliseconds
    pub fn timestamp(&self) -> Option<i64> {
        self.current.load().timestamp_ms
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.current.load().timestamp_utc()
    }

    /// Current committed version; later commits do not affect it
    pub fn snapshot(&self) -> Arc<RegisterSnapshot> {
        self.current.load_full()
    }

    /// Number of known addresses
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

impl WordSource for RegisterStore {
    fn read_word(&self, address: u16) -> Option<u16> {
        self.current.load().read_word(address)
    }

    /// Reads every word from one committed version
    fn read_words(&self, start: u16, out: &mut [u16]) -> bool {
        self.current.load().read_words(start, out)
    }

    fn read_word_run(&self, start: u16, out: &mut [Option<u16>]) {
        self.current.load().read_word_run(start, out)
    }
}

impl fmt::Display for RegisterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.load();
        fmt::Display::fmt(&**current, f)
    }
}
