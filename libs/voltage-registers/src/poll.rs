//! Poll orchestration
//!
//! A [`PollPlan`] coalesces the wanted addresses once; each execution issues
//! one read per planned range through a [`Connection`] and commits each
//! response in its own store transaction. The first failed read aborts the
//! poll, leaving ranges read before it committed.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RegisterError, Result};
use crate::range::{AddressRange, AddressRangeSet};
use crate::store::RegisterStore;

/// Default maximum registers per read request
pub const DEFAULT_MAX_SPAN: usize = 64;

/// Protocol limit for a single register read
pub const MAX_READ_REGISTERS: usize = 125;

/// Register table a read targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadKind {
    /// Holding registers (function code 03)
    #[default]
    #[serde(alias = "fc03")]
    Holding,
    /// Input registers (function code 04)
    #[serde(alias = "fc04")]
    Input,
}

impl ReadKind {
    pub const fn function_code(&self) -> u8 {
        match self {
            Self::Holding => 3,
            Self::Input => 4,
        }
    }
}

impl fmt::Display for ReadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Holding => write!(f, "holding"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// Device link able to read blocks of registers
///
/// Implementations own framing, timeouts and reconnects. Failures are
/// reported as [`RegisterError::Timeout`], [`RegisterError::Connection`] or
/// [`RegisterError::Rejected`].
#[async_trait]
pub trait Connection: Send {
    async fn read_registers(&mut self, kind: ReadKind, start: u16, count: u16)
        -> Result<Vec<u16>>;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Box<C> {
    async fn read_registers(
        &mut self,
        kind: ReadKind,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        (**self).read_registers(kind, start, count).await
    }
}

/// Counters from one successful refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    /// Read requests issued
    pub requests: usize,
    /// Words committed to the store
    pub words: usize,
}

/// Coalesced read ranges for one register table and read kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPlan {
    kind: ReadKind,
    max_span: usize,
    ranges: AddressRangeSet,
}

impl PollPlan {
    /// Plan reads covering every address in `wanted`
    pub fn new(kind: ReadKind, wanted: &AddressRangeSet, max_span: usize) -> Result<Self> {
        let ranges = wanted.coalesce(max_span)?;
        for range in &ranges {
            if range.len() > max_span {
                debug!(
                    "Range {} exceeds max span {} and is read as one request",
                    range, max_span
                );
            }
        }
        debug!(
            "Planned {} {} reads covering {} registers for {} wanted",
            ranges.len(),
            kind,
            ranges.address_count(),
            wanted.address_count()
        );
        Ok(Self {
            kind,
            max_span,
            ranges,
        })
    }

    /// Plan reads for individual addresses
    pub fn for_addresses<I>(kind: ReadKind, addresses: I, max_span: usize) -> Result<Self>
    where
        I: IntoIterator<Item = u16>,
    {
        let wanted: AddressRangeSet = addresses.into_iter().collect();
        Self::new(kind, &wanted, max_span)
    }

    pub fn kind(&self) -> ReadKind {
        self.kind
    }

    pub fn max_span(&self) -> usize {
        self.max_span
    }

    pub fn ranges(&self) -> &AddressRangeSet {
        &self.ranges
    }

    /// Registers read per execution, gaps included
    pub fn register_count(&self) -> usize {
        self.ranges.address_count()
    }

    /// Read every planned range and commit each response
    pub async fn execute<C>(&self, store: &RegisterStore, conn: &mut C) -> Result<RefreshStats>
    where
        C: Connection + ?Sized,
    {
        let mut stats = RefreshStats::default();
        for range in &self.ranges {
            let words = match read_range(conn, self.kind, *range).await {
                Ok(words) => words,
                Err(e) => {
                    warn!(
                        "Read of {} registers {} failed after {} of {} ranges: {}",
                        self.kind,
                        range,
                        stats.requests,
                        self.ranges.len(),
                        e
                    );
                    return Err(e);
                },
            };
            stats.requests += 1;

            store.perform_update(|update| {
                update.write_contiguous(&words, range.start())?;
                Ok::<_, RegisterError>(true)
            })?;
            stats.words += words.len();
        }

        debug!(
            "Refreshed {} registers in {} requests",
            stats.words, stats.requests
        );
        Ok(stats)
    }
}

async fn read_range<C>(conn: &mut C, kind: ReadKind, range: AddressRange) -> Result<Vec<u16>>
where
    C: Connection + ?Sized,
{
    let expected = range.len();
    let count = u16::try_from(expected)
        .map_err(|_| RegisterError::invalid_range(range.start(), range.end()))?;

    debug!("Reading {} registers {} ({} words)", kind, range, expected);
    let mut words = conn.read_registers(kind, range.start(), count).await?;

    if words.len() < expected {
        return Err(RegisterError::ShortRead {
            start: range.start(),
            expected,
            actual: words.len(),
        });
    }
    if words.len() > expected {
        warn!(
            "Read of {} returned {} words, expected {}; extra words dropped",
            range,
            words.len(),
            expected
        );
        words.truncate(expected);
    }
    Ok(words)
}

/// Read `addresses` through `conn` into `store`
///
/// Coalesces the addresses with `max_span`, issues one read per range and
/// commits each response separately.
pub async fn refresh<C>(
    store: &RegisterStore,
    conn: &mut C,
    kind: ReadKind,
    addresses: &AddressRangeSet,
    max_span: usize,
) -> Result<RefreshStats>
where
    C: Connection + ?Sized,
{
    PollPlan::new(kind, addresses, max_span)?
        .execute(store, conn)
        .await
}
