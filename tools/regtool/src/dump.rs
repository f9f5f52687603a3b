//! Register dumps and a connection that replays them
//!
//! A dump is CSV with an `address,value` header. Values are decimal or
//! `0x`-prefixed hex; `#` starts a comment line.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};
use voltage_registers::{Connection, ReadKind, RegisterError};

#[derive(Debug, Deserialize)]
struct DumpRow {
    address: String,
    value: String,
}

/// Parse `1234` or `0x04D2`
pub fn parse_number(text: &str) -> Result<u16> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.with_context(|| format!("invalid register number '{}'", text))
}

/// Captured register image
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegisterDump {
    words: BTreeMap<u16, u16>,
}

impl RegisterDump {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open dump {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("failed to parse dump {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut words = BTreeMap::new();
        for (line, row) in csv_reader.deserialize::<DumpRow>().enumerate() {
            let row = row?;
            let address = parse_number(&row.address).with_context(|| format!("row {}", line + 1))?;
            let value = parse_number(&row.value).with_context(|| format!("row {}", line + 1))?;
            if words.insert(address, value).is_some() {
                return Err(anyhow!("row {}: address {} appears twice", line + 1, address));
            }
        }
        debug!("Loaded register dump with {} words", words.len());
        Ok(Self { words })
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.words.get(&address).copied()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Connection serving reads from a [`RegisterDump`]
///
/// Addresses missing from the dump read as zero, the way a device pads
/// unmapped registers inside a block. In strict mode they are rejected.
pub struct DumpConnection {
    dump: RegisterDump,
    strict: bool,
    requests: usize,
}

impl DumpConnection {
    pub fn new(dump: RegisterDump, strict: bool) -> Self {
        Self {
            dump,
            strict,
            requests: 0,
        }
    }

    /// Reads served so far
    pub fn requests(&self) -> usize {
        self.requests
    }
}

#[async_trait]
impl Connection for DumpConnection {
    async fn read_registers(
        &mut self,
        kind: ReadKind,
        start: u16,
        count: u16,
    ) -> voltage_registers::Result<Vec<u16>> {
        self.requests += 1;
        trace!("Dump read: {} start={} count={}", kind, start, count);

        let mut words = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let address = start
                .checked_add(offset)
                .ok_or_else(|| RegisterError::rejected(format!("illegal data address {}+{}", start, offset)))?;
            match self.dump.get(address) {
                Some(word) => words.push(word),
                None if self.strict => {
                    return Err(RegisterError::rejected(format!(
                        "illegal data address {}",
                        address
                    )))
                },
                None => words.push(0),
            }
        }
        Ok(words)
    }
}
