//! Named field access over register snapshots
//!
//! [`TableAccessor`] reads fields by name from one snapshot using a
//! [`RegisterTable`]. [`PhaseView`] and [`Reversed`] wrap any
//! [`FieldProvider`] and can be stacked in either order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{RegisterEntry, RegisterTable};
use crate::decode::{decode_scaled, decode_value, DecodedValue};
use crate::store::{RegisterSnapshot, RegisterStore};

/// Source of named numeric fields
pub trait FieldProvider {
    /// Scaled value of `name`, `None` if unknown or unavailable
    fn field(&self, name: &str) -> Option<f64>;

    /// Time the underlying data was read, epoch milliseconds
    fn timestamp(&self) -> Option<i64>;
}

impl<T: FieldProvider + ?Sized> FieldProvider for &T {
    fn field(&self, name: &str) -> Option<f64> {
        (**self).field(name)
    }

    fn timestamp(&self) -> Option<i64> {
        (**self).timestamp()
    }
}

impl<T: FieldProvider + ?Sized> FieldProvider for Arc<T> {
    fn field(&self, name: &str) -> Option<f64> {
        (**self).field(name)
    }

    fn timestamp(&self) -> Option<i64> {
        (**self).timestamp()
    }
}

/// Decorator constructors for every provider
pub trait FieldProviderExt: FieldProvider + Sized {
    /// View with power negated and delivered/received energy swapped
    fn reversed(self) -> Reversed<Self> {
        Reversed::new(self)
    }

    /// View reading the per-phase variant of each field
    fn for_phase(self, phase: Phase) -> PhaseView<Self> {
        PhaseView::new(self, phase)
    }
}

impl<T: FieldProvider> FieldProviderExt for T {}

/// Fields of one device table read from a single snapshot
#[derive(Debug, Clone)]
pub struct TableAccessor {
    table: Arc<RegisterTable>,
    data: Arc<RegisterSnapshot>,
}

impl TableAccessor {
    pub fn new(table: Arc<RegisterTable>, data: Arc<RegisterSnapshot>) -> Self {
        Self { table, data }
    }

    /// Accessor over the store's current contents
    pub fn from_store(table: Arc<RegisterTable>, store: &RegisterStore) -> Self {
        Self::new(table, store.snapshot())
    }

    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    pub fn snapshot(&self) -> &Arc<RegisterSnapshot> {
        &self.data
    }

    /// Decoded value of `name` with the entry's scale applied to numbers
    pub fn value(&self, name: &str) -> Option<DecodedValue> {
        self.table.get(name).and_then(|entry| self.entry_value(entry))
    }

    pub fn entry_value(&self, entry: &RegisterEntry) -> Option<DecodedValue> {
        let reference = entry.reference();
        // Floats go through the shortest decimal even unscaled, matching field()
        if entry.kind.is_numeric() && (entry.scale != 0 || entry.kind.is_float()) {
            return decode_scaled(&*self.data, &reference, entry.scale).map(DecodedValue::Float);
        }
        decode_value(&*self.data, &reference)
    }
}

impl FieldProvider for TableAccessor {
    fn field(&self, name: &str) -> Option<f64> {
        let entry = self.table.get(name)?;
        decode_scaled(&*self.data, &entry.reference(), entry.scale)
    }

    fn timestamp(&self) -> Option<i64> {
        self.data.timestamp()
    }
}

/// AC phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    /// Field name suffix for this phase
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::A => "_a",
            Self::B => "_b",
            Self::C => "_c",
        }
    }

    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];
}

/// Split `name` into its base name and phase suffix, if any
fn split_phase(name: &str) -> (&str, &str) {
    for phase in Phase::ALL {
        if let Some(base) = name.strip_suffix(phase.suffix()) {
            return (base, phase.suffix());
        }
    }
    (name, "")
}

/// Forwards `field(name)` to `field(name_<phase>)`
#[derive(Debug, Clone)]
pub struct PhaseView<P> {
    inner: P,
    phase: Phase,
}

impl<P: FieldProvider> PhaseView<P> {
    pub fn new(inner: P, phase: Phase) -> Self {
        Self { inner, phase }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: FieldProvider> FieldProvider for PhaseView<P> {
    fn field(&self, name: &str) -> Option<f64> {
        let mut phased = String::with_capacity(name.len() + 2);
        phased.push_str(name);
        phased.push_str(self.phase.suffix());
        self.inner.field(&phased)
    }

    fn timestamp(&self) -> Option<i64> {
        self.inner.timestamp()
    }
}

/// Field rewrites applied by [`Reversed`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseRules {
    /// Fields whose sign flips
    pub negate: Vec<String>,
    /// Field pairs that trade places
    pub swap: Vec<(String, String)>,
}

impl Default for ReverseRules {
    fn default() -> Self {
        let pair = |a: &str, b: &str| (a.to_string(), b.to_string());
        Self {
            negate: vec!["active_power".to_string(), "reactive_power".to_string()],
            swap: vec![
                pair("active_energy_delivered", "active_energy_received"),
                pair("reactive_energy_delivered", "reactive_energy_received"),
                pair("apparent_energy_delivered", "apparent_energy_received"),
            ],
        }
    }
}

/// View for a meter installed in the opposite direction
///
/// Rules match base field names, so phase-suffixed fields are rewritten too.
#[derive(Debug, Clone)]
pub struct Reversed<P> {
    inner: P,
    rules: Arc<ReverseRules>,
}

impl<P: FieldProvider> Reversed<P> {
    pub fn new(inner: P) -> Self {
        Self::with_rules(inner, Arc::new(ReverseRules::default()))
    }

    pub fn with_rules(inner: P, rules: Arc<ReverseRules>) -> Self {
        Self { inner, rules }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: FieldProvider> FieldProvider for Reversed<P> {
    fn field(&self, name: &str) -> Option<f64> {
        let (base, suffix) = split_phase(name);

        if self.rules.negate.iter().any(|n| n == base) {
            return self.inner.field(name).map(|v| -v);
        }

        for (a, b) in &self.rules.swap {
            let other = if a == base {
                b
            } else if b == base {
                a
            } else {
                continue;
            };
            return self.inner.field(&format!("{other}{suffix}"));
        }

        self.inner.field(name)
    }

    fn timestamp(&self) -> Option<i64> {
        self.inner.timestamp()
    }
}
