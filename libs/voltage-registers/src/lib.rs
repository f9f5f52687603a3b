//! VoltageEMS Register Cache and Read Planner
//!
//! Field-device drivers keep the raw words they poll in a [`RegisterStore`]
//! and decode typed values from it.
//!
//! # Key Components
//!
//! - **AddressRangeSet**: sorted address ranges with size-bounded coalescing
//! - **RegisterStore**: sparse, transactional, snapshot-able word map
//! - **decode**: integer, scaled decimal, float, string and bitmask decoders
//! - **PollPlan / refresh**: batched reads through a [`Connection`]
//! - **RegisterTable**: declarative per-device register layout
//! - **TableAccessor**: named fields with phase and reversed views

pub mod accessor;
pub mod config;
pub mod decode;
pub mod error;
pub mod poll;
pub mod range;
pub mod store;
pub mod time;

// Re-exports
pub use accessor::{FieldProvider, FieldProviderExt, Phase, PhaseView, ReverseRules, Reversed, TableAccessor};
pub use config::{PollConfig, RegisterEntry, RegisterTable, MAX_SCALE};
pub use decode::{
    decode_ascii, decode_bitmask, decode_bytes, decode_decimal, decode_float, decode_integer,
    decode_latin1, decode_scaled, decode_utf8, decode_value, BitFlag, DataKind, Decimal, DecodedValue,
    RegisterReference, WordOrder,
};
pub use error::{RegisterError, Result};
pub use poll::{refresh, Connection, PollPlan, ReadKind, RefreshStats, DEFAULT_MAX_SPAN};
pub use range::{AddressRange, AddressRangeSet};
pub use store::{RegisterSnapshot, RegisterStore, RegisterUpdate, WordSource};
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
