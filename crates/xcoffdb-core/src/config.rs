//! # Session Configuration
//!
//! Tunables for the live loader query and the register engine. Defaults
//! match the target; each can be overridden from the environment:
//!
//! - `XCOFFDB_SETTLE_DELAY_MS`: pause before each loader-info query
//! - `XCOFFDB_LDINFO_SEGMENTS`: initial query buffer size, in records
//! - `XCOFFDB_REGISTER_COUNT`: total logical registers of the target variant

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::ldinfo::query_buffer_len;
use crate::types::registers::LAST_SPECIAL_REGNUM;
use crate::types::Address;

/// Start of the text segment on the target.
pub const TEXT_SEGMENT_BASE: Address = Address::new(0x1000_0000);

/// Address used by the placeholder-instruction flush. Nothing legitimately
/// executes there once the program is running.
pub const DUMMY_INSN_ADDR: Address = Address::new(TEXT_SEGMENT_BASE.value() + 0x200);

/// Overrides [`SessionConfig::settle_delay`], in milliseconds.
pub const SETTLE_DELAY_VAR: &str = "XCOFFDB_SETTLE_DELAY_MS";
/// Overrides [`SessionConfig::initial_load_segments`].
pub const LOAD_SEGMENTS_VAR: &str = "XCOFFDB_LDINFO_SEGMENTS";
/// Overrides [`SessionConfig::register_count`].
pub const REGISTER_COUNT_VAR: &str = "XCOFFDB_REGISTER_COUNT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig
{
    /// Sleep before every live loader-info query. The kernel lags behind
    /// stack growth and queries issued too early step on the user stack.
    pub settle_delay: Duration,
    /// Initial capacity of the loader-info query buffer, in records.
    pub initial_load_segments: usize,
    /// Where the placeholder-instruction flush plants its trap.
    pub scratch_address: Address,
    /// Total logical registers; indices past the special range but below
    /// this count are accepted by stores and ignored.
    pub register_count: usize,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        Self {
            settle_delay: Duration::from_millis(36),
            initial_load_segments: 64,
            scratch_address: DUMMY_INSN_ADDR,
            register_count: LAST_SPECIAL_REGNUM + 1,
        }
    }
}

impl SessionConfig
{
    /// Defaults with environment overrides applied.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self
    {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self
    {
        if let Some(ms) = parse_var::<u64>(&lookup, SETTLE_DELAY_VAR) {
            self.settle_delay = Duration::from_millis(ms);
        }
        if let Some(segments) = parse_var::<usize>(&lookup, LOAD_SEGMENTS_VAR) {
            if segments == 0 {
                warn!(var = LOAD_SEGMENTS_VAR, "ignoring zero segment count");
            } else if query_buffer_len(segments).is_none() {
                warn!(var = LOAD_SEGMENTS_VAR, segments, "ignoring segment count too large for a query buffer");
            } else {
                self.initial_load_segments = segments;
            }
        }
        if let Some(count) = parse_var::<usize>(&lookup, REGISTER_COUNT_VAR) {
            if count <= LAST_SPECIAL_REGNUM {
                warn!(var = REGISTER_COUNT_VAR, count, "register count must cover the special registers");
            } else {
                self.register_count = count;
            }
        }
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
