//! Process-variable value and metadata types (§6, §3).
//!
//! The original runtime passes a raw buffer plus an SNL-type tag
//! (`seqChan[].type`) between the compiled program and the PV layer. This
//! is reimplemented as an explicit tagged union rather than ad-hoc
//! reinterpretation of a `void*` — the type tag is still explicit (`DbrType`
//! is carried alongside every `PvData`), it is just enforced by the
//! compiler instead of by convention. See `DESIGN.md` for the rationale.

use std::fmt;

/// The scalar element type of a channel, carried alongside every value —
/// the runtime's equivalent of `seqChan[].type` / the transport value
/// types of §6 (`CHAR, SHORT, LONG, FLOAT, DOUBLE, STRING`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DbrType {
    Char,
    Short,
    Long,
    Float,
    Double,
    String,
}

/// A value of one of the transport's scalar types, possibly an array.
/// Arrays are row-major, as in the original; strings carry their semantic
/// length implicitly via `String`'s length rather than a fixed-capacity
/// NUL-terminated buffer, since Rust's `String` already enforces that
/// invariant.
#[derive(Clone, Debug, PartialEq)]
pub enum PvData {
    Char(Vec<i8>),
    Short(Vec<i16>),
    Long(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl PvData {
    pub fn dbr_type(&self) -> DbrType {
        match self {
            PvData::Char(_) => DbrType::Char,
            PvData::Short(_) => DbrType::Short,
            PvData::Long(_) => DbrType::Long,
            PvData::Float(_) => DbrType::Float,
            PvData::Double(_) => DbrType::Double,
            PvData::String(_) => DbrType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PvData::Char(v) => v.len(),
            PvData::Short(v) => v.len(),
            PvData::Long(v) => v.len(),
            PvData::Float(v) => v.len(),
            PvData::Double(v) => v.len(),
            PvData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncates (by value, not in place) to the first `n` elements,
    /// modulo the transport's actual length — used when a `pvGet` result
    /// is wider or narrower than the requesting channel's declared count
    /// (§8 property 7: "modulo transport truncation to `min(count,
    /// dbCount)`").
    pub fn truncated(&self, n: usize) -> PvData {
        macro_rules! trunc {
            ($v:expr, $variant:ident) => {
                PvData::$variant($v.iter().take(n).cloned().collect())
            };
        }
        match self {
            PvData::Char(v) => trunc!(v, Char),
            PvData::Short(v) => trunc!(v, Short),
            PvData::Long(v) => trunc!(v, Long),
            PvData::Float(v) => trunc!(v, Float),
            PvData::Double(v) => trunc!(v, Double),
            PvData::String(v) => trunc!(v, String),
        }
    }

    /// The first element only, as a single-element `PvData` — used by
    /// monitor callbacks on queued channels, which copy only the first
    /// element of array values into the queue entry (§4.3, §9: documented
    /// truncation, not "fixed").
    pub fn first_only(&self) -> PvData {
        self.truncated(self.len().min(1))
    }
}

/// Alarm status, the runtime's internal taxonomy (§7) plus the subset of
/// transport statuses a PV client adapter can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PvStatus {
    Ok,
    Disconn,
    Timeout,
    Write,
    Read,
    NoConvert,
}

impl fmt::Display for PvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PvStatus::Ok => "OK",
            PvStatus::Disconn => "DISCONN",
            PvStatus::Timeout => "TIMEOUT",
            PvStatus::Write => "WRITE",
            PvStatus::Read => "READ",
            PvStatus::NoConvert => "NOCONVERT",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PvSeverity {
    None,
    Minor,
    Major,
    Invalid,
}

impl fmt::Display for PvSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PvSeverity::None => "NO_ALARM",
            PvSeverity::Minor => "MINOR",
            PvSeverity::Major => "MAJOR",
            PvSeverity::Invalid => "INVALID",
        };
        f.write_str(s)
    }
}

/// Per-channel meta-data (§3): status/severity/timestamp/message.
#[derive(Clone, Debug)]
pub struct PvMeta {
    pub status: PvStatus,
    pub severity: PvSeverity,
    pub timestamp: f64,
    pub message: String,
}

impl Default for PvMeta {
    fn default() -> Self {
        PvMeta {
            status: PvStatus::Disconn,
            severity: PvSeverity::Invalid,
            timestamp: 0.0,
            message: String::new(),
        }
    }
}

impl PvMeta {
    pub fn disconnected() -> Self {
        PvMeta {
            status: PvStatus::Disconn,
            severity: PvSeverity::Invalid,
            timestamp: snl_base::wallclock_now(),
            message: "disconnected".to_string(),
        }
    }

    pub fn timeout(message: &str) -> Self {
        PvMeta {
            status: PvStatus::Timeout,
            severity: PvSeverity::Major,
            timestamp: snl_base::wallclock_now(),
            message: message.to_string(),
        }
    }

    pub fn ok(timestamp: f64) -> Self {
        PvMeta {
            status: PvStatus::Ok,
            severity: PvSeverity::None,
            timestamp,
            message: String::new(),
        }
    }
}
