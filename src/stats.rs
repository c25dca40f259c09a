//! Run-wide counters kept by the record reader, the continuity tracker and
//! the dump driver.
//!
//! `reset()` at the start of a run, accumulate while records flow,
//! `report()` at the end.  One `StreamStats` per stream; nothing here is
//! shared between readers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::{TypeRegistry, DT_REBOOT};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub resyncs:             u64,
    pub checksum_errors:     u64,
    pub invalid_lengths:     u64,
    pub zero_record_numbers: u64,
    /// Records whose type is not in the registry.
    pub unknown_types:       u64,
    /// Records of a registered type that has no decoder installed.
    pub no_decoder:          u64,
    pub decoder_errors:      u64,
    pub backward_jumps:      u64,
    pub gaps:                u64,
    pub missing_records:     u64,
    pub total_records:       u64,
    pub total_bytes:         u64,
    pub last_record_number:  u32,
    /// Output records seen per record type.
    pub type_counts:         BTreeMap<u16, u64>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Count one record of `record_type`, flagging it unknown when the
    /// registry has never heard of it.
    pub fn count_type(&mut self, record_type: u16, registry: &TypeRegistry) {
        if !registry.contains(record_type) {
            self.unknown_types += 1;
        }
        *self.type_counts.entry(record_type).or_insert(0) += 1;
    }

    pub fn type_count(&self, record_type: u16) -> u64 {
        self.type_counts.get(&record_type).copied().unwrap_or(0)
    }

    pub fn reboots(&self) -> u64 {
        self.type_count(DT_REBOOT)
    }

    /// Freeze the counters into a report with display names resolved.
    pub fn report(
        &self,
        registry:   &TypeRegistry,
        end_offset: u64,
        started_at: DateTime<Utc>,
    ) -> StatsReport {
        let type_counts = self
            .type_counts
            .iter()
            .map(|(&id, &count)| TypeCount { id, name: registry.name(id).to_owned(), count })
            .collect();
        StatsReport {
            started_at,
            finished_at: Utc::now(),
            end_offset,
            reboots: self.reboots(),
            stats: self.clone(),
            type_counts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeCount {
    pub id:    u16,
    pub name:  String,
    pub count: u64,
}

/// End-of-run summary, printable or serialisable as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub started_at:  DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Source position when the run stopped.
    pub end_offset:  u64,
    pub reboots:     u64,
    pub stats:       StreamStats,
    pub type_counts: Vec<TypeCount>,
}

impl StatsReport {
    pub fn summary(&self) -> String {
        let s = &self.stats;
        let mut out = format!(
            "*** end of processing @{0} (0x{0:x}),  processed: {1} records, {2} bytes\n\
             *** reboots: {3}, resyncs: {4}, chksum_errs: {5}, unk_rtypes: {6}",
            self.end_offset,
            s.total_records,
            s.total_bytes,
            self.reboots,
            s.resyncs,
            s.checksum_errors,
            s.unknown_types,
        );
        if s.backward_jumps + s.gaps > 0 {
            out.push_str(&format!(
                "\n*** recnum backward: {}, gaps: {} ({} records missing)",
                s.backward_jumps, s.gaps, s.missing_records
            ));
        }
        if s.no_decoder + s.decoder_errors > 0 {
            out.push_str(&format!(
                "\n*** no decoder: {}, decoder errors: {}",
                s.no_decoder, s.decoder_errors
            ));
        }
        let counts: Vec<String> = self
            .type_counts
            .iter()
            .map(|t| format!("{} {}: {}", t.id, t.name, t.count))
            .collect();
        out.push_str(&format!("\n\ndt_s:  {{{}}}", counts.join(", ")));
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
