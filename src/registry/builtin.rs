//! Built-in record types and their header-level decoders.
//!
//! Only the core bookkeeping records are interpreted here.  GPS and sensor
//! payloads are registered with their names so they are counted and can be
//! filtered, but their contents are left to external decoders.

use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDate;

use crate::header::{DT_H_REVISION, HEADER_SIZE, SYNC_MAJIK, SYNC_MAJIK_OFFSET};
use crate::record::Record;
use super::{DecodeError, Decoded, RecordDecoder, RegistryBuilder, TypeDescriptor};

// ── Record type ids ──────────────────────────────────────────────────────────

pub const DT_REBOOT:          u16 = 1;
pub const DT_VERSION:         u16 = 2;
pub const DT_SYNC:            u16 = 3;
pub const DT_EVENT:           u16 = 4;
pub const DT_DEBUG:           u16 = 5;
pub const DT_GPS_VERSION:     u16 = 16;
pub const DT_GPS_TIME:        u16 = 17;
pub const DT_GPS_GEO:         u16 = 18;
pub const DT_GPS_XYZ:         u16 = 19;
pub const DT_SENSOR_DATA:     u16 = 20;
pub const DT_SENSOR_SET:      u16 = 21;
pub const DT_TEST:            u16 = 22;
pub const DT_NOTE:            u16 = 23;
pub const DT_CONFIG:          u16 = 24;
pub const DT_GPS_RAW_SIRFBIN: u16 = 32;

// ── Fixed record sizes ───────────────────────────────────────────────────────

pub const SYNC_RECORD_LEN:   u16 = 36;
/// 44-byte reboot record followed by the 84-byte overwatch control block.
pub const REBOOT_RECORD_LEN: u16 = 128;
pub const EVENT_RECORD_LEN:  u16 = 40;

const DATETIME_OFFSET:  usize = HEADER_SIZE;
const PREV_SYNC_OFFSET: usize = 28;
const REVISION_OFFSET:  usize = 36;
const BASE_OFFSET:      usize = 40;
const VERSION_HDR_LEN:  usize = 24;
const NOTE_HDR_LEN:     usize = 28;

/// Register every core record type on `builder`.
pub fn register_core(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(DT_REBOOT,  TypeDescriptor::new("REBOOT", REBOOT_RECORD_LEN).with_decoder(RebootDecoder))
        .register(DT_VERSION, TypeDescriptor::new("VERSION", 0).with_decoder(VersionDecoder))
        .register(DT_SYNC,    TypeDescriptor::new("SYNC", SYNC_RECORD_LEN).with_decoder(SyncDecoder))
        .register(DT_EVENT,   TypeDescriptor::new("EVENT", EVENT_RECORD_LEN).with_decoder(EventDecoder))
        .register(DT_DEBUG,   TypeDescriptor::new("DEBUG", 0).with_decoder(TextDecoder))
        .register(DT_GPS_VERSION,     TypeDescriptor::new("GPS_VERSION", 0))
        .register(DT_GPS_TIME,        TypeDescriptor::new("GPS_TIME", 0))
        .register(DT_GPS_GEO,         TypeDescriptor::new("GPS_GEO", 0))
        .register(DT_GPS_XYZ,         TypeDescriptor::new("GPS_XYZ", 0))
        .register(DT_SENSOR_DATA,     TypeDescriptor::new("SENSOR_DATA", 0))
        .register(DT_SENSOR_SET,      TypeDescriptor::new("SENSOR_SET", 0))
        .register(DT_TEST,            TypeDescriptor::new("TEST", 0))
        .register(DT_NOTE,            TypeDescriptor::new("NOTE", 0).with_decoder(NoteDecoder))
        .register(DT_CONFIG,          TypeDescriptor::new("CONFIG", 0))
        .register(DT_GPS_RAW_SIRFBIN, TypeDescriptor::new("GPS_RAW", 0))
}

fn need(record: &Record, wanted: usize) -> Result<&[u8], DecodeError> {
    let bytes = record.as_bytes();
    if bytes.len() < wanted {
        return Err(DecodeError::TooShort { wanted, got: bytes.len() });
    }
    Ok(bytes)
}

/// Fields shared by SYNC and REBOOT: datetime, previous sync offset, majik.
fn sync_fields(bytes: &[u8]) -> Result<(u32, String), DecodeError> {
    let majik = LittleEndian::read_u32(&bytes[SYNC_MAJIK_OFFSET..SYNC_MAJIK_OFFSET + 4]);
    if majik != SYNC_MAJIK {
        return Err(DecodeError::Malformed(format!(
            "bad sync majik 0x{majik:08x}, expected 0x{SYNC_MAJIK:08x}"
        )));
    }
    let prev_sync = LittleEndian::read_u32(&bytes[PREV_SYNC_OFFSET..PREV_SYNC_OFFSET + 4]);
    let datetime  = hex::encode(&bytes[DATETIME_OFFSET..PREV_SYNC_OFFSET]);
    Ok((prev_sync, datetime))
}

// ── Decoders ─────────────────────────────────────────────────────────────────

pub struct SyncDecoder;
impl RecordDecoder for SyncDecoder {
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError> {
        let bytes = need(record, SYNC_RECORD_LEN as usize)?;
        let (prev_sync, datetime) = sync_fields(bytes)?;
        Ok(Decoded::new(format!("prev: @{prev_sync} (0x{prev_sync:x})"))
            .field("prev_sync", prev_sync)
            .field("datetime", datetime))
    }
}

pub struct RebootDecoder;
impl RecordDecoder for RebootDecoder {
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError> {
        let bytes = need(record, BASE_OFFSET + 4)?;
        let (prev_sync, datetime) = sync_fields(bytes)?;
        let revision = LittleEndian::read_u32(&bytes[REVISION_OFFSET..REVISION_OFFSET + 4]);
        let base     = LittleEndian::read_u32(&bytes[BASE_OFFSET..BASE_OFFSET + 4]);
        let mut summary = format!("rev: {revision}  base: 0x{base:08x}  prev: @{prev_sync}");
        if revision != DT_H_REVISION {
            summary.push_str(&format!("  (dt revision mismatch, expected {DT_H_REVISION})"));
        }
        Ok(Decoded::new(summary)
            .field("dt_h_revision", revision)
            .field("base", format!("0x{base:08x}"))
            .field("prev_sync", prev_sync)
            .field("datetime", datetime))
    }
}

pub struct VersionDecoder;
impl RecordDecoder for VersionDecoder {
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError> {
        let bytes = need(record, VERSION_HDR_LEN)?;
        let base  = LittleEndian::read_u32(&bytes[20..24]);
        Ok(Decoded::new(format!("base: 0x{base:08x}"))
            .field("base", format!("0x{base:08x}"))
            .field("image_info", hex::encode(&bytes[VERSION_HDR_LEN..])))
    }
}

pub struct EventDecoder;
impl RecordDecoder for EventDecoder {
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError> {
        let bytes = need(record, EVENT_RECORD_LEN as usize)?;
        let ev    = LittleEndian::read_u16(&bytes[18..20]);
        let mut args = [0u32; 4];
        LittleEndian::read_u32_into(&bytes[20..36], &mut args);
        let (pcode, w) = (bytes[36], bytes[37]);
        let summary = format!(
            "{} {} {} {} {}",
            event_name(ev), args[0], args[1], args[2], args[3]
        );
        Ok(Decoded::new(summary)
            .field("event", ev)
            .field("args", format!("{args:?}"))
            .field("pcode", pcode)
            .field("where", w))
    }
}

pub struct NoteDecoder;
impl RecordDecoder for NoteDecoder {
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError> {
        let bytes = need(record, NOTE_HDR_LEN)?;
        let year  = LittleEndian::read_u16(&bytes[20..22]);
        let (month, day, hrs, min, sec) = (bytes[22], bytes[23], bytes[24], bytes[25], bytes[26]);
        let stamp = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .and_then(|d| d.and_hms_opt(hrs as u32, min as u32, sec as u32))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| format!("{year}/{month}/{day} {hrs}:{min}:{sec} (invalid)"));
        let text = nul_terminated(&bytes[NOTE_HDR_LEN..]);
        Ok(Decoded::new(format!("{stamp}  {text}"))
            .field("note_len", LittleEndian::read_u16(&bytes[18..20]))
            .field("time", stamp)
            .field("note", text))
    }
}

/// Free-form ascii payload, as laid down by DEBUG records.
pub struct TextDecoder;
impl RecordDecoder for TextDecoder {
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError> {
        let text = nul_terminated(record.payload());
        Ok(Decoded::new(text.clone()).field("text", text))
    }
}

fn nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub fn event_name(ev: u16) -> &'static str {
    match ev {
        1  => "SURFACED",
        2  => "SUBMERGED",
        3  => "DOCKED",
        4  => "UNDOCKED",
        5  => "GPS_BOOT",
        6  => "GPS_BOOT_TIME",
        7  => "GPS_RECONFIG",
        8  => "GPS_START",
        9  => "GPS_OFF",
        10 => "GPS_STANDBY",
        11 => "GPS_FAST",
        12 => "GPS_FIRST",
        13 => "GPS_SATS_2",
        14 => "GPS_SATS_7",
        15 => "GPS_SATS_29",
        16 => "GPS_CYCLE_TIME",
        17 => "GPS_GEO",
        18 => "GPS_XYZ",
        19 => "GPS_TIME",
        20 => "GPS_RX_ERR",
        21 => "SSW_DELAY_TIME",
        22 => "SSW_BLK_TIME",
        23 => "SSW_GRP_TIME",
        24 => "PANIC_WARN",
        _  => "UNK_EVENT",
    }
}
