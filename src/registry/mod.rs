//! Record-type registry: required lengths, display names, decoders, emitters.
//!
//! # Lifecycle
//! A [`RegistryBuilder`] collects every known record type once at startup and
//! produces an immutable [`TypeRegistry`].  The record reader only ever reads
//! from it, so a registry can be shared freely between threads.
//!
//! # Resync landmarks
//! SYNC and REBOOT must be registered with non-zero required lengths.  The
//! resynchronizer relies on them to recognise a record boundary; without
//! them any framing error ends the read loop.
//!
//! # Overlays
//! A JSON [`TypeTable`] can add types or override lengths and names of the
//! built-in ones, for streams written by newer firmware.  Overriding a type
//! keeps its decoder and emitters.

pub mod builtin;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::{HEADER_SIZE, RLEN_MAX};
use crate::record::Record;

pub use self::builtin::*;

/// Display name reported for unregistered record types.
pub const UNKNOWN_NAME: &str = "unk";

// ── Errors ───────────────────────────────────────────────────────────────────

/// Failure inside a decoder or emitter.  Scoped to one record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record too short: wanted {wanted}, got {got}")]
    TooShort { wanted: usize, got: usize },
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("type {id}: required length {length} outside {min}..={max}", min = HEADER_SIZE, max = RLEN_MAX)]
    InvalidLength { id: u16, length: u16 },
    #[error("type table parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Decoder / emitter seams ──────────────────────────────────────────────────

/// Output of a decoder: a one-line summary plus labelled fields for the
/// detailed display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Decoded {
    pub summary: String,
    pub fields:  Vec<(String, String)>,
}

impl Decoded {
    pub fn new(summary: impl Into<String>) -> Self {
        Self { summary: summary.into(), fields: Vec::new() }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((name.into(), value.to_string()));
        self
    }
}

/// Interprets the payload of one record type.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError>;
}

/// Writes a derived view of a decoded record (CSV rows, position logs, ...).
pub trait RecordEmitter: Send + Sync {
    fn emit(&self, record: &Record, decoded: &Decoded, out: &mut dyn Write) -> Result<(), DecodeError>;
}

impl<F> RecordDecoder for F
where
    F: Fn(&Record) -> Result<Decoded, DecodeError> + Send + Sync,
{
    fn decode(&self, record: &Record) -> Result<Decoded, DecodeError> {
        self(record)
    }
}

impl<F> RecordEmitter for F
where
    F: Fn(&Record, &Decoded, &mut dyn Write) -> Result<(), DecodeError> + Send + Sync,
{
    fn emit(&self, record: &Record, decoded: &Decoded, out: &mut dyn Write) -> Result<(), DecodeError> {
        self(record, decoded, out)
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────────

pub struct TypeDescriptor {
    /// Exact `record_length` this type must have; 0 means variable.
    pub required_length: u16,
    pub decoder:         Option<Box<dyn RecordDecoder>>,
    pub emitters:        Vec<Box<dyn RecordEmitter>>,
    pub display_name:    String,
}

impl TypeDescriptor {
    pub fn new(display_name: impl Into<String>, required_length: u16) -> Self {
        Self {
            required_length,
            decoder:      None,
            emitters:     Vec::new(),
            display_name: display_name.into(),
        }
    }

    pub fn with_decoder<D: RecordDecoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Some(Box::new(decoder));
        self
    }

    pub fn with_emitter<E: RecordEmitter + 'static>(mut self, emitter: E) -> Self {
        self.emitters.push(Box::new(emitter));
        self
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("display_name", &self.display_name)
            .field("required_length", &self.required_length)
            .field("decoder", &self.decoder.is_some())
            .field("emitters", &self.emitters.len())
            .finish()
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<u16, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The device's built-in record types with their header-level decoders.
    pub fn core() -> Self {
        builtin::register_core(RegistryBuilder::default()).build()
    }

    pub fn lookup(&self, record_type: u16) -> Option<&TypeDescriptor> {
        self.types.get(&record_type)
    }

    pub fn contains(&self, record_type: u16) -> bool {
        self.types.contains_key(&record_type)
    }

    /// Required length for `record_type`; 0 when unknown or variable.
    pub fn required_length(&self, record_type: u16) -> u16 {
        self.types.get(&record_type).map(|d| d.required_length).unwrap_or(0)
    }

    pub fn name(&self, record_type: u16) -> &str {
        self.types
            .get(&record_type)
            .map(|d| d.display_name.as_str())
            .unwrap_or(UNKNOWN_NAME)
    }

    /// Resolve a display name (case-insensitive) back to its type id.
    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.types
            .iter()
            .find(|(_, d)| d.display_name.eq_ignore_ascii_case(name))
            .map(|(&id, _)| id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.types.keys().copied()
    }

    pub fn len(&self) -> usize { self.types.len() }

    pub fn is_empty(&self) -> bool { self.types.is_empty() }
}

#[derive(Default)]
pub struct RegistryBuilder {
    types: BTreeMap<u16, TypeDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the descriptor for `id`.
    pub fn register(mut self, id: u16, descriptor: TypeDescriptor) -> Self {
        self.types.insert(id, descriptor);
        self
    }

    /// Append an emitter to an already registered type.  Unknown ids are
    /// ignored.
    pub fn add_emitter<E: RecordEmitter + 'static>(mut self, id: u16, emitter: E) -> Self {
        if let Some(d) = self.types.get_mut(&id) {
            d.emitters.push(Box::new(emitter));
        }
        self
    }

    /// Apply a type table on top of what is registered so far.
    pub fn overlay(mut self, table: &TypeTable) -> Result<Self, RegistryError> {
        for entry in &table.types {
            if let Some(len) = entry.required_length {
                if len != 0 && !((HEADER_SIZE as u16)..=RLEN_MAX).contains(&len) {
                    return Err(RegistryError::InvalidLength { id: entry.id, length: len });
                }
            }
            match self.types.get_mut(&entry.id) {
                Some(d) => {
                    if let Some(len) = entry.required_length {
                        d.required_length = len;
                    }
                    if let Some(name) = &entry.name {
                        d.display_name = name.clone();
                    }
                }
                None => {
                    let name = entry.name.clone().unwrap_or_else(|| format!("type_{}", entry.id));
                    let len  = entry.required_length.unwrap_or(0);
                    self.types.insert(entry.id, TypeDescriptor::new(name, len));
                }
            }
        }
        Ok(self)
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry { types: self.types }
    }
}

// ── Type table (JSON) ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTable {
    /// Type-table revision the file was written against, if known.
    #[serde(default)]
    pub revision: Option<u32>,
    pub types:    Vec<TypeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeEntry {
    pub id: u16,
    #[serde(default)]
    pub name: Option<String>,
    /// Omitted on an existing type keeps its length; on a new type means
    /// variable length.
    #[serde(default)]
    pub required_length: Option<u16>,
}

impl TypeTable {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegistryError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}
