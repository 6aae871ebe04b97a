//! Database (log) reader
//!
//! Records are fixed-length byte strings whose layout depends on the
//! database and the firmware. The device reports the record length in the
//! first response page and the matching field list is taken from a
//! caller-supplied [`DatabaseLayout`].

use super::codec::{self, CodecError, Value, ValueKind};
use super::error::{IflagError, Result};
use super::protocol::corus::{DatabaseId, DatabaseRequest, PageHeader, NEXT_PAGE, PAGE_NUMBER_MASK};
use super::protocol::framing::{self, Command};
use super::session::{expect_data, Session};
use bytes::BytesMut;
use chrono::NaiveDateTime;
use futures::Stream;
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Name of the parameter holding the meter pulse weight
pub const PULSE_WEIGHT_PARAMETER: &str = "input_pulse_weight";

/// How a pulse-affected field applies the pulse weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseScaling {
    /// value * pulse weight
    #[default]
    Multiply,
    /// value / pulse weight
    Divide,
}

/// One field of a database record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRecordField {
    /// Field name in the decoded record
    pub name: String,
    /// Wire kind
    pub kind: ValueKind,
    /// Scale by the pulse weight after decoding
    #[serde(default)]
    pub affected_by_pulse_input: bool,
    /// Direction of pulse scaling
    #[serde(default)]
    pub pulse_scaling: PulseScaling,
    /// Divide by this after pulse scaling
    #[serde(default)]
    pub divisor: Option<Decimal>,
}

impl DatabaseRecordField {
    /// Plain field
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            affected_by_pulse_input: false,
            pulse_scaling: PulseScaling::Multiply,
            divisor: None,
        }
    }

    /// Field scaled by the pulse weight
    pub fn pulse(name: impl Into<String>, kind: ValueKind, scaling: PulseScaling) -> Self {
        Self {
            affected_by_pulse_input: true,
            pulse_scaling: scaling,
            ..Self::new(name, kind)
        }
    }

    /// Set the divisor
    #[must_use]
    pub fn with_divisor(mut self, divisor: Decimal) -> Self {
        self.divisor = Some(divisor);
        self
    }

    /// Turn a raw decoded value into the physical quantity
    fn scale(&self, value: Value, pulse_weight: Option<Decimal>) -> std::result::Result<Value, CodecError> {
        if !self.affected_by_pulse_input && self.divisor.is_none() {
            return Ok(value);
        }

        let out_of_range = |v: Decimal| CodecError::ValueOutOfRange {
            kind: self.kind,
            value: v.to_string(),
        };
        let mut number = value.as_decimal().ok_or(CodecError::NotNumeric(self.kind))?;

        if self.affected_by_pulse_input {
            let weight = pulse_weight.ok_or(CodecError::NotNumeric(self.kind))?;
            number = match self.pulse_scaling {
                PulseScaling::Multiply => number.checked_mul(weight),
                PulseScaling::Divide => number.checked_div(weight),
            }
            .ok_or_else(|| out_of_range(number))?;
        }

        if let Some(divisor) = self.divisor {
            number = number
                .checked_div(divisor)
                .ok_or_else(|| out_of_range(number))?;
        }

        value.with_decimal(number.normalize())
    }
}

/// Record length in bytes of a field list
pub fn record_length(fields: &[DatabaseRecordField]) -> usize {
    fields.iter().map(|f| f.kind.width()).sum()
}

/// Field list for one database and record length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutEntry {
    /// Database name
    pub database: String,
    /// Fields in wire order
    pub fields: Vec<DatabaseRecordField>,
}

/// Database name -> record length -> field list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<LayoutEntry>", into = "Vec<LayoutEntry>")]
pub struct DatabaseLayout {
    databases: HashMap<String, BTreeMap<usize, Vec<DatabaseRecordField>>>,
}

impl DatabaseLayout {
    /// Create an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field list; its record length is the sum of the field widths
    pub fn insert(&mut self, database: impl Into<String>, fields: Vec<DatabaseRecordField>) {
        let length = record_length(&fields);
        self.databases
            .entry(database.into())
            .or_default()
            .insert(length, fields);
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, database: impl Into<String>, fields: Vec<DatabaseRecordField>) -> Self {
        self.insert(database, fields);
        self
    }

    /// Field list for a database and record length
    pub fn get(&self, database: &str, record_length: usize) -> Option<&[DatabaseRecordField]> {
        self.databases
            .get(database)
            .and_then(|by_length| by_length.get(&record_length))
            .map(Vec::as_slice)
    }

    /// All field lists of a database by record length
    pub fn entries(&self, database: &str) -> Option<&BTreeMap<usize, Vec<DatabaseRecordField>>> {
        self.databases.get(database)
    }

    /// Databases with at least one layout
    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }
}

impl From<Vec<LayoutEntry>> for DatabaseLayout {
    fn from(entries: Vec<LayoutEntry>) -> Self {
        let mut layout = DatabaseLayout::new();
        for entry in entries {
            layout.insert(entry.database, entry.fields);
        }
        layout
    }
}

impl From<DatabaseLayout> for Vec<LayoutEntry> {
    fn from(layout: DatabaseLayout) -> Self {
        let mut entries: Vec<LayoutEntry> = layout
            .databases
            .into_iter()
            .flat_map(|(database, by_length)| {
                by_length.into_values().map(move |fields| LayoutEntry {
                    database: database.clone(),
                    fields,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.database.cmp(&b.database));
        entries
    }
}

/// One decoded record, fields in layout order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRecord {
    fields: Vec<(String, Value)>,
    timestamp: Option<NaiveDateTime>,
}

impl DatabaseRecord {
    /// Value of a field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fields in layout order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Value of the layout's first date field, `None` when the device
    /// left it unset
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    /// Number of fields present
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if no field carried a value
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for DatabaseRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Decode one record.
///
/// Fields whose bytes are all `0xFF` are left out. Padding fields never
/// appear in the result.
pub fn decode_record(
    fields: &[DatabaseRecordField],
    data: &[u8],
    pulse_weight: Option<Decimal>,
) -> std::result::Result<DatabaseRecord, CodecError> {
    let expected = record_length(fields);
    if data.len() < expected {
        return Err(CodecError::ShortBuffer {
            expected,
            actual: data.len(),
        });
    }

    let mut record = DatabaseRecord::default();
    let mut offset = 0;
    let mut seen_date = false;
    for field in fields {
        let raw = &data[offset..offset + field.kind.width()];
        offset += field.kind.width();

        let first_date = field.kind == ValueKind::Date && !seen_date;
        seen_date |= field.kind == ValueKind::Date;

        if field.kind.is_null() || codec::is_unavailable(raw) {
            continue;
        }
        let value = field.scale(codec::decode(field.kind, raw)?, pulse_weight)?;
        if first_date {
            if let Value::Date(at) = &value {
                record.timestamp = Some(*at);
            }
        }
        record.fields.push((field.name.clone(), value));
    }

    Ok(record)
}

/// Page numbers are 15 bits wide and wrap
fn following_page(number: u16) -> u16 {
    number.wrapping_add(1) & PAGE_NUMBER_MASK
}

/// Lazy sequence of records from one database window.
///
/// Further pages are requested only when the buffered records run out.
/// Dropping the cursor early stops paging and leaves the session active.
pub struct DatabaseCursor<'a> {
    session: &'a mut Session,
    database: DatabaseId,
    fields: Vec<DatabaseRecordField>,
    record_length: usize,
    pulse_weight: Option<Decimal>,
    stop: Option<NaiveDateTime>,
    buffer: BytesMut,
    next_page: u16,
    last_page: bool,
    finished: bool,
    records: usize,
}

impl<'a> DatabaseCursor<'a> {
    /// Database being read
    pub fn database(&self) -> DatabaseId {
        self.database
    }

    /// Record length reported by the device
    pub fn record_length(&self) -> usize {
        self.record_length
    }

    /// Pulse weight applied to flagged fields
    pub fn pulse_weight(&self) -> Option<Decimal> {
        self.pulse_weight
    }

    /// Records yielded so far
    pub fn records_read(&self) -> usize {
        self.records
    }

    /// Next record, `None` once the window is exhausted.
    ///
    /// An undecodable record is yielded as `Err` and reading continues.
    /// Transport, checksum and framing faults are yielded once and end the
    /// sequence.
    pub async fn next(&mut self) -> Option<Result<DatabaseRecord>> {
        loop {
            if self.finished {
                return None;
            }

            if self.buffer.len() >= self.record_length {
                let raw = self.buffer.split_to(self.record_length);
                return match decode_record(&self.fields, &raw, self.pulse_weight) {
                    Ok(record) => {
                        if let (Some(stop), Some(at)) = (self.stop, record.timestamp()) {
                            if at < stop {
                                debug!(database = %self.database, %at, "Window bound passed");
                                self.finished = true;
                                return None;
                            }
                        }
                        self.records += 1;
                        Some(Ok(record))
                    }
                    Err(e) => {
                        warn!(database = %self.database, "Skipping record: {}", e);
                        Some(Err(e.into()))
                    }
                };
            }

            if self.last_page {
                self.finished = true;
                info!(database = %self.database, records = self.records, "Database read complete");
                if self.buffer.is_empty() {
                    return None;
                }
                let trailing = self.buffer.len();
                self.buffer.clear();
                return Some(Err(IflagError::Protocol(format!(
                    "{trailing} trailing bytes do not form a whole record"
                ))));
            }

            if let Err(e) = self.fetch_next_page().await {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }

    async fn fetch_next_page(&mut self) -> Result<()> {
        self.session.send_raw(&[NEXT_PAGE]).await?;
        let payload = expect_data(self.session.read_response().await?)?;
        let (header, data) = PageHeader::parse(&payload, false)?;

        if header.number != self.next_page {
            return Err(IflagError::Protocol(format!(
                "page {} received, expected {}",
                header.number, self.next_page
            )));
        }

        debug!(page = header.number, last = header.last, bytes = data.len(), "Database page");
        self.buffer.extend_from_slice(data);
        self.next_page = following_page(header.number);
        self.last_page = header.last;
        Ok(())
    }

    /// Convert into a `futures` stream
    pub fn into_stream(self) -> impl Stream<Item = Result<DatabaseRecord>> + 'a {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.map(|item| (item, cursor))
        })
    }
}

impl Session {
    /// Read a database window using the layouts from the session config
    pub async fn read_database(
        &mut self,
        name: &str,
        start: Option<NaiveDateTime>,
        stop: Option<NaiveDateTime>,
        pulse_weight: Option<Decimal>,
    ) -> Result<DatabaseCursor<'_>> {
        self.ensure_active()?;
        let layout = self.config.layout.clone();
        self.read_database_with_layout(&layout, name, start, stop, pulse_weight)
            .await
    }

    /// Read a database window with an explicit layout.
    ///
    /// `start` is the newest and `stop` the oldest record to include; the
    /// device emits records newest first. The request is sent and the first
    /// page read before the cursor is returned.
    pub async fn read_database_with_layout(
        &mut self,
        layout: &DatabaseLayout,
        name: &str,
        start: Option<NaiveDateTime>,
        stop: Option<NaiveDateTime>,
        pulse_weight: Option<Decimal>,
    ) -> Result<DatabaseCursor<'_>> {
        self.ensure_active()?;

        let database =
            DatabaseId::from_name(name).ok_or_else(|| IflagError::UnknownDatabase(name.to_string()))?;
        let entries = layout
            .entries(name)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| IflagError::UnknownRecordLayout {
                database: name.to_string(),
                record_length: None,
            })?
            .clone();

        let needs_pulse_weight = entries
            .values()
            .flatten()
            .any(|field| field.affected_by_pulse_input);
        let pulse_weight = match pulse_weight {
            Some(weight) => Some(weight),
            None if needs_pulse_weight => Some(self.resolve_pulse_weight().await?),
            None => None,
        };

        let request = DatabaseRequest::new(database, start, stop)
            .with_field_mask(self.config.field_mask);
        let frame = framing::encode_request(
            Command::ReadDatabase,
            &request.payload()?,
            self.config.checksum,
        )?;
        info!(database = %database, ?start, ?stop, "Reading database window");

        let payload = self.exchange_data(&frame).await?;
        let (header, data) = PageHeader::parse(&payload, true)?;
        let record_length = header.record_length.map_or(0, usize::from);
        let fields = entries
            .get(&record_length)
            .filter(|_| record_length > 0)
            .cloned()
            .ok_or_else(|| IflagError::UnknownRecordLayout {
                database: name.to_string(),
                record_length: Some(record_length),
            })?;
        debug!(page = header.number, last = header.last, record_length, "First database page");

        Ok(DatabaseCursor {
            session: self,
            database,
            fields,
            record_length,
            pulse_weight,
            stop,
            buffer: BytesMut::from(data),
            next_page: following_page(header.number),
            last_page: header.last,
            finished: false,
            records: 0,
        })
    }

    /// Pulse weight from the config override, the session cache, or the device
    pub async fn resolve_pulse_weight(&mut self) -> Result<Decimal> {
        if let Some(weight) = self.config.input_pulse_weight {
            return Ok(weight);
        }
        if let Some(weight) = self.pulse_weight {
            return Ok(weight);
        }

        let mut readout = self.read_parameters_by_name(&[PULSE_WEIGHT_PARAMETER]).await?;
        let parameter = readout
            .entries()
            .first()
            .map(|entry| entry.parameter)
            .ok_or_else(|| IflagError::UnknownParameterName(PULSE_WEIGHT_PARAMETER.into()))?;
        let value = readout.take(parameter.id)?;
        let weight = value
            .as_decimal()
            .ok_or(IflagError::Codec(CodecError::NotNumeric(value.kind())))?;

        info!(%weight, "Read pulse weight");
        self.pulse_weight = Some(weight);
        Ok(weight)
    }
}
