//! Parameter exchange
//!
//! Batched parameter reads, per-parameter writes and resolution of the
//! firmware-specific name to id map.

use super::codec::{self, CodecError, Value, ValueKind};
use super::error::{IflagError, Result};
use super::protocol::corus::{self, FIRMWARE_PARAMETER_ID};
use super::protocol::Response;
use super::session::{expect_data, Session};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Device-assigned parameter number
pub type ParameterId = u8;

/// A parameter id with the kind the caller expects at it.
///
/// Identity is the id; the kind only selects the codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterRef {
    /// Parameter number
    pub id: ParameterId,
    /// Expected value kind
    pub kind: ValueKind,
}

impl ParameterRef {
    /// Create a parameter reference
    pub const fn new(id: ParameterId, kind: ValueKind) -> Self {
        Self { id, kind }
    }

    /// Firmware identifier, readable on every device
    pub const fn firmware() -> Self {
        Self::new(FIRMWARE_PARAMETER_ID, ValueKind::String)
    }
}

impl PartialEq for ParameterRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ParameterRef {}

impl Hash for ParameterRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Name to parameter table for one firmware generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterIdMap {
    entries: BTreeMap<String, ParameterRef>,
}

impl ParameterIdMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry
    pub fn insert(&mut self, name: impl Into<String>, parameter: ParameterRef) {
        self.entries.insert(name.into(), parameter);
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, parameter: ParameterRef) -> Self {
        self.insert(name, parameter);
        self
    }

    /// Look up a name
    pub fn get(&self, name: &str) -> Option<ParameterRef> {
        self.entries.get(name).copied()
    }

    /// Look up a name, failing with `UnknownParameterName`
    pub fn resolve(&self, name: &str) -> Result<ParameterRef> {
        self.get(name)
            .ok_or_else(|| IflagError::UnknownParameterName(name.to_string()))
    }

    /// Iterate entries by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, ParameterRef)> {
        self.entries.iter().map(|(name, p)| (name.as_str(), *p))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ParameterRef)> for ParameterIdMap {
    fn from_iter<I: IntoIterator<Item = (String, ParameterRef)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Id maps keyed by firmware string
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterCatalog {
    maps: HashMap<String, ParameterIdMap>,
}

impl ParameterCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the map for a firmware
    pub fn insert(&mut self, firmware: impl Into<String>, map: ParameterIdMap) {
        self.maps.insert(firmware.into(), map);
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, firmware: impl Into<String>, map: ParameterIdMap) -> Self {
        self.insert(firmware, map);
        self
    }

    /// Map for a firmware
    pub fn get(&self, firmware: &str) -> Option<&ParameterIdMap> {
        self.maps.get(firmware)
    }

    /// Known firmware strings
    pub fn firmwares(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }
}

/// Per-parameter read failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    /// Device has no value for this id
    #[error("Unknown parameter 0x{0:02X}")]
    UnknownParameter(ParameterId),

    /// Value bytes could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<ParameterError> for IflagError {
    fn from(e: ParameterError) -> Self {
        match e {
            ParameterError::UnknownParameter(id) => IflagError::UnknownParameter(id),
            ParameterError::Codec(e) => IflagError::Codec(e),
        }
    }
}

/// One requested parameter and its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutEntry {
    /// Name, when requested by name
    pub name: Option<String>,
    /// Requested parameter
    pub parameter: ParameterRef,
    /// Decoded value or failure
    pub result: std::result::Result<Value, ParameterError>,
}

/// Result of a batched read: every requested id, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterReadout {
    entries: Vec<ReadoutEntry>,
}

impl ParameterReadout {
    /// All entries in request order
    pub fn entries(&self) -> &[ReadoutEntry] {
        &self.entries
    }

    /// Outcome for an id
    pub fn get(&self, id: ParameterId) -> Option<&std::result::Result<Value, ParameterError>> {
        self.entries
            .iter()
            .find(|e| e.parameter.id == id)
            .map(|e| &e.result)
    }

    /// Outcome for a name
    pub fn get_by_name(&self, name: &str) -> Option<&std::result::Result<Value, ParameterError>> {
        self.entries
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
            .map(|e| &e.result)
    }

    /// Decoded value for an id
    pub fn value(&self, id: ParameterId) -> Option<&Value> {
        self.get(id).and_then(|r| r.as_ref().ok())
    }

    /// Take the outcome for an id as a session result
    pub fn take(&mut self, id: ParameterId) -> Result<Value> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.parameter.id == id)
            .ok_or(IflagError::UnknownParameter(id))?;
        self.entries.remove(pos).result.map_err(IflagError::from)
    }

    /// Successful values in request order
    pub fn values(&self) -> impl Iterator<Item = (ParameterId, &Value)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().ok().map(|v| (e.parameter.id, v)))
    }

    /// Failures in request order
    pub fn errors(&self) -> impl Iterator<Item = (ParameterId, &ParameterError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.parameter.id, err)))
    }

    /// Every parameter decoded
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_ok())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Device answer to one write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum WriteOutcome {
    /// Device answered ACK
    Acknowledged,
    /// Device answered NAK
    Rejected {
        /// Rejection code
        code: u8,
    },
}

/// Result of a write batch, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    outcomes: Vec<(ParameterRef, WriteOutcome)>,
}

impl WriteReport {
    /// All outcomes in request order
    pub fn outcomes(&self) -> &[(ParameterRef, WriteOutcome)] {
        &self.outcomes
    }

    /// Outcome for an id
    pub fn get(&self, id: ParameterId) -> Option<WriteOutcome> {
        self.outcomes
            .iter()
            .find(|(p, _)| p.id == id)
            .map(|(_, outcome)| *outcome)
    }

    /// Every write acknowledged
    pub fn all_acknowledged(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| *outcome == WriteOutcome::Acknowledged)
    }

    /// Rejected writes
    pub fn rejected(&self) -> impl Iterator<Item = (ParameterId, u8)> + '_ {
        self.outcomes.iter().filter_map(|(p, outcome)| match outcome {
            WriteOutcome::Rejected { code } => Some((p.id, *code)),
            WriteOutcome::Acknowledged => None,
        })
    }
}

/// Split refs into consecutive batches whose request ids and response data
/// each fit in `max_payload` bytes
pub fn plan_batches(refs: &[ParameterRef], max_payload: usize) -> Vec<&[ParameterRef]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut response_len = 0;

    for (i, parameter) in refs.iter().enumerate() {
        let width = parameter.kind.width();
        let request_len = i - start;
        if i > start && (request_len + 1 > max_payload || response_len + width > max_payload) {
            batches.push(&refs[start..i]);
            start = i;
            response_len = 0;
        }
        response_len += width;
    }
    if start < refs.len() {
        batches.push(&refs[start..]);
    }

    batches
}

/// Decode one batch response into per-id results
fn decode_batch(
    batch: &[ParameterRef],
    data: &[u8],
) -> Result<Vec<std::result::Result<Value, ParameterError>>> {
    let expected: usize = batch.iter().map(|p| p.kind.width()).sum();
    if data.len() != expected {
        return Err(IflagError::Protocol(format!(
            "read response carries {} bytes, expected {}",
            data.len(),
            expected
        )));
    }

    let mut offset = 0;
    let results = batch
        .iter()
        .map(|parameter| {
            let field = &data[offset..offset + parameter.kind.width()];
            offset += parameter.kind.width();
            if codec::is_unavailable(field) {
                Err(ParameterError::UnknownParameter(parameter.id))
            } else {
                codec::decode(parameter.kind, field).map_err(ParameterError::from)
            }
        })
        .collect();

    Ok(results)
}

/// Decode a read reply; a NAK marks every id of the request unknown
fn decode_reply(
    batch: &[ParameterRef],
    response: Response,
) -> Result<Vec<std::result::Result<Value, ParameterError>>> {
    match response {
        Response::Nak(_) => Ok(batch
            .iter()
            .map(|parameter| Err(ParameterError::UnknownParameter(parameter.id)))
            .collect()),
        other => decode_batch(batch, &expect_data(other)?),
    }
}

impl Session {
    /// Read parameters, batching as needed.
    ///
    /// Per-id failures are collected in the readout; transport, checksum
    /// and framing faults abort the call. An id the device NAKs is
    /// reported as `UnknownParameter`.
    pub async fn read_parameters(&mut self, refs: &[ParameterRef]) -> Result<ParameterReadout> {
        self.ensure_active()?;

        let max_payload = self.config.effective_max_payload();
        let mut readout = ParameterReadout::default();

        for batch in plan_batches(refs, max_payload) {
            let results = match self.request_read(batch).await? {
                // The device refuses a batch holding any id it does not know
                Response::Nak(_) if batch.len() > 1 => {
                    debug!(size = batch.len(), "Batch rejected, reading ids one at a time");
                    let mut results = Vec::with_capacity(batch.len());
                    for parameter in batch {
                        let single = std::slice::from_ref(parameter);
                        let response = self.request_read(single).await?;
                        results.extend(decode_reply(single, response)?);
                    }
                    results
                }
                response => decode_reply(batch, response)?,
            };
            for (parameter, result) in batch.iter().zip(results) {
                if let Err(e) = &result {
                    debug!(id = parameter.id, "Parameter not read: {}", e);
                }
                readout.entries.push(ReadoutEntry {
                    name: None,
                    parameter: *parameter,
                    result,
                });
            }
        }

        Ok(readout)
    }

    async fn request_read(&mut self, batch: &[ParameterRef]) -> Result<Response> {
        let ids: Vec<ParameterId> = batch.iter().map(|p| p.id).collect();
        let frame = corus::read_request(&ids, self.config.checksum)?;
        self.exchange(&frame).await
    }

    /// Read parameters by name through the session's id map
    pub async fn read_parameters_by_name(&mut self, names: &[&str]) -> Result<ParameterReadout> {
        self.ensure_active()?;

        let map = self.read_parameter_id_map(false).await?;
        let refs = names
            .iter()
            .map(|name| map.resolve(name))
            .collect::<Result<Vec<_>>>()?;

        let mut readout = self.read_parameters(&refs).await?;
        for (entry, name) in readout.entries.iter_mut().zip(names) {
            entry.name = Some((*name).to_string());
        }
        Ok(readout)
    }

    /// Write parameters, one frame per parameter.
    ///
    /// Every value is encoded before anything is sent, so an unencodable
    /// value fails the call without touching the device.
    pub async fn write_parameters(&mut self, pairs: &[(ParameterRef, Value)]) -> Result<WriteReport> {
        self.ensure_active()?;

        let algorithm = self.config.checksum;
        let frames = pairs
            .iter()
            .map(|(parameter, value)| -> Result<Vec<u8>> {
                let bytes = codec::encode(parameter.kind, value)?;
                Ok(corus::write_request(parameter.id, &bytes, algorithm)?)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = WriteReport::default();
        for ((parameter, _), frame) in pairs.iter().zip(frames) {
            let outcome = match self.exchange(&frame).await? {
                Response::Ack => WriteOutcome::Acknowledged,
                Response::Nak(code) => {
                    warn!(id = parameter.id, code, "Write rejected");
                    WriteOutcome::Rejected { code }
                }
                Response::Frame(_) => {
                    return Err(IflagError::Protocol(
                        "expected ACK or NAK after write".into(),
                    ))
                }
            };
            report.outcomes.push((*parameter, outcome));
        }

        Ok(report)
    }

    /// Get the name to id map for the connected firmware.
    ///
    /// Served from the session cache unless `force_refresh` is set. A
    /// configured override map is used without reading the device.
    pub async fn read_parameter_id_map(&mut self, force_refresh: bool) -> Result<&ParameterIdMap> {
        self.ensure_active()?;

        if force_refresh || self.id_map.is_none() {
            let map = self.resolve_id_map().await?;
            self.id_map = Some(map);
        }

        self.id_map
            .as_ref()
            .ok_or_else(|| IflagError::Protocol("id map cache empty".into()))
    }

    async fn resolve_id_map(&mut self) -> Result<ParameterIdMap> {
        if let Some(map) = &self.config.id_map_override {
            return Ok(map.clone());
        }

        let firmware = self.read_firmware().await?;
        let map = self
            .config
            .catalog
            .get(&firmware)
            .cloned()
            .ok_or_else(|| IflagError::UnknownFirmware(firmware.clone()))?;
        info!(firmware = %firmware, entries = map.len(), "Resolved parameter id map");
        Ok(map)
    }

    /// Read the firmware identifier from the device
    pub async fn read_firmware(&mut self) -> Result<String> {
        let mut readout = self.read_parameters(&[ParameterRef::firmware()]).await?;
        match readout.take(FIRMWARE_PARAMETER_ID)? {
            Value::String(firmware) => {
                self.firmware = Some(firmware.clone());
                Ok(firmware)
            }
            other => Err(IflagError::Protocol(format!(
                "firmware identifier is not a string: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(kinds: &[ValueKind]) -> Vec<ParameterRef> {
        kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| ParameterRef::new(i as u8, *kind))
            .collect()
    }

    #[test]
    fn test_identity_is_id() {
        assert_eq!(
            ParameterRef::new(7, ValueKind::Byte),
            ParameterRef::new(7, ValueKind::Word)
        );
        assert_ne!(
            ParameterRef::new(7, ValueKind::Byte),
            ParameterRef::new(8, ValueKind::Byte)
        );
    }

    #[test]
    fn test_nak_reply_marks_ids_unknown() {
        let parameters = refs(&[ValueKind::Word]);
        let results = decode_reply(&parameters, Response::Nak(0x15)).unwrap();
        assert_eq!(results, vec![Err(ParameterError::UnknownParameter(0))]);

        assert!(matches!(
            decode_reply(&parameters, Response::Ack),
            Err(IflagError::Protocol(_))
        ));
    }

    #[test]
    fn test_batches_follow_response_width() {
        // 10 strings of 8 bytes: 3 per batch under a 24 byte limit
        let parameters = refs(&[ValueKind::String; 10]);
        let batches = plan_batches(&parameters, 24);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_batches_follow_request_width() {
        let parameters = refs(&[ValueKind::Byte; 25]);
        let batches = plan_batches(&parameters, 10);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 10));
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 25);
    }

    #[test]
    fn test_no_batches_for_nothing() {
        assert!(plan_batches(&[], 255).is_empty());
    }

    #[test]
    fn test_decode_batch_marks_unavailable() {
        let batch = [
            ParameterRef::new(1, ValueKind::Word),
            ParameterRef::new(2, ValueKind::Word),
            ParameterRef::new(3, ValueKind::Byte),
        ];
        let results = decode_batch(&batch, &[0x34, 0x12, 0xFF, 0xFF, 0x07]).unwrap();
        assert_eq!(results[0], Ok(Value::Word(0x1234)));
        assert_eq!(results[1], Err(ParameterError::UnknownParameter(2)));
        assert_eq!(results[2], Ok(Value::Byte(7)));
    }

    #[test]
    fn test_decode_batch_length_mismatch() {
        let batch = [ParameterRef::new(1, ValueKind::ULong)];
        assert!(matches!(
            decode_batch(&batch, &[1, 2, 3]),
            Err(IflagError::Protocol(_))
        ));
    }

    #[test]
    fn test_readout_take() {
        let mut readout = ParameterReadout {
            entries: vec![
                ReadoutEntry {
                    name: None,
                    parameter: ParameterRef::new(1, ValueKind::Byte),
                    result: Ok(Value::Byte(1)),
                },
                ReadoutEntry {
                    name: Some("missing".into()),
                    parameter: ParameterRef::new(2, ValueKind::Byte),
                    result: Err(ParameterError::UnknownParameter(2)),
                },
            ],
        };
        assert!(!readout.is_complete());
        assert_eq!(readout.values().count(), 1);
        assert!(readout.get_by_name("missing").is_some());
        assert!(matches!(
            readout.take(2),
            Err(IflagError::UnknownParameter(2))
        ));
        assert_eq!(readout.take(1).unwrap(), Value::Byte(1));
        assert!(readout.is_empty());
    }

    #[test]
    fn test_id_map_from_toml() {
        let map: ParameterIdMap = toml::from_str(
            r#"
            input_pulse_weight = { id = 0x22, kind = "float3" }
            firmware = { id = 0x5E, kind = "string" }
            "#,
        )
        .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("input_pulse_weight").map(|p| p.kind),
            Some(ValueKind::Float3)
        );
        assert!(matches!(
            map.resolve("nope"),
            Err(IflagError::UnknownParameterName(_))
        ));
    }
}
