// ── Reply normalization ──
//
// Backends disagree on reply layouts. Every reply is first lowered into a
// small dynamic tree (`Reply`), then decoded by shape with exhaustive
// matches. The D-Bus client lowers `zvariant` values, the command-line
// client lowers `serde_json` values.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::types::{DisplayRecord, FeatureMetadata, Reading, WireFeature};

/// Backend-agnostic reply tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A fixed-arity structure (D-Bus struct or message body).
    Tuple(Vec<Reply>),
    /// A homogeneous array.
    List(Vec<Reply>),
    /// A dictionary; non-string keys are rendered to strings.
    Record(BTreeMap<String, Reply>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Empty body or JSON `null`.
    Unit,
}

impl Reply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Str(s) => parse_int(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::Unit => "unit",
        }
    }

    /// Unwrap single-element tuples (message envelopes).
    pub fn into_envelope(self) -> Self {
        let mut reply = self;
        loop {
            match reply {
                Self::Tuple(mut items) if items.len() == 1 => {
                    reply = items.swap_remove(0);
                }
                other => return other,
            }
        }
    }

    /// Strip a trailing `(status, message)` pair.
    ///
    /// A nonzero status becomes [`Error::Remote`]; otherwise the remaining
    /// payload is returned with its envelope unwrapped.
    pub fn strip_status(self) -> Result<Self, Error> {
        self.strip_status_after(0)
    }

    /// Like [`Reply::strip_status`], but a tail is only recognized when at
    /// least `payload` items precede it, so a `(current, maximum, text)`
    /// reading is never mistaken for `(.., status, message)`.
    ///
    /// A lone `(status, message)` pair whose message is not a number is
    /// still taken as a status.
    pub fn strip_status_after(self, payload: usize) -> Result<Self, Error> {
        let reply = self.into_envelope();
        let Self::Tuple(mut items) = reply else {
            return Ok(reply);
        };
        let n = items.len();
        let tail_shape = n >= 2
            && matches!(items.get(n - 2), Some(Self::Int(_)))
            && matches!(items.get(n - 1), Some(Self::Str(_)));
        let bare_failure = n == 2
            && matches!(items.get(1), Some(Self::Str(s)) if parse_int(s).is_none());
        if !(tail_shape && (n - 2 >= payload || bare_failure)) {
            return Ok(Self::Tuple(items));
        }

        let message = match items.pop() {
            Some(Self::Str(s)) => s,
            _ => String::new(),
        };
        let status = items.pop().and_then(|s| s.as_int()).unwrap_or(0);
        if status != 0 {
            return Err(Error::Remote {
                status: i32::try_from(status).unwrap_or(i32::MIN),
                message: if message.is_empty() {
                    "unknown backend error".into()
                } else {
                    message
                },
            });
        }

        Ok(match items.len() {
            0 => Self::Unit,
            _ => Self::Tuple(items).into_envelope(),
        })
    }
}

// ── Conversions ─────────────────────────────────────────────────────

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Unit,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Unit),
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Record(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Reply> for serde_json::Value {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Unit => Self::Null,
            Reply::Bool(b) => Self::Bool(b),
            Reply::Int(v) => Self::from(v),
            Reply::Float(f) => Self::from(f),
            Reply::Str(s) => Self::String(s),
            Reply::Tuple(items) | Reply::List(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            Reply::Record(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Parse a decimal or `0x`-prefixed hex integer.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn shape(what: &str, reply: &Reply) -> Error {
    Error::ReplyShape(format!("{what}: unexpected {}", reply.kind()))
}

fn to_u16(reply: &Reply, what: &str) -> Result<u16, Error> {
    reply
        .as_int()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| shape(what, reply))
}

fn to_code(reply: &Reply) -> Option<u8> {
    reply.as_int().and_then(|v| u8::try_from(v).ok())
}

fn lookup<'a>(map: &'a BTreeMap<String, Reply>, keys: &[&str]) -> Option<&'a Reply> {
    keys.iter().find_map(|k| map.get(*k))
}

fn lookup_string(map: &BTreeMap<String, Reply>, keys: &[&str]) -> Option<String> {
    lookup(map, keys).and_then(|r| match r {
        Reply::Str(s) if !s.is_empty() => Some(s.clone()),
        Reply::Int(v) => Some(v.to_string()),
        _ => None,
    })
}

// ── Readings ────────────────────────────────────────────────────────

/// Decode a single-value read into `(current, maximum?)`.
///
/// Accepted shapes: a tuple of 2+ elements `(current, maximum, ..)`, a
/// record with `value|CurrentValue|current` and optional
/// `maximum|MaxValue|max`, or a bare integer.
pub fn decode_reading(reply: Reply) -> Result<Reading, Error> {
    let body = reply.strip_status_after(2)?;
    reading_from(&body)
}

fn reading_from(body: &Reply) -> Result<Reading, Error> {
    match body {
        Reply::Tuple(items) | Reply::List(items) if items.len() >= 2 => {
            let current = to_u16(&items[0], "current value")?;
            let maximum = to_u16(&items[1], "maximum value")?;
            Ok(Reading::new(current, Some(maximum)))
        }
        Reply::Record(map) => {
            // `ddcutil getvcp --json` nests the pair under `vcp.values`.
            if let Some(inner) = lookup(map, &["vcp", "values"]) {
                return reading_from(inner);
            }
            let current = lookup(map, &["value", "CurrentValue", "current"])
                .ok_or_else(|| Error::ReplyShape("record without a current value".into()))?;
            let current = to_u16(current, "current value")?;
            let maximum = lookup(map, &["maximum", "MaxValue", "max"])
                .map(|m| to_u16(m, "maximum value"))
                .transpose()?;
            Ok(Reading::new(current, maximum))
        }
        Reply::Int(_) => Ok(Reading::new(to_u16(body, "current value")?, None)),
        other => Err(shape("value reply", other)),
    }
}

/// Decode a bulk read into a map of readings keyed by feature code.
///
/// Accepts a list of `(code, current, maximum, ..)` entries or a record
/// keyed by code whose values are readings.
pub fn decode_readings(reply: Reply) -> Result<BTreeMap<u8, Reading>, Error> {
    let body = reply.strip_status()?;
    let mut out = BTreeMap::new();
    match body {
        Reply::List(items) => {
            for item in items {
                let Reply::Tuple(fields) = item else {
                    return Err(shape("bulk reading entry", &item));
                };
                let code = fields
                    .first()
                    .and_then(to_code)
                    .ok_or_else(|| Error::ReplyShape("bulk reading without code".into()))?;
                let rest = Reply::Tuple(fields.into_iter().skip(1).collect());
                out.insert(code, reading_from(&rest)?);
            }
        }
        Reply::Record(map) => {
            for (key, value) in map {
                let code = parse_int(&key)
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| Error::ReplyShape(format!("bad feature code key {key:?}")))?;
                out.insert(code, reading_from(&value)?);
            }
        }
        Reply::Unit => {}
        other => return Err(shape("bulk reply", &other)),
    }
    Ok(out)
}

/// Decode a write acknowledgement; only the status matters.
pub fn decode_ack(reply: Reply) -> Result<(), Error> {
    reply.strip_status().map(|_| ())
}

// ── Capabilities ────────────────────────────────────────────────────

/// Decode a capability listing.
///
/// Accepted shapes: a list of codes (or of records/tuples led by a code), a
/// record keyed by code whose values are metadata records or
/// `(name, description, choices)` tuples, or the capabilities-metadata
/// layout `(model, mccs_major, mccs_minor, commands, features, ..)`.
pub fn decode_capabilities(reply: Reply) -> Result<Vec<WireFeature>, Error> {
    let body = reply.strip_status()?;
    capabilities_from(body)
}

fn capabilities_from(body: Reply) -> Result<Vec<WireFeature>, Error> {
    match body {
        Reply::Tuple(items) if items.len() >= 5 => {
            let features = items.into_iter().nth(4).unwrap_or(Reply::Unit);
            capabilities_from(features)
        }
        Reply::List(items) => items.into_iter().map(feature_entry).collect(),
        Reply::Record(mut map) => {
            if let Some(inner) = map.remove("features") {
                return capabilities_from(inner);
            }
            map.into_iter()
                .map(|(key, value)| {
                    let code = parse_int(&key)
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or_else(|| Error::ReplyShape(format!("bad feature code key {key:?}")))?;
                    Ok(WireFeature {
                        code,
                        metadata: metadata_from(&value),
                    })
                })
                .collect()
        }
        Reply::Unit => Ok(Vec::new()),
        other => Err(shape("capability reply", &other)),
    }
}

fn feature_entry(item: Reply) -> Result<WireFeature, Error> {
    match &item {
        Reply::Int(_) | Reply::Str(_) => to_code(&item)
            .map(WireFeature::bare)
            .ok_or_else(|| shape("feature code", &item)),
        Reply::Tuple(fields) => {
            let code = fields
                .first()
                .and_then(to_code)
                .ok_or_else(|| shape("feature entry", &item))?;
            let rest = Reply::Tuple(fields.iter().skip(1).cloned().collect());
            Ok(WireFeature {
                code,
                metadata: metadata_from(&rest),
            })
        }
        Reply::Record(map) => {
            let code = lookup(map, &["code", "feature_code"])
                .and_then(to_code)
                .ok_or_else(|| shape("feature entry", &item))?;
            Ok(WireFeature {
                code,
                metadata: metadata_from(&item),
            })
        }
        other => Err(shape("feature entry", other)),
    }
}

fn metadata_from(value: &Reply) -> Option<FeatureMetadata> {
    match value {
        Reply::Record(map) => {
            let flag = |keys: &[&str]| lookup(map, keys).and_then(Reply::as_bool).unwrap_or(false);
            let number = |keys: &[&str]| {
                lookup(map, keys)
                    .and_then(Reply::as_int)
                    .and_then(|v| u16::try_from(v).ok())
            };
            Some(FeatureMetadata {
                name: lookup_string(map, &["name", "feature_name"]),
                description: lookup_string(map, &["description", "feature_description"]),
                continuous: flag(&["continuous", "is_continuous"]),
                complex: flag(&["complex", "is_complex"]),
                read_only: flag(&["read_only", "is_read_only"]),
                write_only: flag(&["write_only", "is_write_only"]),
                minimum: number(&["minimum", "min"]),
                maximum: number(&["maximum", "max"]),
                default_value: number(&["default_value", "default"]),
                choices: lookup(map, &["choices", "values"])
                    .map(choices_from)
                    .unwrap_or_default(),
            })
        }
        Reply::Tuple(items) if !items.is_empty() => Some(FeatureMetadata {
            name: items.first().and_then(Reply::as_str).map(str::to_owned),
            description: items.get(1).and_then(Reply::as_str).map(str::to_owned),
            choices: items.get(2).map(choices_from).unwrap_or_default(),
            ..FeatureMetadata::default()
        }),
        _ => None,
    }
}

fn choices_from(value: &Reply) -> BTreeMap<u16, String> {
    match value {
        Reply::Record(map) => map
            .iter()
            .filter_map(|(k, v)| {
                let code = parse_int(k).and_then(|c| u16::try_from(c).ok())?;
                Some((code, v.as_str()?.to_owned()))
            })
            .collect(),
        Reply::List(items) => items
            .iter()
            .filter_map(|item| match item {
                Reply::Tuple(pair) if pair.len() >= 2 => {
                    let code = pair[0].as_int().and_then(|c| u16::try_from(c).ok())?;
                    Some((code, pair[1].as_str()?.to_owned()))
                }
                Reply::Record(map) => {
                    let code = lookup(map, &["value"])?
                        .as_int()
                        .and_then(|c| u16::try_from(c).ok())?;
                    Some((code, lookup_string(map, &["label", "name"])?))
                }
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Decode the metadata of one feature.
///
/// Accepts the service layout `(name, description, read_only, write_only,
/// read_write, complex, continuous)` or a metadata record.
pub fn decode_feature_metadata(reply: Reply) -> Result<FeatureMetadata, Error> {
    let body = reply.strip_status_after(7)?;
    match &body {
        Reply::Tuple(items) if items.len() >= 7 => {
            let text = |i: usize| {
                items
                    .get(i)
                    .and_then(Reply::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
            };
            let flag = |i: usize| items.get(i).and_then(Reply::as_bool).unwrap_or(false);
            Ok(FeatureMetadata {
                name: text(0),
                description: text(1),
                read_only: flag(2),
                write_only: flag(3),
                complex: flag(5),
                continuous: flag(6),
                ..FeatureMetadata::default()
            })
        }
        Reply::Record(_) => {
            metadata_from(&body).ok_or_else(|| shape("feature metadata reply", &body))
        }
        other => Err(shape("feature metadata reply", other)),
    }
}

// ── Service ─────────────────────────────────────────────────────────

/// Decode a reply whose payload is a single string, such as the raw MCCS
/// capabilities string.
pub fn decode_text(reply: Reply) -> Result<String, Error> {
    match reply.strip_status_after(1)? {
        Reply::Str(s) => Ok(s),
        other => Err(shape("text reply", &other)),
    }
}

/// Decode a sleep-multiplier reply `(multiplier, status, message)`.
pub fn decode_multiplier(reply: Reply) -> Result<f64, Error> {
    match reply.strip_status_after(1)? {
        Reply::Float(f) => Ok(f),
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        Reply::Int(v) => Ok(v as f64),
        other => Err(shape("sleep multiplier reply", &other)),
    }
}

/// Decode a property map (`a{sv}`) into JSON values.
pub fn decode_properties(reply: Reply) -> Result<BTreeMap<String, serde_json::Value>, Error> {
    match reply.into_envelope() {
        Reply::Record(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::from(v)))
            .collect()),
        Reply::Unit => Ok(BTreeMap::new()),
        other => Err(shape("property map", &other)),
    }
}

// ── Displays ────────────────────────────────────────────────────────

/// Field names of the 9-field detect tuple reported by ddcutil-service.
const SERVICE_DISPLAY_FIELDS: [&str; 9] = [
    "display_number",
    "usb_bus",
    "usb_device",
    "manufacturer_id",
    "model_name",
    "serial_number",
    "product_code",
    "edid",
    "binary_serial_number",
];

/// Decode a detection or listing reply.
///
/// The display list is the first array in the reply body. Each item is a
/// record, the 9-field service tuple, or the compact
/// `(display_number, edid, model, mccs_version, attributes_json)` tuple.
pub fn decode_displays(reply: Reply) -> Result<Vec<DisplayRecord>, Error> {
    let body = reply.strip_status()?;
    let items = first_array(body)
        .ok_or_else(|| Error::ReplyShape("detection reply without a display list".into()))?;
    items.into_iter().map(display_from).collect()
}

fn first_array(body: Reply) -> Option<Vec<Reply>> {
    match body {
        Reply::List(items) => Some(items),
        Reply::Tuple(items) => items.into_iter().find_map(|item| match item {
            Reply::List(inner) => Some(inner),
            _ => None,
        }),
        Reply::Record(mut map) => map.remove("displays").and_then(first_array),
        Reply::Unit => Some(Vec::new()),
        _ => None,
    }
}

fn display_from(item: Reply) -> Result<DisplayRecord, Error> {
    match item {
        Reply::Record(mut map) => {
            // `ddcutil detect --json` nests fields under `display`.
            if let Some(Reply::Record(inner)) = map.remove("display") {
                map.extend(inner);
            }
            display_from_record(map)
        }
        Reply::Tuple(fields) if fields.len() == SERVICE_DISPLAY_FIELDS.len() => {
            let map = SERVICE_DISPLAY_FIELDS
                .iter()
                .map(|k| (*k).to_owned())
                .zip(fields)
                .collect();
            display_from_record(map)
        }
        Reply::Tuple(fields) if fields.len() == 5 => {
            let mut map = BTreeMap::new();
            let mut fields = fields.into_iter();
            for key in ["display_number", "edid", "model", "mccs_version"] {
                if let Some(v) = fields.next() {
                    map.insert(key.to_owned(), v);
                }
            }
            if let Some(Reply::Str(json)) = fields.next() {
                let extra: serde_json::Value =
                    serde_json::from_str(&json).map_err(|e| Error::Deserialization {
                        message: e.to_string(),
                        body: json.clone(),
                    })?;
                if let Reply::Record(extra) = Reply::from(extra) {
                    for (k, v) in extra {
                        map.entry(k).or_insert(v);
                    }
                }
            }
            display_from_record(map)
        }
        other => Err(shape("display entry", &other)),
    }
}

fn display_from_record(map: BTreeMap<String, Reply>) -> Result<DisplayRecord, Error> {
    let display_number = lookup(&map, &["display_number", "display", "displayNumber"])
        .and_then(Reply::as_int)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| Error::ReplyShape("display entry without a display number".into()))?;
    let manufacturer = lookup_string(&map, &["manufacturer", "mfg", "manufacturer_id"]);
    let model = lookup_string(&map, &["model", "model_name", "product_name"]);
    let serial = lookup_string(&map, &["serial", "serial_number", "sn"]);
    let bus = lookup_string(&map, &["bus", "i2c_bus"]);
    let address = lookup_string(&map, &["address"]);
    let edid = lookup_string(&map, &["edid", "edid_txt"]).unwrap_or_else(|| {
        synthetic_edid(
            display_number,
            model.as_deref(),
            serial.as_deref(),
            bus.as_deref(),
        )
    });

    Ok(DisplayRecord {
        display_number,
        edid,
        manufacturer,
        model,
        serial,
        bus,
        address,
        attributes: map
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::from(v)))
            .collect(),
    })
}

/// Build a stable identity for backends that do not report an EDID.
pub fn synthetic_edid(
    display_number: i32,
    model: Option<&str>,
    serial: Option<&str>,
    bus: Option<&str>,
) -> String {
    match (model, serial) {
        (Some(m), Some(s)) => format!("{m}:{s}"),
        _ => format!(
            "{}:bus{}:display{display_number}",
            model.unwrap_or("display"),
            bus.unwrap_or("?")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn s(v: &str) -> Reply {
        Reply::Str(v.into())
    }

    #[test]
    fn pair_decodes_to_current_and_maximum() {
        let reading = decode_reading(Reply::Tuple(vec![Reply::Int(42), Reply::Int(100)])).unwrap();
        assert_eq!(reading, Reading::new(42, Some(100)));
    }

    #[test]
    fn envelope_is_unwrapped_before_decoding() {
        let inner = Reply::Tuple(vec![Reply::Int(42), Reply::Int(100)]);
        let reading = decode_reading(Reply::Tuple(vec![inner])).unwrap();
        assert_eq!(reading, Reading::new(42, Some(100)));
    }

    #[test]
    fn service_get_vcp_layout_decodes() {
        let reply = Reply::Tuple(vec![
            Reply::Int(30),
            Reply::Int(80),
            s("30"),
            Reply::Int(0),
            s(""),
        ]);
        assert_eq!(decode_reading(reply).unwrap(), Reading::new(30, Some(80)));
    }

    #[test]
    fn text_after_the_pair_is_not_a_status() {
        let reply = Reply::Tuple(vec![Reply::Int(42), Reply::Int(100), s("x")]);
        assert_eq!(decode_reading(reply).unwrap(), Reading::new(42, Some(100)));

        let reply = Reply::Tuple(vec![Reply::Int(42), Reply::Int(100), s("42")]);
        assert_eq!(decode_reading(reply).unwrap(), Reading::new(42, Some(100)));
    }

    #[test]
    fn failed_read_with_bare_status_is_rejected() {
        let reply = Reply::Tuple(vec![Reply::Int(-3021), s("no DDC response")]);
        assert!(matches!(
            decode_reading(reply).unwrap_err(),
            Error::Remote { status: -3021, .. }
        ));
    }

    #[test]
    fn record_keys_are_recognized() {
        for (cur, max) in [("value", "maximum"), ("CurrentValue", "MaxValue"), ("current", "max")] {
            let map = BTreeMap::from([(cur.to_owned(), Reply::Int(7)), (max.to_owned(), Reply::Int(9))]);
            let reading = decode_reading(Reply::Record(map)).unwrap();
            assert_eq!(reading, Reading::new(7, Some(9)));
        }
    }

    #[test]
    fn bare_integer_has_no_maximum() {
        assert_eq!(decode_reading(Reply::Int(5)).unwrap(), Reading::new(5, None));
    }

    #[test]
    fn string_reply_is_a_shape_error() {
        let err = decode_reading(s("bright")).unwrap_err();
        assert!(matches!(err, Error::ReplyShape(_)));
    }

    #[test]
    fn nonzero_status_is_remote_rejection() {
        let reply = Reply::Tuple(vec![Reply::Int(-3020), s("DDC communication failed")]);
        match decode_ack(reply).unwrap_err() {
            Error::Remote { status, message } => {
                assert_eq!(status, -3020);
                assert_eq!(message, "DDC communication failed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_status_ack_is_ok() {
        decode_ack(Reply::Tuple(vec![Reply::Int(0), s("")])).unwrap();
    }

    #[test]
    fn capability_code_list_decodes() {
        let reply = Reply::List(vec![Reply::Int(0x10), Reply::Int(0x12)]);
        let codes: Vec<_> = decode_capabilities(reply).unwrap().iter().map(|f| f.code).collect();
        assert_eq!(codes, [0x10, 0x12]);
    }

    #[test]
    fn capabilities_metadata_layout_decodes() {
        let choices = Reply::Record(BTreeMap::from([
            ("15".to_owned(), s("DisplayPort-1")),
            ("17".to_owned(), s("HDMI-1")),
        ]));
        let features = Reply::Record(BTreeMap::from([
            ("16".to_owned(), Reply::Tuple(vec![s("Brightness"), s("Luminance"), Reply::Record(BTreeMap::new())])),
            ("96".to_owned(), Reply::Tuple(vec![s("Input Source"), s("Input"), choices])),
        ]));
        let reply = Reply::Tuple(vec![
            s("U2720Q"),
            Reply::Int(2),
            Reply::Int(1),
            Reply::Record(BTreeMap::new()),
            features,
            Reply::Int(0),
            s(""),
        ]);
        let caps = decode_capabilities(reply).unwrap();
        assert_eq!(caps.len(), 2);
        let input = caps.iter().find(|f| f.code == 0x60).unwrap();
        let meta = input.metadata.as_ref().unwrap();
        assert_eq!(meta.name.as_deref(), Some("Input Source"));
        assert_eq!(meta.choices.get(&0x11).map(String::as_str), Some("HDMI-1"));
    }

    #[test]
    fn service_metadata_layout_decodes() {
        let reply = Reply::Tuple(vec![
            s("Brightness"),
            s("Increase or decrease brightness"),
            Reply::Bool(false),
            Reply::Bool(false),
            Reply::Bool(true),
            Reply::Bool(false),
            Reply::Bool(true),
            Reply::Int(0),
            s(""),
        ]);
        let meta = decode_feature_metadata(reply).unwrap();
        assert_eq!(meta.name.as_deref(), Some("Brightness"));
        assert!(meta.continuous);
        assert!(!meta.read_only);
    }

    #[test]
    fn capabilities_string_and_multiplier_decode() {
        let caps = "(prot(monitor)vcp(10 12))";
        let reply = Reply::Tuple(vec![s(caps), Reply::Int(0), s("")]);
        assert_eq!(decode_text(reply).unwrap(), caps);

        let reply = Reply::Tuple(vec![Reply::Float(1.5), Reply::Int(0), s("OK")]);
        assert!((decode_multiplier(reply).unwrap() - 1.5).abs() < f64::EPSILON);

        let reply = Reply::Tuple(vec![Reply::Float(0.0), Reply::Int(-3005), s("Invalid display")]);
        assert!(matches!(decode_multiplier(reply), Err(Error::Remote { status: -3005, .. })));
    }

    #[test]
    fn property_map_lowers_to_json() {
        let map = BTreeMap::from([
            ("DdcutilVersion".to_owned(), s("2.1.4")),
            ("ServiceInfoLogging".to_owned(), Reply::Bool(false)),
        ]);
        let props = decode_properties(Reply::Tuple(vec![Reply::Record(map)])).unwrap();
        assert_eq!(props["DdcutilVersion"], serde_json::json!("2.1.4"));
        assert_eq!(props["ServiceInfoLogging"], serde_json::json!(false));
    }

    #[test]
    fn service_detect_tuple_decodes() {
        let display = Reply::Tuple(vec![
            Reply::Int(1),
            Reply::Int(-1),
            Reply::Int(-1),
            s("DEL"),
            s("DELL U2720Q"),
            s("ABC123"),
            Reply::Int(0xA0F5),
            s("00ffffffffffff00"),
            Reply::Int(0),
        ]);
        let reply = Reply::Tuple(vec![
            Reply::Int(1),
            Reply::List(vec![display]),
            Reply::Int(0),
            s(""),
        ]);
        let displays = decode_displays(reply).unwrap();
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].display_number, 1);
        assert_eq!(displays[0].edid, "00ffffffffffff00");
        assert_eq!(displays[0].model.as_deref(), Some("DELL U2720Q"));
        assert_eq!(displays[0].manufacturer.as_deref(), Some("DEL"));
    }

    #[test]
    fn compact_detect_tuple_merges_attribute_json() {
        let display = Reply::Tuple(vec![
            Reply::Int(2),
            s("edid-2"),
            s("Model B"),
            s("2.2"),
            s(r#"{"serial":"SN2","bus":"7"}"#),
        ]);
        let displays = decode_displays(Reply::List(vec![display])).unwrap();
        assert_eq!(displays[0].serial.as_deref(), Some("SN2"));
        assert_eq!(displays[0].bus.as_deref(), Some("7"));
        assert_eq!(displays[0].attributes["mccs_version"], serde_json::json!("2.2"));
    }

    #[test]
    fn bulk_readings_decode_from_service_tuples() {
        let reply = Reply::Tuple(vec![
            Reply::List(vec![
                Reply::Tuple(vec![Reply::Int(0x10), Reply::Int(50), Reply::Int(100), s("50")]),
                Reply::Tuple(vec![Reply::Int(0x12), Reply::Int(70), Reply::Int(100), s("70")]),
            ]),
            Reply::Int(0),
            s(""),
        ]);
        let readings = decode_readings(reply).unwrap();
        assert_eq!(readings[&0x12], Reading::new(70, Some(100)));
    }

    #[test]
    fn parse_int_accepts_hex_prefix() {
        assert_eq!(parse_int("0x60"), Some(0x60));
        assert_eq!(parse_int(" 16 "), Some(16));
        assert_eq!(parse_int("zz"), None);
    }
}
