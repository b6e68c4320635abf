//! Tagged encoding of BSON values into archive JSON and back.
//!
//! Native identifiers are written as `{"$oid": "<24 hex>"}` so their type
//! survives a plain-text round trip. Decoding only converts tagged values:
//! a bare 24-hex string is a string, whatever field it lives in.
//!
//! | BSON              | Archive JSON                                   |
//! |-------------------|------------------------------------------------|
//! | ObjectId          | `{"$oid": "..."}`                              |
//! | Int32             | integer                                        |
//! | Int64             | `{"$numberLong": "..."}`                       |
//! | Double (finite)   | float, always with a fractional part           |
//! | Double (NaN, ±∞)  | `{"$numberDouble": "NaN"}`                     |
//! | DateTime          | `{"$date": {"$numberLong": "<millis>"}}`       |
//! | anything else     | relaxed Extended JSON from the bson crate      |

use crate::utils::errors::{BackupError, Result};
use mongodb::bson::{oid::ObjectId, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

pub const OID_TAG: &str = "$oid";
const NUMBER_LONG_TAG: &str = "$numberLong";
const NUMBER_DOUBLE_TAG: &str = "$numberDouble";
const DATE_TAG: &str = "$date";

/// Which `ObjectId` values receive the `$oid` tag on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaggingPolicy {
    /// Every `ObjectId`, wherever it occurs.
    #[default]
    All,
    /// Only `ObjectId`s whose nearest enclosing field passes
    /// [`is_identifier_field`]; the rest are flattened to hex strings and
    /// come back as strings on restore.
    IdFields,
}

impl TaggingPolicy {
    /// True when some `ObjectId`s will not survive a round trip.
    pub fn is_lossy(self) -> bool {
        self == TaggingPolicy::IdFields
    }
}

/// Field-name heuristic for identifier-bearing fields: `_id`, or any name
/// ending in `Id` (`userId`, `listingId`, ...). Case-sensitive, so `paid`
/// and `ID` do not qualify.
pub fn is_identifier_field(key: &str) -> bool {
    key == "_id" || key.ends_with("Id")
}

/// True for `{"$oid": "<24 hex>"}` exactly.
pub fn is_tagged_oid(value: &Value) -> bool {
    match value {
        Value::Object(map) if map.len() == 1 => map
            .get(OID_TAG)
            .and_then(Value::as_str)
            .is_some_and(is_hex_oid),
        _ => false,
    }
}

/// True for a 24-character hexadecimal string.
pub fn is_hex_oid(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn encode_document(doc: &Document, policy: TaggingPolicy) -> Value {
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc {
        map.insert(key.clone(), encode_field(key, value, policy));
    }
    Value::Object(map)
}

fn encode_field(key: &str, value: &Bson, policy: TaggingPolicy) -> Value {
    match value {
        Bson::ObjectId(oid) => match policy {
            TaggingPolicy::All => tag_oid(oid),
            TaggingPolicy::IdFields if is_identifier_field(key) => tag_oid(oid),
            TaggingPolicy::IdFields => Value::String(oid.to_hex()),
        },
        // Array elements inherit the field name for the IdFields heuristic.
        Bson::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| encode_field(key, item, policy))
                .collect(),
        ),
        Bson::Document(doc) => encode_document(doc, policy),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Null => Value::Null,
        Bson::Int32(n) => Value::from(*n),
        Bson::Int64(n) => json!({ NUMBER_LONG_TAG: n.to_string() }),
        Bson::Double(f) => encode_double(*f),
        Bson::DateTime(dt) => json!({ DATE_TAG: { NUMBER_LONG_TAG: dt.timestamp_millis().to_string() } }),
        other => other.clone().into_relaxed_extjson(),
    }
}

fn tag_oid(oid: &ObjectId) -> Value {
    json!({ OID_TAG: oid.to_hex() })
}

fn encode_double(f: f64) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None => {
            let repr = if f.is_nan() {
                "NaN"
            } else if f.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            };
            json!({ NUMBER_DOUBLE_TAG: repr })
        }
    }
}

pub fn decode_document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => decode_fields(map),
        other => Err(BackupError::CorruptArchive(format!(
            "expected a document, found {}",
            json_kind(&other)
        ))),
    }
}

pub fn decode_value(value: Value) -> Result<Bson> {
    match value {
        Value::Null => Ok(Bson::Null),
        Value::Bool(b) => Ok(Bson::Boolean(b)),
        Value::String(s) => Ok(Bson::String(s)),
        Value::Number(n) => Ok(decode_number(&n)),
        Value::Array(items) => items
            .into_iter()
            .map(decode_value)
            .collect::<Result<Vec<_>>>()
            .map(Bson::Array),
        Value::Object(map) => decode_object(map),
    }
}

fn decode_fields(map: Map<String, Value>) -> Result<Document> {
    let mut doc = Document::new();
    for (key, value) in map {
        let decoded = decode_value(value)?;
        doc.insert(key, decoded);
    }
    Ok(doc)
}

fn decode_number(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        }
    } else {
        // u64 beyond i64::MAX or a float
        Bson::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn decode_object(map: Map<String, Value>) -> Result<Bson> {
    let is_wrapper = !map.is_empty() && map.keys().all(|k| k.starts_with('$'));
    if !is_wrapper {
        return decode_fields(map).map(Bson::Document);
    }

    if map.len() == 1 {
        if let Some(value) = map.get(OID_TAG) {
            return decode_oid(value);
        }
        if let Some(value) = map.get(NUMBER_LONG_TAG) {
            return decode_long(value).map(Bson::Int64);
        }
        if let Some(value) = map.get(NUMBER_DOUBLE_TAG) {
            return decode_special_double(value);
        }
        if let Some(value) = map.get(DATE_TAG) {
            return decode_date(value);
        }
    }

    Bson::try_from(Value::Object(map))
        .map_err(|e| BackupError::CorruptArchive(format!("invalid extended JSON value: {e}")))
}

fn decode_oid(value: &Value) -> Result<Bson> {
    let hex = value.as_str().ok_or_else(|| {
        BackupError::CorruptArchive(format!("{OID_TAG} must be a string, found {}", json_kind(value)))
    })?;
    ObjectId::parse_str(hex)
        .map(Bson::ObjectId)
        .map_err(|e| BackupError::CorruptArchive(format!("invalid object id '{hex}': {e}")))
}

fn decode_long(value: &Value) -> Result<i64> {
    match value {
        Value::String(s) => s
            .parse()
            .map_err(|_| BackupError::CorruptArchive(format!("invalid {NUMBER_LONG_TAG} '{s}'"))),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| BackupError::CorruptArchive(format!("invalid {NUMBER_LONG_TAG} {n}"))),
        other => Err(BackupError::CorruptArchive(format!(
            "{NUMBER_LONG_TAG} must be a string, found {}",
            json_kind(other)
        ))),
    }
}

fn decode_special_double(value: &Value) -> Result<Bson> {
    let repr = value.as_str().ok_or_else(|| {
        BackupError::CorruptArchive(format!("{NUMBER_DOUBLE_TAG} must be a string"))
    })?;
    let f = match repr {
        "NaN" => f64::NAN,
        "Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        other => other.parse().map_err(|_| {
            BackupError::CorruptArchive(format!("invalid {NUMBER_DOUBLE_TAG} '{other}'"))
        })?,
    };
    Ok(Bson::Double(f))
}

fn decode_date(value: &Value) -> Result<Bson> {
    let dt = match value {
        Value::Object(inner) => {
            let millis = inner.get(NUMBER_LONG_TAG).ok_or_else(|| {
                BackupError::CorruptArchive(format!("{DATE_TAG} object without {NUMBER_LONG_TAG}"))
            })?;
            DateTime::from_millis(decode_long(millis)?)
        }
        Value::String(s) => DateTime::parse_rfc3339_str(s)
            .map_err(|e| BackupError::CorruptArchive(format!("invalid {DATE_TAG} '{s}': {e}")))?,
        Value::Number(n) => DateTime::from_millis(
            n.as_i64()
                .ok_or_else(|| BackupError::CorruptArchive(format!("invalid {DATE_TAG} {n}")))?,
        ),
        other => {
            return Err(BackupError::CorruptArchive(format!(
                "invalid {DATE_TAG} value of type {}",
                json_kind(other)
            )))
        }
    };
    Ok(Bson::DateTime(dt))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, spec::BinarySubtype, Binary};

    fn round_trip(doc: &Document, policy: TaggingPolicy) -> Document {
        let encoded = encode_document(doc, policy);
        // go through text, as the archive does
        let text = serde_json::to_string(&encoded).unwrap();
        decode_document(serde_json::from_str(&text).unwrap()).unwrap()
    }

    #[test]
    fn test_identifier_field_heuristic() {
        assert!(is_identifier_field("_id"));
        assert!(is_identifier_field("userId"));
        assert!(is_identifier_field("listingId"));
        assert!(!is_identifier_field("id"));
        assert!(!is_identifier_field("paid"));
        assert!(!is_identifier_field("userID"));
        assert!(!is_identifier_field("memberIds"));
    }

    #[test]
    fn test_object_ids_round_trip_at_any_depth() {
        let user = ObjectId::new();
        let listing = ObjectId::new();
        let reviewer = ObjectId::new();
        let original = doc! {
            "_id": ObjectId::new(),
            "userId": user,
            "owner": user,
            "reviews": [
                { "_id": ObjectId::new(), "reviewerId": reviewer, "rating": 5 },
                { "_id": ObjectId::new(), "reviewerId": reviewer, "rating": 3 },
            ],
            "meta": { "source": { "listingId": listing } },
            "relatedIds": [listing, user],
        };

        let decoded = round_trip(&original, TaggingPolicy::All);

        assert_eq!(decoded, original);
        assert_eq!(decoded.get_object_id("userId").unwrap(), user);
        assert_eq!(decoded.get_object_id("owner").unwrap(), user);
        let nested = decoded
            .get_document("meta")
            .and_then(|m| m.get_document("source"))
            .and_then(|s| s.get_object_id("listingId"))
            .unwrap();
        assert_eq!(nested, listing);
        let reviews = decoded.get_array("reviews").unwrap();
        assert!(matches!(
            reviews[0].as_document().unwrap().get("reviewerId"),
            Some(Bson::ObjectId(id)) if *id == reviewer
        ));
    }

    #[test]
    fn test_hex_strings_are_never_promoted() {
        let hex = "507f1f77bcf86cd799439011";
        let original = doc! {
            "_id": ObjectId::new(),
            "sku": hex,
            "externalId": hex,
            "tags": [hex],
        };

        let decoded = round_trip(&original, TaggingPolicy::All);

        assert_eq!(decoded.get_str("sku").unwrap(), hex);
        assert_eq!(decoded.get_str("externalId").unwrap(), hex);
        assert_eq!(decoded.get_array("tags").unwrap()[0], Bson::String(hex.into()));
    }

    #[test]
    fn test_plain_string_decodes_as_string() {
        let value = json!({ "_id": "507f1f77bcf86cd799439011", "userId": "507f1f77bcf86cd799439012" });
        let decoded = decode_document(value).unwrap();
        assert!(matches!(decoded.get("_id"), Some(Bson::String(_))));
        assert!(matches!(decoded.get("userId"), Some(Bson::String(_))));
    }

    #[test]
    fn test_id_fields_policy_flattens_other_object_ids() {
        let user = ObjectId::new();
        let original = doc! {
            "_id": ObjectId::new(),
            "userId": user,
            "favouriteIds": [user],
            "owner": user,
            "nested": { "sellerId": user },
        };

        let encoded = encode_document(&original, TaggingPolicy::IdFields);
        assert!(is_tagged_oid(&encoded["_id"]));
        assert!(is_tagged_oid(&encoded["userId"]));
        assert!(is_tagged_oid(&encoded["nested"]["sellerId"]));
        assert_eq!(encoded["owner"], json!(user.to_hex()));
        assert_eq!(encoded["favouriteIds"][0], json!(user.to_hex()));

        let decoded = decode_document(encoded).unwrap();
        assert_eq!(decoded.get_object_id("userId").unwrap(), user);
        assert_eq!(decoded.get_str("owner").unwrap(), user.to_hex());
    }

    #[test]
    fn test_numeric_types_are_preserved() {
        let original = doc! {
            "total": 42,
            "views": 9_000_000_000i64,
            "smallLong": 7i64,
            "price": 42.0,
            "rating": 4.5,
            "negative": -3,
        };

        let decoded = round_trip(&original, TaggingPolicy::All);

        assert_eq!(decoded.get("total"), Some(&Bson::Int32(42)));
        assert_eq!(decoded.get("views"), Some(&Bson::Int64(9_000_000_000)));
        assert_eq!(decoded.get("smallLong"), Some(&Bson::Int64(7)));
        assert_eq!(decoded.get("price"), Some(&Bson::Double(42.0)));
        assert_eq!(decoded.get("rating"), Some(&Bson::Double(4.5)));
        assert_eq!(decoded.get("negative"), Some(&Bson::Int32(-3)));
    }

    #[test]
    fn test_non_finite_doubles() {
        let original = doc! { "nan": f64::NAN, "inf": f64::INFINITY, "ninf": f64::NEG_INFINITY };
        let decoded = round_trip(&original, TaggingPolicy::All);
        assert!(decoded.get_f64("nan").unwrap().is_nan());
        assert_eq!(decoded.get_f64("inf").unwrap(), f64::INFINITY);
        assert_eq!(decoded.get_f64("ninf").unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_dates_and_other_bson_types() {
        let original = doc! {
            "createdAt": DateTime::from_millis(1_700_000_000_123),
            "active": true,
            "deletedAt": Bson::Null,
            "thumbnail": Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2, 3] },
        };

        let decoded = round_trip(&original, TaggingPolicy::All);

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_iso_dates_are_accepted() {
        let decoded = decode_value(json!({ "$date": "2024-03-01T10:00:00Z" })).unwrap();
        assert!(matches!(decoded, Bson::DateTime(_)));
    }

    #[test]
    fn test_invalid_oid_is_corrupt() {
        let err = decode_value(json!({ "$oid": "not-an-object-id" })).unwrap_err();
        assert!(matches!(err, BackupError::CorruptArchive(_)));

        let err = decode_value(json!({ "$oid": 12 })).unwrap_err();
        assert!(matches!(err, BackupError::CorruptArchive(_)));
    }

    #[test]
    fn test_tag_detection() {
        assert!(is_tagged_oid(&json!({ "$oid": "507f1f77bcf86cd799439011" })));
        assert!(!is_tagged_oid(&json!("507f1f77bcf86cd799439011")));
        assert!(!is_tagged_oid(&json!({ "$oid": "xyz" })));
        assert!(!is_tagged_oid(&json!({ "$oid": "507f1f77bcf86cd799439011", "x": 1 })));
        assert!(is_hex_oid("507F1F77BCF86CD799439011"));
        assert!(!is_hex_oid("507f1f77bcf86cd79943901"));
    }
}
