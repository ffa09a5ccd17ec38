//! Job message codec.
//!
//! A [`Msg`] is decoded from (and re-encoded to) the JSON stored in Redis.
//! The JSON object is the single source of truth: every mutation goes
//! through the object and the whole record is re-encoded on output. The
//! text a message was decoded from is kept verbatim, because removing a
//! claimed message from an in-progress list matches on that exact text.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{MsgError, MsgResult};

static NULL: Value = Value::Null;

/// A job message.
#[derive(Debug, Clone, PartialEq)]
pub struct Msg {
    fields: Map<String, Value>,
    original: String,
}

impl Msg {
    /// Decode a message from its stored JSON.
    pub fn parse(json: &str) -> MsgResult<Self> {
        let value: Value = serde_json::from_str(json).map_err(MsgError::Decode)?;
        let Value::Object(fields) = value else {
            return Err(MsgError::NotAnObject);
        };

        Ok(Self {
            fields,
            original: json.to_string(),
        })
    }

    /// Build a message from a JSON object, treating its encoding as the original.
    pub fn from_value(value: Value) -> MsgResult<Self> {
        let Value::Object(fields) = value else {
            return Err(MsgError::NotAnObject);
        };
        let original = Value::Object(fields.clone()).to_string();
        Ok(Self { fields, original })
    }

    /// The exact text this message was decoded from.
    pub fn original_json(&self) -> &str {
        &self.original
    }

    /// Encode the current field set.
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.as_map().contains_key(field)
    }

    pub fn get(&self, field: &str) -> MsgResult<&Value> {
        self.as_map()
            .get(field)
            .ok_or_else(|| MsgError::missing(field))
    }

    pub fn get_str(&self, field: &str) -> MsgResult<&str> {
        self.get(field)?
            .as_str()
            .ok_or_else(|| MsgError::field_type(field, "string"))
    }

    /// Integers stored as whole floats (`3.0`) are accepted.
    pub fn get_i64(&self, field: &str) -> MsgResult<i64> {
        let value = self.get(field)?;
        if let Some(n) = value.as_i64() {
            return Ok(n);
        }
        match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
            _ => Err(MsgError::field_type(field, "integer")),
        }
    }

    pub fn get_f64(&self, field: &str) -> MsgResult<f64> {
        self.get(field)?
            .as_f64()
            .ok_or_else(|| MsgError::field_type(field, "number"))
    }

    pub fn get_bool(&self, field: &str) -> MsgResult<bool> {
        self.get(field)?
            .as_bool()
            .ok_or_else(|| MsgError::field_type(field, "boolean"))
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn jid(&self) -> Option<&str> {
        self.get_str("jid").ok()
    }

    pub fn class(&self) -> Option<&str> {
        self.get_str("class").ok()
    }

    pub fn queue(&self) -> Option<&str> {
        self.get_str("queue").ok()
    }

    /// Job arguments; `null` when the message carries none.
    pub fn args(&self) -> &Value {
        self.as_map().get("args").unwrap_or(&NULL)
    }

    pub fn enqueued_at(&self) -> Option<f64> {
        self.get_f64("enqueued_at").ok()
    }
}

impl Serialize for Msg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Backoff parameters carried by a message under `retry_options`.
///
/// Fields missing on the wire take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Exponent applied to the retry count
    pub exp: u32,
    /// Seconds added to every delay
    pub min_delay: u64,
    /// Upper bound on the delay in seconds; 0 disables the bound
    pub max_delay: u64,
    /// Upper bound of the uniform random jitter in seconds
    pub max_rand: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            exp: 4,
            min_delay: 15,
            max_delay: 0,
            max_rand: 30,
        }
    }
}

/// Producer-side options for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnqueueOptions {
    #[serde(skip_serializing_if = "is_zero")]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "is_false")]
    pub retry: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub retry_max: u32,
    /// Due time in seconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_options: Option<RetryOptions>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_max(mut self, retry_max: u32) -> Self {
        self.retry_max = retry_max;
        self
    }

    pub fn with_retry_options(mut self, retry_options: RetryOptions) -> Self {
        self.retry_options = Some(retry_options);
        self
    }

    pub fn with_at(mut self, at: f64) -> Self {
        self.at = Some(at);
        self
    }
}

/// The record written by the enqueue path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueueData {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub queue: String,
    pub class: String,
    pub args: Value,
    pub jid: String,
    pub enqueued_at: f64,
    #[serde(flatten)]
    pub options: EnqueueOptions,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A fresh job id: 12 random bytes as 24 lowercase hex characters.
pub fn generate_jid() -> String {
    let bytes: [u8; 12] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_message() {
        let msg = Msg::parse(r#"{"jid":"2","args":["foo","bar"]}"#).unwrap();

        assert_eq!(msg.jid(), Some("2"));
        assert_eq!(msg.args(), &json!(["foo", "bar"]));
        assert_eq!(msg.class(), None);
        assert!(!msg.contains("retry"));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(matches!(Msg::parse("{\"jid\":"), Err(MsgError::Decode(_))));
        assert!(matches!(Msg::parse("[1,2]"), Err(MsgError::NotAnObject)));
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(matches!(Msg::from_value(json!([1])), Err(MsgError::NotAnObject)));

        let msg = Msg::from_value(json!({"jid": "1", "args": []})).unwrap();
        assert_eq!(msg.jid(), Some("1"));
        assert_eq!(Msg::parse(msg.original_json()).unwrap(), msg);
    }

    #[test]
    fn test_typed_getters() {
        let json = r#"{"retry":5,"at":1.5,"retry_count":3.0,"queue":"default"}"#;
        let msg = Msg::parse(json).unwrap();

        assert_eq!(msg.get_i64("retry").unwrap(), 5);
        assert_eq!(msg.get_i64("retry_count").unwrap(), 3);
        assert_eq!(msg.get_f64("at").unwrap(), 1.5);
        assert!(matches!(
            msg.get_bool("retry"),
            Err(MsgError::FieldType { expected: "boolean", .. })
        ));
        assert!(matches!(
            msg.get_str("retry"),
            Err(MsgError::FieldType { .. })
        ));
        assert!(matches!(
            msg.get_i64("missing"),
            Err(MsgError::MissingField(_))
        ));
    }

    #[test]
    fn test_set_reencodes_whole_record_and_keeps_original() {
        let raw = r#"{"queue":"default","foo":"bar"}"#;
        let mut msg = Msg::parse(raw).unwrap();

        msg.set("enqueued_at", 12.5);

        assert_eq!(msg.original_json(), raw);
        let reparsed = Msg::parse(&msg.to_json()).unwrap();
        assert_eq!(reparsed.get_f64("enqueued_at").unwrap(), 12.5);
        assert_eq!(reparsed.get_str("foo").unwrap(), "bar");
    }

    #[test]
    fn test_enqueue_data_omits_empty_options() {
        let data = EnqueueData {
            queue: "mail".to_string(),
            class: "Send".to_string(),
            args: json!([1, 2]),
            jid: "abc".to_string(),
            enqueued_at: 10.0,
            options: EnqueueOptions::default(),
        };

        let value = serde_json::to_value(&data).unwrap();
        let map = value.as_object().unwrap();

        assert_eq!(map.len(), 5);
        assert!(!map.contains_key("retry"));
        assert!(!map.contains_key("retry_options"));
    }

    #[test]
    fn test_enqueue_data_serializes_all_retry_options() {
        let data = EnqueueData {
            queue: String::new(),
            class: "Compare".to_string(),
            args: json!(["foo", "bar"]),
            jid: "abc".to_string(),
            enqueued_at: 10.0,
            options: EnqueueOptions::new()
                .with_retry(true)
                .with_retry_max(13)
                .with_retry_options(RetryOptions {
                    exp: 2,
                    min_delay: 0,
                    max_delay: 60,
                    max_rand: 30,
                }),
        };

        let value = serde_json::to_value(&data).unwrap();

        assert!(value.get("queue").is_none());
        assert_eq!(value["retry"], json!(true));
        assert_eq!(value["retry_max"], json!(13));
        assert_eq!(
            value["retry_options"],
            json!({"exp": 2, "min_delay": 0, "max_delay": 60, "max_rand": 30})
        );
    }

    #[test]
    fn test_retry_options_fill_missing_fields_with_defaults() {
        let options: RetryOptions =
            serde_json::from_value(json!({"exp": 2, "min_delay": 1200})).unwrap();

        assert_eq!(options.exp, 2);
        assert_eq!(options.min_delay, 1200);
        assert_eq!(options.max_delay, 0);
        assert_eq!(options.max_rand, RetryOptions::default().max_rand);
    }

    #[test]
    fn test_generate_jid() {
        let jid = generate_jid();

        assert_eq!(jid.len(), 24);
        assert!(jid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(jid, generate_jid());
    }
}
