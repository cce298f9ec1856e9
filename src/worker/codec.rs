//! The byte encoding shared by producers and consumers. Payloads and the task envelope are both
//! JSON, so a task sitting in the broker can be read by an operator.

use crate::worker::task::Task;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A value could not be serialized. Not expected for well-typed inputs, so callers generally
/// treat it as a bug rather than something to retry.
#[derive(Debug, Error)]
#[error("Unable to encode task payload: {0}")]
#[non_exhaustive]
pub struct EncodingError(#[from] pub serde_json::Error);

/// Bytes could not be deserialized into the expected type. Retrying can't fix this, so a task
/// that fails to decode is never redelivered.
#[derive(Debug, Error)]
#[error("Unable to decode task payload: {0}")]
#[non_exhaustive]
pub struct DecodingError(#[from] pub serde_json::Error);

pub fn encode<T>(value: &T) -> Result<Vec<u8>, EncodingError>
where
    T: Serialize + ?Sized,
{
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T>(bytes: &[u8]) -> Result<T, DecodingError>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_task(task: &Task) -> Result<Vec<u8>, EncodingError> {
    encode(task)
}

pub fn decode_task(bytes: &[u8]) -> Result<Task, DecodingError> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::EmailPayload;
    use insta::assert_snapshot;
    use rstest::rstest;
    use std::collections::BTreeMap;

    #[rstest]
    #[case(EmailPayload::new(vec!["a@x.com".to_owned()], "Welcome", "<p>Hi</p>"))]
    #[case(EmailPayload::new(
        vec!["a@x.com".to_owned(), "b@y.org".to_owned()],
        "",
        ""
    ))]
    #[case(EmailPayload::new(
        vec!["ünïcode@example.com".to_owned()],
        "Résumé \"quoted\"",
        "<p>Line 1</p>\n<p>Line 2 &amp; more</p>"
    ))]
    fn email_payload_round_trip(#[case] payload: EmailPayload) {
        let bytes = encode(&payload).unwrap();
        let decoded: EmailPayload = decode(&bytes).unwrap();

        assert_eq!(decoded, payload);
    }

    #[test]
    fn encoding_is_json() {
        let payload = EmailPayload::new(vec!["a@x.com".to_owned()], "Welcome", "<p>Hi</p>");

        let bytes = encode(&payload).unwrap();

        assert_snapshot!(
            String::from_utf8(bytes).unwrap(),
            @r#"{"addresses":["a@x.com"],"subject":"Welcome","body":"<p>Hi</p>"}"#
        );
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"{\"addresses\":[\"a@x.com\"],\"subject\":\"Welcome\"".as_slice())]
    #[case(b"{\"addresses\":[\"a@x.com\"],\"body\":\"\"}".as_slice())]
    #[case(b"\xff\xfe".as_slice())]
    fn decode_malformed(#[case] bytes: &[u8]) {
        let result: Result<EmailPayload, _> = decode(bytes);

        assert!(result.is_err());
    }

    #[test]
    fn task_envelope_round_trip() {
        let payload = EmailPayload::new(vec!["a@x.com".to_owned()], "Welcome", "<p>Hi</p>");
        let task = Task::new(crate::worker::task::task_types::EMAIL_DELIVER, &payload).unwrap();

        let decoded = decode_task(&encode_task(&task).unwrap()).unwrap();

        assert_eq!(decoded, task);
        assert_eq!(decoded.decode_payload::<EmailPayload>().unwrap(), payload);
    }

    #[test]
    fn encode_unserializable() {
        // JSON object keys must be strings.
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], "value");

        let err = encode(&map).unwrap_err();

        assert!(err.to_string().starts_with("Unable to encode task payload"));
    }
}
