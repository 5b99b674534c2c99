//! Request identifiers: a `req_`-prefixed, time-sortable UUIDv7 wrapper
//! plus the `tower_http` request-id layer integration.

use std::fmt;
use std::str::FromStr;

use http::Request;
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};
use uuid::Uuid;

/// A time-sortable request identifier, formatted `req_<uuidv7>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub const PREFIX: &'static str = "req";

    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn to_string_id(&self) -> String {
        format!("{}_{}", Self::PREFIX, self.0)
    }

    #[must_use]
    pub fn prefix(&self) -> &'static str {
        Self::PREFIX
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for RequestId {
    type Err = RequestIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, suffix) = s.split_once('_').ok_or(RequestIdError::MissingPrefix)?;
        if prefix != Self::PREFIX {
            return Err(RequestIdError::InvalidPrefix { expected: Self::PREFIX.to_string(), actual: prefix.to_string() });
        }
        let uuid = Uuid::from_str(suffix).map_err(RequestIdError::Parse)?;
        Ok(Self(uuid))
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.to_string_id()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestIdError {
    #[error("request id missing a '<prefix>_' separator")]
    MissingPrefix,

    #[error("invalid prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix { expected: String, actual: String },

    #[error("failed to parse request id suffix as a uuid: {0}")]
    Parse(uuid::Error),
}

/// A [`MakeRequestId`] that generates time-sortable [`RequestId`]s for
/// `tower_http::request_id::SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let id = RequestId::new();
        let header_value = http::HeaderValue::from_str(&id.to_string_id()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_start_with_the_req_prefix() {
        let id = RequestId::new();
        assert!(id.to_string_id().starts_with("req_"));
        assert_eq!(id.prefix(), "req");
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = RequestId::new();
        let parsed = RequestId::from_str(&id.to_string_id()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_a_mismatched_prefix() {
        let id = RequestId::new();
        let wrong = format!("user_{}", &id.to_string_id()["req_".len()..]);
        let result = RequestId::from_str(&wrong);
        match result {
            Err(RequestIdError::InvalidPrefix { expected, actual }) => {
                assert_eq!(expected, "req");
                assert_eq!(actual, "user");
            }
            _ => panic!("expected InvalidPrefix"),
        }
    }

    #[test]
    fn rejects_an_invalid_uuid_suffix() {
        assert!(RequestId::from_str("req_not-a-uuid").is_err());
    }

    #[test]
    fn ids_are_time_ordered() {
        let id1 = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let id2 = RequestId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn make_typed_request_id_sets_a_req_prefixed_header() {
        let mut maker = MakeTypedRequestId;
        let request = http::Request::builder().body(()).unwrap();
        let id = maker.make_request_id(&request).unwrap();
        let header_value = id.into_header_value();
        assert!(header_value.to_str().unwrap().starts_with("req_"));
    }
}
