use std::convert::Infallible;

use axum::{
    async_trait,
    body::{Body, to_bytes},
    extract::{FromRequestParts, Request, State},
    http::{
        HeaderMap, Uri,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        uri::PathAndQuery,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{error::AppError, routes::AppState};

/// The request body as a JSON object, already stripped of operator keys.
///
/// Requests without a JSON object body carry an empty payload.
#[derive(Debug, Clone, Default)]
pub struct Payload(pub Map<String, Value>);

#[async_trait]
impl<S> FromRequestParts<S> for Payload
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.remove::<Payload>().unwrap_or_default())
    }
}

/// Caps, parses and sanitizes the request before any handler sees it.
///
/// Every oversized body is answered here with the JSON 413, whether the
/// client announced its length or streamed it.
pub async fn parse_and_sanitize(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let is_operator = |key: &str| state.store.is_operator_key(key);

    if declared_length(&parts.headers).is_some_and(|length| length > state.body_limit) {
        return AppError::PayloadTooLarge.into_response();
    }

    if let Some(query) = parts.uri.query() {
        let (kept, removed) = sanitize_query(query, &is_operator);
        if !removed.is_empty() {
            warn!(?removed, "stripped operator keys from query string");
            parts.uri = with_query(&parts.uri, &kept);
        }
    }

    if !is_json(&parts.headers) {
        return next.run(Request::from_parts(parts, body)).await;
    }

    // Reading past the limit is the only failure left once the length check passed.
    let bytes = match to_bytes(body, state.body_limit).await {
        Ok(bytes) => bytes,
        Err(_) => return AppError::PayloadTooLarge.into_response(),
    };

    let mut payload = match parse_payload(&bytes) {
        Ok(payload) => payload,
        Err(err) => return err.into_response(),
    };

    let mut removed = Vec::new();
    for value in payload.values_mut() {
        strip_operator_keys(value, &is_operator, &mut removed);
    }
    payload.retain(|key, _| {
        let keep = !is_operator(key);
        if !keep {
            removed.push(key.clone());
        }
        keep
    });
    if !removed.is_empty() {
        warn!(?removed, "stripped operator keys from request body");
    }

    parts.extensions.insert(Payload(payload));
    next.run(Request::from_parts(parts, Body::empty())).await
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json"
                || (mime.starts_with("application/") && mime.ends_with("+json"))
        })
        .unwrap_or(false)
}

fn parse_payload(bytes: &[u8]) -> Result<Map<String, Value>, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Ok(Map::new()),
        Err(_) => Err(AppError::MalformedBody),
    }
}

/// Removes operator keys at every depth, including objects nested in arrays.
pub fn strip_operator_keys<F>(value: &mut Value, is_operator: &F, removed: &mut Vec<String>)
where
    F: Fn(&str) -> bool,
{
    match value {
        Value::Object(map) => {
            map.retain(|key, _| {
                let keep = !is_operator(key);
                if !keep {
                    removed.push(key.clone());
                }
                keep
            });
            for nested in map.values_mut() {
                strip_operator_keys(nested, is_operator, removed);
            }
        }
        Value::Array(values) => {
            for nested in values {
                strip_operator_keys(nested, is_operator, removed);
            }
        }
        _ => {}
    }
}

/// Splits `query` into the pairs worth keeping and the keys that were dropped.
///
/// Bracketed keys such as `filter[$gt]` are checked segment by segment.
pub fn sanitize_query<F>(query: &str, is_operator: &F) -> (String, Vec<String>)
where
    F: Fn(&str) -> bool,
{
    let mut kept = Vec::new();
    let mut removed = Vec::new();

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let raw_key = pair.split('=').next().unwrap_or_default();
        let key = decode_operator_chars(raw_key);
        let hit = key
            .split(['[', ']'])
            .filter(|segment| !segment.is_empty())
            .any(is_operator);
        if hit {
            removed.push(key);
        } else {
            kept.push(pair);
        }
    }

    (kept.join("&"), removed)
}

fn decode_operator_chars(raw: &str) -> String {
    raw.replace("%24", "$")
        .replace("%2E", ".")
        .replace("%2e", ".")
        .replace("%5B", "[")
        .replace("%5b", "[")
        .replace("%5D", "]")
        .replace("%5d", "]")
}

fn with_query(uri: &Uri, query: &str) -> Uri {
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{query}", uri.path())
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = PathAndQuery::try_from(path_and_query).ok();
    Uri::from_parts(parts).unwrap_or_else(|_| Uri::from_static("/"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn dollar_or_dot(key: &str) -> bool {
        key.starts_with('$') || key.contains('.')
    }

    #[test]
    fn strips_nested_operator_keys() {
        let mut value = json!({
            "name": "lamp",
            "filter": { "$gt": "", "ok": 1 },
            "tags": [{ "$where": "sleep(1000)", "label": "x" }],
            "profile.email": "a@b.c"
        });
        let mut removed = Vec::new();
        strip_operator_keys(&mut value, &dollar_or_dot, &mut removed);

        assert_eq!(
            value,
            json!({
                "name": "lamp",
                "filter": { "ok": 1 },
                "tags": [{ "label": "x" }]
            })
        );
        assert_eq!(removed.len(), 3);
    }

    #[test]
    fn drops_operator_query_pairs() {
        let (kept, removed) = sanitize_query(
            "name=lamp&price[$gt]=1&%24where=1&a.b=2&limit=5",
            &dollar_or_dot,
        );
        assert_eq!(kept, "name=lamp&limit=5");
        assert_eq!(removed, ["price[$gt]", "$where", "a.b"]);
    }

    #[test]
    fn rebuilds_uri_without_query() {
        let uri: Uri = "/api/items?$gt=1".parse().unwrap();
        assert_eq!(with_query(&uri, ""), "/api/items");

        let uri: Uri = "/api/items?$gt=1&x=2".parse().unwrap();
        assert_eq!(with_query(&uri, "x=2"), "/api/items?x=2");
    }

    #[test]
    fn payload_parsing() {
        assert!(parse_payload(b"").unwrap().is_empty());
        assert!(parse_payload(b"[1, 2]").unwrap().is_empty());
        assert_eq!(parse_payload(br#"{"name":"A"}"#).unwrap()["name"], "A");
        assert!(matches!(
            parse_payload(b"{not json"),
            Err(AppError::MalformedBody)
        ));
    }

    #[test]
    fn json_content_types() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));

        headers.insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers));

        headers.insert(CONTENT_TYPE, "application/merge-patch+json".parse().unwrap());
        assert!(is_json(&headers));

        headers.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json(&headers));
    }

    #[test]
    fn reads_declared_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);

        headers.insert(CONTENT_LENGTH, "2048".parse().unwrap());
        assert_eq!(declared_length(&headers), Some(2048));

        headers.insert(CONTENT_LENGTH, "lots".parse().unwrap());
        assert_eq!(declared_length(&headers), None);
    }
}
