// Outbound request descriptors and decoded responses

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::fmt;
use std::str::FromStr;

use crate::error::{ClientError, Result};

/// Request body
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// Raw bytes with an explicit content type (file uploads)
    Bytes { content_type: String, data: Bytes },
}

/// How the response body is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Blob,
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ResponseType::Json),
            "text" => Ok(ResponseType::Text),
            "blob" => Ok(ResponseType::Blob),
            other => Err(format!(
                "unknown response type '{}' (expected json, text or blob)",
                other
            )),
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseType::Json => "json",
            ResponseType::Text => "text",
            ResponseType::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// One logical outbound call
///
/// Never mutated after creation. The bearer token is supplied at build time,
/// so a retry reuses the same descriptor with a different token.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub endpoint: String,
    pub method: Method,
    pub body: Payload,
    pub response_type: ResponseType,
}

impl RequestDescriptor {
    pub fn new(
        endpoint: impl Into<String>,
        method: Method,
        body: Payload,
        response_type: ResponseType,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body,
            response_type,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, Method::GET, Payload::Empty, ResponseType::Json)
    }

    pub fn post_json(endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(endpoint, Method::POST, Payload::Json(body), ResponseType::Json)
    }

    /// Build a transport request against `base_url`, attaching `token` as the
    /// bearer credential when present
    pub fn build(
        &self,
        client: &Client,
        base_url: &str,
        token: Option<&str>,
    ) -> Result<RequestBuilder> {
        let url = join_url(base_url, &self.endpoint)?;
        let mut builder = client.request(self.method.clone(), url);

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ClientError::InvalidRequest(format!("Invalid access token: {}", e)))?;
            value.set_sensitive(true);
            builder = builder.header(AUTHORIZATION, value);
        }

        builder = match &self.body {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(value),
            Payload::Form(fields) => builder.form(fields),
            Payload::Bytes { content_type, data } => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
        };

        Ok(builder)
    }
}

/// Join a relative endpoint onto the base address with exactly one slash
pub fn join_url(base_url: &str, endpoint: &str) -> Result<String> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Err(ClientError::InvalidRequest(format!(
            "Endpoint must be relative to the base URL: {}",
            endpoint
        )));
    }

    let base = base_url.trim_end_matches('/');
    let path = endpoint.trim_start_matches('/');
    if path.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{}/{}", base, path))
    }
}

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Json(serde_json::Value),
    Text(String),
    Blob(Bytes),
}

impl ResponseData {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseData::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Successful response as returned by the transport
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub data: ResponseData,
}

impl ApiResponse {
    /// Read and decode a success response according to `response_type`
    pub(crate) async fn decode(
        response: reqwest::Response,
        response_type: ResponseType,
    ) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();

        let data = match response_type {
            ResponseType::Blob => ResponseData::Blob(response.bytes().await?),
            ResponseType::Text => ResponseData::Text(response.text().await?),
            ResponseType::Json => {
                let body = response.bytes().await?;
                if body.iter().all(|b| b.is_ascii_whitespace()) {
                    ResponseData::Json(serde_json::Value::Null)
                } else {
                    let value = serde_json::from_slice(&body).map_err(|e| {
                        ClientError::Decode(format!("Response is not valid JSON: {}", e))
                    })?;
                    ResponseData::Json(value)
                }
            }
        };

        Ok(Self {
            status,
            headers,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn build(descriptor: &RequestDescriptor, token: Option<&str>) -> reqwest::Request {
        descriptor
            .build(&Client::new(), "http://localhost:9000/api", token)
            .unwrap()
            .build()
            .unwrap()
    }

    fn body_bytes(request: &reqwest::Request) -> Option<Vec<u8>> {
        request
            .body()
            .and_then(|b| b.as_bytes())
            .map(|b| b.to_vec())
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://host/api", "/orders").unwrap(),
            "http://host/api/orders"
        );
        assert_eq!(
            join_url("http://host/api/", "orders").unwrap(),
            "http://host/api/orders"
        );
        assert_eq!(
            join_url("http://host/api/", "/orders?page=2").unwrap(),
            "http://host/api/orders?page=2"
        );
        assert_eq!(join_url("http://host/api/", "").unwrap(), "http://host/api");
    }

    #[test]
    fn test_join_url_rejects_absolute_endpoint() {
        let err = join_url("http://host/api", "https://evil.example/orders").unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn test_response_type_parsing() {
        assert_eq!("json".parse::<ResponseType>().unwrap(), ResponseType::Json);
        assert_eq!("BLOB".parse::<ResponseType>().unwrap(), ResponseType::Blob);
        assert_eq!("Text".parse::<ResponseType>().unwrap(), ResponseType::Text);
        assert!("xml".parse::<ResponseType>().is_err());
        assert_eq!(ResponseType::Blob.to_string(), "blob");
    }

    #[test]
    fn test_build_attaches_bearer_token() {
        let descriptor = RequestDescriptor::get("/orders");
        let request = build(&descriptor, Some("A1"));

        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.url().as_str(), "http://localhost:9000/api/orders");
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer A1");
        assert!(request.headers()[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn test_build_without_token_has_no_authorization() {
        let descriptor = RequestDescriptor::get("/orders");
        let request = build(&descriptor, None);
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_build_bytes_payload() {
        let descriptor = RequestDescriptor::new(
            "/products/7/image",
            Method::PUT,
            Payload::Bytes {
                content_type: "image/png".to_string(),
                data: Bytes::from_static(b"\x89PNG"),
            },
            ResponseType::Json,
        );
        let request = build(&descriptor, Some("A1"));
        assert_eq!(request.headers()[CONTENT_TYPE], "image/png");
        assert_eq!(body_bytes(&request).unwrap(), b"\x89PNG".to_vec());
    }

    #[test]
    fn test_build_rejects_invalid_token() {
        let descriptor = RequestDescriptor::get("/orders");
        let err = descriptor
            .build(&Client::new(), "http://localhost", Some("bad\ntoken"))
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    proptest! {
        #[test]
        fn rebuilding_with_another_token_only_changes_authorization(
            first in "[A-Za-z0-9._-]{1,64}",
            second in "[A-Za-z0-9._-]{1,64}",
            name in "[a-z]{1,12}",
            qty in 0u32..1000,
        ) {
            let descriptor = RequestDescriptor::new(
                "/orders",
                Method::POST,
                Payload::Json(json!({"name": name, "qty": qty})),
                ResponseType::Json,
            );
            let snapshot = descriptor.clone();

            let a = build(&descriptor, Some(first.as_str()));
            let b = build(&descriptor, Some(second.as_str()));

            prop_assert_eq!(&descriptor, &snapshot);
            prop_assert_eq!(a.method(), b.method());
            prop_assert_eq!(a.url(), b.url());
            prop_assert_eq!(body_bytes(&a), body_bytes(&b));

            let mut headers_a = a.headers().clone();
            let mut headers_b = b.headers().clone();
            prop_assert_eq!(
                headers_a.remove(AUTHORIZATION).unwrap(),
                HeaderValue::from_str(&format!("Bearer {}", first)).unwrap()
            );
            prop_assert_eq!(
                headers_b.remove(AUTHORIZATION).unwrap(),
                HeaderValue::from_str(&format!("Bearer {}", second)).unwrap()
            );
            prop_assert_eq!(headers_a, headers_b);
        }
    }
}
