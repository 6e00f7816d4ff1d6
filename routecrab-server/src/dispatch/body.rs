//! Turning an HTTP request into the JSON object sent to a backend

use super::response::ApiError;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::{Method, StatusCode, Uri, header::CONTENT_TYPE};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use routecrab::RouteMatch;
use serde_json::{Map, Value};

pub(crate) fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Values of the route's declared parameters
///
/// Query values are read first; a path parameter of the same name replaces
/// its query value.
pub(crate) fn extract_params<B>(route: &RouteMatch<B>, uri: &Uri) -> Map<String, Value> {
    let names = &route.descriptor().param_names;
    let mut params = Map::new();
    if names.is_empty() {
        return params;
    }

    if let Ok(Query(query)) = Query::<Vec<(String, String)>>::try_from_uri(uri) {
        for (name, value) in query {
            if names.contains(&name) && !params.contains_key(&name) {
                params.insert(name, Value::String(value));
            }
        }
    }

    for (name, value) in route.params() {
        if names.contains(name) {
            params.insert(name.clone(), Value::String(value.clone()));
        }
    }

    params
}

/// Bind the request body as a JSON object
///
/// A request without a content type is refused. Anything else binds best
/// effort: a body that does not decode contributes nothing.
pub(crate) async fn materialize(request: Request) -> Result<Map<String, Value>, ApiError> {
    let Some(content_type) = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
    else {
        return Err(ApiError::unsupported_media_type());
    };

    if content_type.starts_with("multipart/form-data") {
        return multipart(request).await;
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        return match axum::Form::<Vec<(String, String)>>::from_request(request, &()).await {
            Ok(axum::Form(pairs)) => Ok(group(
                pairs
                    .into_iter()
                    .map(|(name, value)| (name, Value::String(value))),
            )),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(ApiError::payload_too_large())
            }
            Err(rejection) => {
                tracing::debug!("Form body not bound: {}", rejection.body_text());
                Ok(Map::new())
            }
        };
    }

    if content_type.starts_with("application/json") || content_type.contains("+json") {
        let bytes = match Bytes::from_request(request, &()).await {
            Ok(bytes) => bytes,
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiError::payload_too_large());
            }
            Err(rejection) => {
                tracing::debug!("JSON body not read: {}", rejection.body_text());
                return Ok(Map::new());
            }
        };
        return Ok(match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                tracing::debug!("JSON body is not an object");
                Map::new()
            }
            Err(e) => {
                tracing::debug!("JSON body not bound: {}", e);
                Map::new()
            }
        });
    }

    tracing::debug!(content_type = %content_type, "Content type not bound");
    Ok(Map::new())
}

/// File parts become base64 strings; every part name maps to a scalar or,
/// when repeated, an array in part order
///
/// A body over the size limit is refused rather than forwarded truncated.
async fn multipart(request: Request) -> Result<Map<String, Value>, ApiError> {
    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::debug!("Multipart body not bound: {}", rejection.body_text());
            return Ok(Map::new());
        }
    };

    let mut parts = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiError::payload_too_large());
            }
            Err(e) => {
                tracing::debug!("Multipart body truncated: {}", e);
                break;
            }
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let is_file = field.file_name().is_some();
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiError::payload_too_large());
            }
            Err(e) => {
                tracing::debug!(field = %name, "Multipart field not read: {}", e);
                break;
            }
        };

        let value = if is_file {
            STANDARD.encode(&data)
        } else {
            String::from_utf8_lossy(&data).into_owned()
        };
        parts.push((name, Value::String(value)));
    }

    Ok(group(parts))
}

fn group(pairs: impl IntoIterator<Item = (String, Value)>) -> Map<String, Value> {
    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for (name, value) in pairs {
        match grouped.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, values)) => values.push(value),
            None => grouped.push((name, vec![value])),
        }
    }

    grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            (name, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::DefaultBodyLimit;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use routecrab::{RouteDescriptor, RouteRegistry};
    use serde_json::json;
    use tower::ServiceExt;

    fn request(content_type: Option<&str>, body: &str) -> Request {
        let mut builder = Request::builder().method("POST").uri("/x");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_missing_content_type_is_refused() {
        let error = materialize(request(None, "{}")).await.unwrap_err();
        assert_eq!(error.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_json_binds_best_effort() {
        let bound = materialize(request(Some("application/json"), r#"{"a":1}"#))
            .await
            .unwrap();
        assert_eq!(Value::Object(bound), json!({ "a": 1 }));

        let broken = materialize(request(Some("application/json"), "{nope"))
            .await
            .unwrap();
        assert!(broken.is_empty());

        let array = materialize(request(Some("application/json"), "[1,2]"))
            .await
            .unwrap();
        assert!(array.is_empty());

        let text = materialize(request(Some("text/plain"), "hello")).await.unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_form_groups_repeated_names() {
        let bound = materialize(request(
            Some("application/x-www-form-urlencoded"),
            "tag=a&tag=b&name=x",
        ))
        .await
        .unwrap();
        assert_eq!(Value::Object(bound), json!({ "tag": ["a", "b"], "name": "x" }));
    }

    #[tokio::test]
    async fn test_multipart_files_are_base64() {
        let body = "--XB\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            report\r\n\
            --XB\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            hello\r\n\
            --XB\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"b.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            world\r\n\
            --XB--\r\n";
        let bound = materialize(request(Some("multipart/form-data; boundary=XB"), body))
            .await
            .unwrap();

        assert_eq!(
            Value::Object(bound),
            json!({ "title": "report", "doc": ["aGVsbG8=", "d29ybGQ="] })
        );
    }

    /// Status of binding `request` behind a body limit of `limit` bytes
    async fn bind_limited(limit: usize, request: Request) -> StatusCode {
        let app = Router::new()
            .route(
                "/x",
                post(|request: Request| async move {
                    match materialize(request).await {
                        Ok(bound) => axum::Json(Value::Object(bound)).into_response(),
                        Err(e) => e.into_response(),
                    }
                }),
            )
            .layer(DefaultBodyLimit::max(limit));
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_oversized_bodies_are_refused() {
        let file = "x".repeat(512);
        let body = format!(
            "--XB\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"big.bin\"\r\n\r\n\
            {file}\r\n\
            --XB--\r\n"
        );
        let content_type = "multipart/form-data; boundary=XB";

        let status = bind_limited(128, request(Some(content_type), &body)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        let status = bind_limited(4096, request(Some(content_type), &body)).await;
        assert_eq!(status, StatusCode::OK);

        let json = format!(r#"{{"doc":"{file}"}}"#);
        let status = bind_limited(128, request(Some("application/json"), &json)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_path_params_win_over_query() {
        let registry: RouteRegistry<()> = RouteRegistry::new();
        registry.merge(
            RouteDescriptor::new("users", "GET", "/users/:id")
                .mount_prefix("svc")
                .params(["id", "expand"]),
            (),
        );
        let route = registry.lookup("GET", "/svc/users/42").unwrap();

        let uri: Uri = "/svc/users/42?id=7&expand=true&expand=false&other=1"
            .parse()
            .unwrap();
        let params = extract_params(&route, &uri);

        assert_eq!(
            Value::Object(params),
            json!({ "id": "42", "expand": "true" })
        );
    }
}
