//! Static bundle serving with single-page-application fallback.

use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const INDEX: &str = "index.html";

/// Whether the last path segment carries a file extension.
fn has_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

/// Map a request path to the bundle-relative file that should answer it.
///
/// `/` and extensionless paths not ending in `/` become `index.html`.
pub fn candidate_path(request_path: &str) -> String {
    if request_path == "/" || (!has_extension(request_path) && !request_path.ends_with('/')) {
        INDEX.to_string()
    } else {
        request_path.trim_start_matches('/').to_string()
    }
}

/// Percent-decode each segment of `request_path`.
///
/// Returns `None` when a segment is not valid UTF-8 once decoded, or decodes
/// to a separator or NUL.
fn decode_path(request_path: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in request_path.split('/') {
        let decoded = urlencoding::decode(segment).ok()?;
        if decoded.contains(['/', '\\', '\0']) {
            return None;
        }
        segments.push(decoded.into_owned());
    }
    Some(segments.join("/"))
}

/// Join `relative` onto `root`, refusing anything that would leave `root`.
fn safe_join(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

async fn regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn stream_file(path: &Path) -> Response {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "static file vanished");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    if let Ok(value) = header::HeaderValue::from_str(mime.as_ref()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Serve `request_path` from `root`.
///
/// 1. Percent-decode the path and resolve the candidate file (see [`candidate_path`]).
/// 2. Stream it if it is a regular file.
/// 3. Otherwise serve `index.html` for extensionless (client-side) routes.
/// 4. Otherwise 404.
pub async fn serve(root: &Path, request_path: &str) -> Response {
    let Some(request_path) = decode_path(request_path) else {
        debug!(path = request_path, "undecodable request path");
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };
    let request_path = request_path.as_str();

    let candidate = candidate_path(request_path);
    if let Some(path) = safe_join(root, &candidate)
        && regular_file(&path).await
    {
        return stream_file(&path).await;
    }

    if !has_extension(request_path) {
        let index = root.join(INDEX);
        if regular_file(&index).await {
            return stream_file(&index).await;
        }
    }

    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn bundle() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>app</html>").unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/app.js"), "console.log(1)").unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        dir
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("/logo.png"));
        assert!(has_extension("/assets/app.min.js"));
        assert!(!has_extension("/dashboard"));
        assert!(!has_extension("/"));
        assert!(!has_extension("/.well-known"));
        assert!(!has_extension("/v1.2/servers"));
    }

    #[test]
    fn test_candidate_path() {
        assert_eq!(candidate_path("/"), "index.html");
        assert_eq!(candidate_path("/dashboard"), "index.html");
        assert_eq!(candidate_path("/servers/42"), "index.html");
        assert_eq!(candidate_path("/assets/app.js"), "assets/app.js");
        assert_eq!(candidate_path("/docs/"), "docs/");
    }

    #[test]
    fn test_safe_join_rejects_traversal() {
        let root = Path::new("/srv/dist");
        assert_eq!(
            safe_join(root, "assets/app.js"),
            Some(PathBuf::from("/srv/dist/assets/app.js"))
        );
        assert!(safe_join(root, "../etc/passwd").is_none());
        assert!(safe_join(root, "assets/../../secret.txt").is_none());
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/my%20logo.png").as_deref(), Some("/my logo.png"));
        assert_eq!(decode_path("/caf%C3%A9/menu").as_deref(), Some("/café/menu"));
        assert_eq!(decode_path("/%2e%2e/secret").as_deref(), Some("/../secret"));
        assert!(decode_path("/a%2Fb.png").is_none());
        assert!(decode_path("/a%5Cb.png").is_none());
        assert!(decode_path("/a%00.png").is_none());
        assert!(decode_path("/%FF.png").is_none());
    }

    #[tokio::test]
    async fn test_serves_percent_encoded_file_name() {
        let dir = bundle();
        std::fs::write(dir.path().join("my logo.png"), "png-bytes").unwrap();
        let response = serve(dir.path(), "/my%20logo.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert_eq!(content_type, "image/png");
        assert_eq!(body_text(response).await, "png-bytes");
    }

    #[tokio::test]
    async fn test_encoded_traversal_is_404() {
        let dir = bundle();
        let root = dir.path().join("assets");
        std::fs::write(dir.path().join("secret.png"), "secret").unwrap();
        let response = serve(&root, "/%2e%2e/secret.png").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = serve(&root, "/..%2Fsecret.png").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serves_existing_file_with_mime() {
        let dir = bundle();
        let response = serve(dir.path(), "/assets/app.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.contains("javascript"));
        assert_eq!(body_text(response).await, "console.log(1)");
    }

    #[tokio::test]
    async fn test_client_route_falls_back_to_index() {
        let dir = bundle();
        let response = serve(dir.path(), "/dashboard").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>app</html>");
    }

    #[tokio::test]
    async fn test_directory_path_falls_back_to_index() {
        let dir = bundle();
        let response = serve(dir.path(), "/docs/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>app</html>");
    }

    #[tokio::test]
    async fn test_missing_asset_is_404() {
        let dir = bundle();
        let response = serve(dir.path(), "/missing.png").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_is_404() {
        let dir = bundle();
        let response = serve(&dir.path().join("assets"), "/../index.html").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_index_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let response = serve(dir.path(), "/").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
