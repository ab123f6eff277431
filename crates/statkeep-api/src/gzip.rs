//! Gzip middleware.
//!
//! Inflates request bodies sent with `Content-Encoding: gzip` and
//! compresses responses for clients whose `Accept-Encoding` lists gzip.

use std::io::{Read, Write};

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::Request;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::warn;

/// Largest request body accepted, compressed or not.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Middleware entry point, for `axum::middleware::from_fn`.
pub async fn gzip(req: Request, next: Next) -> Response {
    let accepts_gzip = lists_gzip(req.headers(), &ACCEPT_ENCODING);

    let req = if lists_gzip(req.headers(), &CONTENT_ENCODING) {
        match inflate_request(req).await {
            Ok(req) => req,
            Err(resp) => return resp,
        }
    } else {
        req
    };

    let resp = next.run(req).await;
    if accepts_gzip && !resp.headers().contains_key(CONTENT_ENCODING) {
        compress_response(resp).await
    } else {
        resp
    }
}

fn lists_gzip(headers: &HeaderMap, name: &axum::http::HeaderName) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|enc| enc.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("gzip"))
}

async fn inflate_request(req: Request) -> Result<Request, Response> {
    let (mut parts, body) = req.into_parts();
    let compressed = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| bad_request(format!("reading request body: {e}")))?;
    let plain = decompress(&compressed).map_err(|e| bad_request(format!("invalid gzip body: {e}")))?;

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    Ok(Request::from_parts(parts, Body::from(plain)))
}

async fn compress_response(resp: Response) -> Response {
    let (mut parts, body) = resp.into_parts();
    let plain = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer response for compression");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let compressed = match compress(&plain) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to compress response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    parts.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.append(VARY, HeaderValue::from_static("accept-encoding"));
    Response::from_parts(parts, Body::from(compressed))
}

fn bad_request(msg: String) -> Response {
    warn!(%msg, "rejected compressed request");
    (StatusCode::BAD_REQUEST, msg).into_response()
}

/// Gzip `data` at the fastest compression level.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate a gzip stream, refusing output larger than `MAX_BODY_BYTES`.
pub fn decompress(data: &[u8]) -> std::io::Result<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > MAX_BODY_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "decompressed body too large",
        ));
    }
    Ok(Bytes::from(out))
}
