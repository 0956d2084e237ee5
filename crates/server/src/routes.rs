use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderMap, Method},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::field::Empty;
use tracing::{debug, error, instrument, warn, Span};

use slipscan_ocr::{Accept, ExtractionResult, OcrBackend, PipelineError, ReceiptPipeline, TextResult, Upload};

use crate::error::ApiError;

/// Allowance for multipart boundaries and part headers on top of the file cap.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub type Pipeline = ReceiptPipeline<Box<dyn OcrBackend>>;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = body_limit(state.pipeline.config().max_upload_bytes);

    Router::new()
        .route("/", get(server_status))
        .route("/extract-text", post(extract_text))
        .route("/api/v1/extract-text", post(extract_text_with_count))
        .route("/extract-receipt-data", post(extract_receipt_data))
        .route("/api/v1/extract-receipt-data", post(extract_receipt_data))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors()),
        )
        .with_state(state)
}

/// Request body cap: the file cap plus multipart framing, clamped at `usize::MAX`.
fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.saturating_add(MULTIPART_OVERHEAD)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

#[derive(Serialize)]
struct ServerStatus {
    host: String,
    status: &'static str,
}

async fn server_status(headers: HeaderMap) -> Json<ServerStatus> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(ServerStatus { host, status: "Running...." })
}

/// `POST /extract-text` returns the recognized text as a JSON string.
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), filename = Empty, size = Empty))]
async fn extract_text(State(state): State<AppState>, multipart: Multipart) -> Result<Json<String>, ApiError> {
    let upload = read_upload(multipart).await?;
    let text = run(&state, move |p| p.recognize_upload(&upload, Accept::Any)).await?;
    Ok(Json(text))
}

/// `POST /api/v1/extract-text`: images only, reports `{Text, TextCount}`.
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), filename = Empty, size = Empty))]
async fn extract_text_with_count(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TextResult>, ApiError> {
    let upload = read_upload(multipart).await?;
    let text = run(&state, move |p| p.recognize_upload(&upload, Accept::ImagesOnly)).await?;
    Ok(Json(TextResult::from(text)))
}

/// `POST /extract-receipt-data` returns `{Text, Data: {ShopName, Total, Change, Date}}`.
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), filename = Empty, size = Empty))]
async fn extract_receipt_data(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ExtractionResult>, ApiError> {
    let upload = read_upload(multipart).await?;
    let result = run(&state, move |p| p.extract_receipt(&upload)).await?;
    Ok(Json(result))
}

/// Pull the `file` field out of the form and note it on the request span.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Failed to read multipart field: {e}");
        ApiError::Form
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(|e| {
            warn!("Failed to read upload body: {e}");
            ApiError::Form
        })?;
        let upload = Upload::new(filename, data.to_vec());
        record_upload(&Span::current(), &upload);
        debug!("Received upload");
        return Ok(upload);
    }
    Err(ApiError::NoFile)
}

fn record_upload(span: &Span, upload: &Upload) {
    span.record("filename", upload.filename.as_str());
    span.record("size", upload.data.len());
}

/// Run a pipeline call on the blocking pool, inside the request's span.
async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Pipeline) -> Result<T, PipelineError> + Send + 'static,
{
    let pipeline = Arc::clone(&state.pipeline);
    let span = Span::current();
    let outcome = tokio::task::spawn_blocking(move || span.in_scope(|| f(pipeline.as_ref())))
        .await
        .map_err(|e| {
            error!("Pipeline task failed: {e}");
            ApiError::Extraction
        })?;

    outcome.map_err(|e| {
        if e.is_client_error() {
            warn!(stage = e.stage(), "Rejected upload: {e}");
        } else {
            error!(stage = e.stage(), "Pipeline failed: {e}");
        }
        ApiError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use slipscan_ocr::{FieldExtractor, MockRecognizer, PipelineConfig, DEFAULT_MAX_UPLOAD_BYTES};
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing::span;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    const BOUNDARY: &str = "slipscan-test-boundary";
    const RECEIPT: &str = "Joe's Diner\nITEM A 5.00\nTOTAL 12.50\nCHANGE 2.50\n01/02/2023 14:30";

    fn app(text: &str, scratch: &Path) -> Router {
        app_with(text, PipelineConfig { scratch_root: scratch.to_path_buf(), ..Default::default() })
    }

    fn app_with(text: &str, config: PipelineConfig) -> Router {
        let pipeline = ReceiptPipeline::new(
            Box::new(MockRecognizer::new(text)) as Box<dyn OcrBackend>,
            FieldExtractor::default(),
            config,
        );
        router(AppState::new(pipeline))
    }

    /// Collects every value recorded into an existing span.
    #[derive(Clone, Default)]
    struct RecordedFields(Arc<Mutex<Vec<(String, String)>>>);

    impl RecordedFields {
        fn contains(&self, name: &str, value: &str) -> bool {
            self.0.lock().unwrap().iter().any(|(n, v)| n == name && v == value)
        }
    }

    impl Visit for RecordedFields {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.lock().unwrap().push((field.name().to_string(), format!("{value:?}")));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for RecordedFields {
        fn on_record(&self, _id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut self.clone());
        }
    }

    fn png() -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(8, 8, |x, y| Luma([((x + y) * 16) as u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn form(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        serde_json::from_str(&body_string(resp).await).unwrap()
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn status_reports_host() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .uri("/")
            .header(header::HOST, "receipts.local:8080")
            .body(Body::empty())
            .unwrap();
        let resp = app("", dir.path()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({ "host": "receipts.local:8080", "status": "Running...." })
        );
    }

    #[tokio::test]
    async fn receipt_data_from_image() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(RECEIPT, dir.path())
            .oneshot(upload_request("/extract-receipt-data", form("file", "receipt.png", &png())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({
                "Text": RECEIPT,
                "Data": {
                    "ShopName": "Joe's Diner",
                    "Total": "12.50",
                    "Change": "2.50",
                    "Date": "01/02/2023 14:30"
                }
            })
        );
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn receipt_data_versioned_route_accepts_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app("TOTAL 12.50", dir.path())
            .oneshot(upload_request("/api/v1/extract-receipt-data", form("file", "r.pdf", b"%PDF-1.4")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["Data"]["Total"], "12.50");
        assert_eq!(json["Data"]["ShopName"], "");
        assert_eq!(json["Data"]["Change"], "");
        assert_eq!(json["Data"]["Date"], "");
    }

    #[tokio::test]
    async fn extract_text_returns_json_string() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app("hello\nworld", dir.path())
            .oneshot(upload_request("/extract-text", form("file", "scan.pdf", b"%PDF")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!("hello\nworld"));
    }

    #[tokio::test]
    async fn versioned_extract_text_counts_and_rejects_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app("abc", dir.path())
            .oneshot(upload_request("/api/v1/extract-text", form("file", "scan.JPG", &png())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!({ "Text": "abc", "TextCount": 3 }));

        let resp = app("abc", dir.path())
            .oneshot(upload_request("/api/v1/extract-text", form("file", "scan.pdf", b"%PDF")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(resp).await, "Invalid file format");
    }

    #[tokio::test]
    async fn unsupported_extension_is_400_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(RECEIPT, dir.path())
            .oneshot(upload_request("/extract-receipt-data", form("file", "doc.txt", b"TOTAL 1.00")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(resp).await, "Invalid file format");
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn missing_file_field_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(RECEIPT, dir.path())
            .oneshot(upload_request("/extract-receipt-data", form("attachment", "r.png", &png())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(resp).await, "No file uploaded");
    }

    #[tokio::test]
    async fn non_multipart_body_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/extract-text")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from("this is not a multipart body"))
            .unwrap();
        let resp = app("", dir.path()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn undecodable_image_is_500_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(RECEIPT, dir.path())
            .oneshot(upload_request("/extract-receipt-data", form("file", "r.png", b"garbage")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(resp).await, "Failed to extract text");
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn size_cap_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let exact = vec![b'x'; DEFAULT_MAX_UPLOAD_BYTES];
        let resp = app("ok", dir.path())
            .oneshot(upload_request("/extract-text", form("file", "big.pdf", &exact)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let over = vec![b'x'; DEFAULT_MAX_UPLOAD_BYTES + 1];
        let resp = app("ok", dir.path())
            .oneshot(upload_request("/extract-text", form("file", "big.pdf", &over)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn unbounded_upload_cap_still_builds_router() {
        assert_eq!(body_limit(usize::MAX), usize::MAX);
        assert_eq!(body_limit(DEFAULT_MAX_UPLOAD_BYTES), DEFAULT_MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD);

        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            max_upload_bytes: usize::MAX,
            scratch_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app_with("", config).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn request_span_carries_filename_and_size() {
        let recorded = RecordedFields::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorded.clone()));

        let dir = tempfile::tempdir().unwrap();
        let data = png();
        let resp = app(RECEIPT, dir.path())
            .oneshot(upload_request("/extract-receipt-data", form("file", "receipt.png", &data)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(recorded.contains("filename", "\"receipt.png\""));
        assert!(recorded.contains("size", &data.len().to_string()));
    }

    #[tokio::test]
    async fn cors_preflight_has_headers_and_no_body() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/extract-receipt-data")
            .header(header::ORIGIN, "http://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let resp = app("", dir.path()).oneshot(req).await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
        assert!(body_string(resp).await.is_empty());
    }

    #[tokio::test]
    async fn cors_header_on_regular_response() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "http://example.com")
            .body(Body::empty())
            .unwrap();
        let resp = app("", dir.path()).oneshot(req).await.unwrap();
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
