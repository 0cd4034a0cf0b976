// SPDX-License-Identifier: MIT
//
// Route dispatch -- maps the hand-off API surface onto the session manager.
//
//   POST   /api/scan/sessions                        create session
//   GET    /api/scan/sessions/{id}                   poll session state
//   DELETE /api/scan/sessions/{id}                   finish session
//   POST   /api/scan/sessions/{id}/images            append captured image
//   DELETE /api/scan/sessions/{id}/images/{index}    remove image by index
//   POST   /api/scan/sessions/{id}/pdf               assemble session to PDF
//
// The transport performs request parsing and id validation; everything
// else is delegated to the store. A malformed session id is reported as
// not-found, the same way an expired or mistyped one is.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use scanbridge_core::error::ScanbridgeError;
use scanbridge_core::types::SessionId;
use scanbridge_document::PdfAssembler;
use scanbridge_session::SessionStore;

use crate::http::{HttpRequest, HttpResponse};

/// State shared across all connection-handling tasks.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
}

impl AppState {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

// -- Wire types ---------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    session_id: SessionId,
}

#[derive(Deserialize)]
struct AppendImageRequest {
    image: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    ok: bool,
    image_count: usize,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// -- Dispatch -----------------------------------------------------------------

/// Route a parsed request to the appropriate handler.
pub fn dispatch(request: &HttpRequest, state: &AppState) -> HttpResponse {
    let segments: Vec<&str> = request.path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["api", "scan", "sessions"] => match request.method.as_str() {
            "POST" => create_session(state),
            _ => method_not_allowed(&request.method),
        },
        ["api", "scan", "sessions", id] => match request.method.as_str() {
            "GET" => get_session(state, id),
            "DELETE" => close_session(state, id),
            _ => method_not_allowed(&request.method),
        },
        ["api", "scan", "sessions", id, "images"] => match request.method.as_str() {
            "POST" => append_image(state, id, request),
            _ => method_not_allowed(&request.method),
        },
        ["api", "scan", "sessions", id, "images", index] => match request.method.as_str() {
            "DELETE" => remove_image(state, id, index),
            _ => method_not_allowed(&request.method),
        },
        ["api", "scan", "sessions", id, "pdf"] => match request.method.as_str() {
            "POST" => assemble_pdf(state, id),
            _ => method_not_allowed(&request.method),
        },
        _ => {
            debug!(path = %request.path, "unknown route");
            HttpResponse::json(
                404,
                &ErrorResponse {
                    error: "no such endpoint".into(),
                },
            )
        }
    }
}

// -- Handlers -----------------------------------------------------------------

fn create_session(state: &AppState) -> HttpResponse {
    match state.store.create() {
        Ok(session_id) => HttpResponse::json(201, &CreatedResponse { session_id }),
        Err(err) => error_response(err),
    }
}

fn get_session(state: &AppState, raw_id: &str) -> HttpResponse {
    let Some(id) = SessionId::parse(raw_id) else {
        return not_found(raw_id);
    };

    match state.store.get(&id) {
        Ok(snapshot) => HttpResponse::json(200, &snapshot),
        Err(err) => error_response(err),
    }
}

fn close_session(state: &AppState, raw_id: &str) -> HttpResponse {
    // Closing is idempotent: finishing an already-gone session is fine.
    if let Some(id) = SessionId::parse(raw_id) {
        state.store.close(&id);
    }
    HttpResponse::json(200, &OkResponse { ok: true })
}

fn append_image(state: &AppState, raw_id: &str, request: &HttpRequest) -> HttpResponse {
    let Some(id) = SessionId::parse(raw_id) else {
        return not_found(raw_id);
    };

    let payload: AppendImageRequest = match request.json() {
        Ok(p) => p,
        Err(err) => return error_response(err),
    };

    match state.store.append_image(&id, payload.image) {
        Ok(image_count) => HttpResponse::json(
            200,
            &MutationResponse {
                ok: true,
                image_count,
            },
        ),
        Err(err) => error_response(err),
    }
}

fn remove_image(state: &AppState, raw_id: &str, raw_index: &str) -> HttpResponse {
    let Some(id) = SessionId::parse(raw_id) else {
        return not_found(raw_id);
    };

    let Ok(index) = raw_index.parse::<usize>() else {
        return error_response(ScanbridgeError::InvalidRequest(format!(
            "image index must be a non-negative integer, got {raw_index:?}"
        )));
    };

    match state.store.remove_image(&id, index) {
        Ok(image_count) => HttpResponse::json(
            200,
            &MutationResponse {
                ok: true,
                image_count,
            },
        ),
        Err(err) => error_response(err),
    }
}

fn assemble_pdf(state: &AppState, raw_id: &str) -> HttpResponse {
    let Some(id) = SessionId::parse(raw_id) else {
        return not_found(raw_id);
    };

    let snapshot = match state.store.get(&id) {
        Ok(s) => s,
        Err(err) => return error_response(err),
    };

    let mut assembler = PdfAssembler::a4();
    assembler.set_title("Scanned Document");
    match assembler.assemble(&snapshot.images) {
        Ok(pdf) => {
            debug!(session_id = %id, pages = snapshot.image_count, "session assembled to PDF");
            HttpResponse::pdf(pdf)
        }
        Err(err) => error_response(err),
    }
}

// -- Error mapping ------------------------------------------------------------

fn not_found(raw_id: &str) -> HttpResponse {
    debug!(raw_id, "session id unknown or malformed");
    HttpResponse::json(
        404,
        &ErrorResponse {
            error: "session not found".into(),
        },
    )
}

fn method_not_allowed(method: &str) -> HttpResponse {
    HttpResponse::json(
        405,
        &ErrorResponse {
            error: format!("method {method} not allowed here"),
        },
    )
}

/// Map manager errors onto HTTP status codes.
///
/// Not-found is the normal recoverable case; invalid input is a caller
/// error; hitting a limit asks the client to back off or finish up.
fn error_response(err: ScanbridgeError) -> HttpResponse {
    let status = match &err {
        ScanbridgeError::SessionNotFound(_) => 404,
        ScanbridgeError::EmptyImagePayload
        | ScanbridgeError::ImageIndexOutOfRange { .. }
        | ScanbridgeError::InvalidRequest(_)
        | ScanbridgeError::PdfError(_)
        | ScanbridgeError::ImageError(_) => 400,
        ScanbridgeError::SessionLimit(_) | ScanbridgeError::ImageLimit(_) => 429,
        _ => 500,
    };

    if status == 500 {
        warn!(error = %err, "internal error serving request");
    } else {
        debug!(status, error = %err, "request failed");
    }

    HttpResponse::json(
        status,
        &ErrorResponse {
            error: err.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_state() -> AppState {
        AppState::new(Arc::new(SessionStore::with_timeout(Duration::from_secs(
            60,
        ))))
    }

    fn request(method: &str, path: &str, body: &[u8]) -> HttpRequest {
        HttpRequest {
            method: method.into(),
            path: path.into(),
            body: body.to_vec(),
        }
    }

    fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = response.into_bytes();
        let split = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator");
        serde_json::from_slice(&bytes[split + 4..]).expect("json body")
    }

    fn create_session_id(state: &AppState) -> String {
        let response = dispatch(&request("POST", "/api/scan/sessions", b""), state);
        assert_eq!(response.status, 201);
        body_json(response)["sessionId"]
            .as_str()
            .expect("sessionId")
            .to_string()
    }

    #[test]
    fn create_then_get_returns_empty_session() {
        let state = test_state();
        let id = create_session_id(&state);

        let response = dispatch(&request("GET", &format!("/api/scan/sessions/{id}"), b""), &state);
        assert_eq!(response.status, 200);

        let json = body_json(response);
        assert_eq!(json["imageCount"], 0);
        assert_eq!(json["images"].as_array().expect("images").len(), 0);
    }

    #[test]
    fn append_and_remove_follow_capture_order() {
        let state = test_state();
        let id = create_session_id(&state);
        let base = format!("/api/scan/sessions/{id}");

        for payload in ["AAA", "BBB"] {
            let body = format!("{{\"image\":\"data:image/jpeg;base64,{payload}\"}}");
            let response = dispatch(
                &request("POST", &format!("{base}/images"), body.as_bytes()),
                &state,
            );
            assert_eq!(response.status, 200);
        }

        let response = dispatch(&request("DELETE", &format!("{base}/images/0"), b""), &state);
        assert_eq!(response.status, 200);
        assert_eq!(body_json(response)["imageCount"], 1);

        let json = body_json(dispatch(&request("GET", &base, b""), &state));
        assert_eq!(json["images"][0], "data:image/jpeg;base64,BBB");
    }

    #[test]
    fn unknown_session_is_404() {
        let state = test_state();
        let ghost = SessionId::new();

        let response = dispatch(
            &request("GET", &format!("/api/scan/sessions/{ghost}"), b""),
            &state,
        );
        assert_eq!(response.status, 404);
    }

    #[test]
    fn malformed_session_id_is_404() {
        let state = test_state();
        let response = dispatch(
            &request("GET", "/api/scan/sessions/not-a-real-id", b""),
            &state,
        );
        assert_eq!(response.status, 404);
    }

    #[test]
    fn empty_image_payload_is_400() {
        let state = test_state();
        let id = create_session_id(&state);

        let response = dispatch(
            &request(
                "POST",
                &format!("/api/scan/sessions/{id}/images"),
                b"{\"image\":\"\"}",
            ),
            &state,
        );
        assert_eq!(response.status, 400);
    }

    #[test]
    fn non_numeric_index_is_400() {
        let state = test_state();
        let id = create_session_id(&state);

        let response = dispatch(
            &request(
                "DELETE",
                &format!("/api/scan/sessions/{id}/images/first"),
                b"",
            ),
            &state,
        );
        assert_eq!(response.status, 400);
    }

    #[test]
    fn out_of_range_index_is_400_and_harmless() {
        let state = test_state();
        let id = create_session_id(&state);

        let response = dispatch(
            &request("DELETE", &format!("/api/scan/sessions/{id}/images/5"), b""),
            &state,
        );
        assert_eq!(response.status, 400);

        let json = body_json(dispatch(
            &request("GET", &format!("/api/scan/sessions/{id}"), b""),
            &state,
        ));
        assert_eq!(json["imageCount"], 0);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let state = test_state();
        let id = create_session_id(&state);
        let path = format!("/api/scan/sessions/{id}");

        assert_eq!(dispatch(&request("DELETE", &path, b""), &state).status, 200);
        assert_eq!(dispatch(&request("DELETE", &path, b""), &state).status, 200);
        assert_eq!(dispatch(&request("GET", &path, b""), &state).status, 404);
    }

    #[test]
    fn wrong_method_is_405_and_unknown_route_404() {
        let state = test_state();
        assert_eq!(
            dispatch(&request("PUT", "/api/scan/sessions", b""), &state).status,
            405
        );
        assert_eq!(
            dispatch(&request("GET", "/api/other/thing", b""), &state).status,
            404
        );
    }

    #[test]
    fn session_cap_maps_to_429() {
        use scanbridge_session::store::StoreLimits;

        let state = AppState::new(Arc::new(SessionStore::new(
            Duration::from_secs(60),
            StoreLimits {
                max_sessions: 1,
                max_images_per_session: 10,
            },
        )));

        create_session_id(&state);
        let response = dispatch(&request("POST", "/api/scan/sessions", b""), &state);
        assert_eq!(response.status, 429);
    }

    #[test]
    fn finalising_a_session_yields_a_pdf() {
        use base64::Engine;

        let state = test_state();
        let id = create_session_id(&state);

        // One real PNG capture.
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .expect("encode png");
        let payload = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        );

        let body = format!("{{\"image\":{}}}", serde_json::to_string(&payload).unwrap());
        let response = dispatch(
            &request(
                "POST",
                &format!("/api/scan/sessions/{id}/images"),
                body.as_bytes(),
            ),
            &state,
        );
        assert_eq!(response.status, 200);

        let response = dispatch(
            &request("POST", &format!("/api/scan/sessions/{id}/pdf"), b""),
            &state,
        );
        assert_eq!(response.status, 200);

        let bytes = response.into_bytes();
        let split = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("terminator");
        assert!(bytes[split + 4..].starts_with(b"%PDF"));
    }

    #[test]
    fn finalising_an_empty_session_is_400() {
        let state = test_state();
        let id = create_session_id(&state);

        let response = dispatch(
            &request("POST", &format!("/api/scan/sessions/{id}/pdf"), b""),
            &state,
        );
        assert_eq!(response.status, 400);
    }
}
