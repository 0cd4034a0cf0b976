// SPDX-License-Identifier: MIT
//
// scanbridge-server -- Embedded HTTP server exposing the scan hand-off
// session operations to the desktop and mobile clients.
//
// The transport is a minimal hand-rolled HTTP/1.1 layer over raw TCP:
// request parsing extracts just enough framing (request line, headers,
// Content-Length body) to route JSON payloads in and out of the session
// manager. Each connection is served by its own task and closed after one
// request/response exchange.

pub mod http;
pub mod routes;
pub mod server;

pub use routes::AppState;
pub use server::ScanServer;
