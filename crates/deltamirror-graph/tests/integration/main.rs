//! Integration tests for deltamirror-graph
//!
//! Uses wiremock to simulate the Microsoft Graph API and verifies the
//! `IRemoteSource` implementation end to end: delta enumeration,
//! pagination, token expiry, downloads and status mapping.

mod common;

mod test_delta;
mod test_download;
