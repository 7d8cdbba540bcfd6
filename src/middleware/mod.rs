/*
 * Responsibility
 * - Router-level middleware entry points
 *   - auth::gateway: authentication / authorization / identity headers
 *   - http: request id, body limit, timeout, access log
 *   - security_headers: response hardening
 */
pub mod auth;
pub mod http;
pub mod security_headers;
