//! Audit Logger (C4, §3, §4.4): an append-only, independent compliance
//! trail — never routed through `tracing`, which stays reserved for
//! operational/diagnostic logging (§10.2).

pub mod event;
pub mod logger;

pub use event::{AuditEvent, AuditLevel};
pub use logger::{AuditLogger, AuditQuery, AuditStats};
