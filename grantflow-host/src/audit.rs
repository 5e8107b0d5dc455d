//! Audit trail for permission request outcomes
//!
//! Provides a trait-based audit seam so hosts can route grant-flow
//! events (requested, denied, request completed) to their preferred
//! destination. Audit is observational only; failures never steer the
//! flow.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Timestamp type (RFC 3339 string for portability)
pub type Timestamp = String;

fn now_rfc3339() -> Timestamp {
    Utc::now().to_rfc3339()
}

/// Audit event emitted by the grant flow
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Timestamp of the event
    pub timestamp: Timestamp,

    /// Type of event
    pub event_type: AuditEventType,

    /// Requesting package
    pub package: String,

    /// Permission group involved (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Additional details
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(
        event_type: AuditEventType,
        package: impl Into<String>,
        details: AuditDetails,
    ) -> Self {
        Self {
            timestamp: now_rfc3339(),
            event_type,
            package: package.into(),
            group: None,
            details,
        }
    }

    /// Attach the permission group the event belongs to
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A permission was asked for interactively
    PermissionRequested,

    /// A permission was denied by the user or device policy
    PermissionDenied,

    /// A whole request finished; lists the groups it touched
    RequestCompleted,
}

/// Details about the audit event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    /// A single permission
    Permission {
        /// Permission name
        permission: String,
    },

    /// A whole request
    Request {
        /// Distinct group names the request touched, in request order
        groups: Vec<String>,
    },
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Trait for audit event sinks
///
/// Hosts implement this trait to decide where grant-flow events go.
///
/// # Example
///
/// ```rust
/// use grantflow_host::audit::{AuditSink, AuditEvent, AuditError};
///
/// struct SyslogSink {
///     facility: String,
/// }
///
/// impl AuditSink for SyslogSink {
///     fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
///         println!("{}: {:?}", self.facility, event);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AuditError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send + Sync {
    /// Record an audit event
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;

    /// Check if the sink is healthy/available
    fn is_healthy(&self) -> bool {
        true
    }
}

// ============================================================================
// Default Implementations
// ============================================================================

/// File-based audit sink (JSONL format)
///
/// Writes audit events to a file in JSON Lines format, one event per
/// line, appending across sessions.
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Create a new file audit sink
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Create a sink in the default location for an application
    pub fn default_for_app(app_name: &str) -> Result<Self, AuditError> {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".data"));
        Self::new(data_dir.join(app_name).join("grants.audit.jsonl"))
    }

    /// Get the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.path.parent().map(|p| p.exists()).unwrap_or(true)
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory audit sink for testing
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Create a new memory sink with default capacity (1000 events)
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new memory sink with specified capacity
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    /// Get all recorded events
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().unwrap().clone()
    }

    /// Get event count
    pub fn count(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Clear all events
    pub fn clear(&self) {
        self.events.write().unwrap().clear();
    }

    /// Find events by type
    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Find events by requesting package
    pub fn find_by_package(&self, package: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.package == package)
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().unwrap();
        if events.len() >= self.max_events {
            events.remove(0); // FIFO eviction
        }
        events.push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Null audit sink (discards all events)
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl NullAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Composite audit sink that writes to multiple sinks
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl Default for CompositeAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.record(event.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.flush()?;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.sinks.iter().all(|s| s.is_healthy())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Event for a permission about to be asked for interactively
pub fn permission_requested(package: &str, permission: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PermissionRequested,
        package,
        AuditDetails::Permission {
            permission: permission.to_string(),
        },
    )
}

/// Event for a denied permission
pub fn permission_denied(package: &str, permission: &str, group: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PermissionDenied,
        package,
        AuditDetails::Permission {
            permission: permission.to_string(),
        },
    )
    .with_group(group)
}

/// Event for a finished request, listing the groups it touched
pub fn request_completed(package: &str, groups: Vec<String>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::RequestCompleted,
        package,
        AuditDetails::Request { groups },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();

        let event = permission_requested("com.example.dialer", "contacts.read");
        sink.record(event).unwrap();

        assert_eq!(sink.count(), 1);
        let events = sink.find_by_type(AuditEventType::PermissionRequested);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].package, "com.example.dialer");
    }

    #[test]
    fn test_memory_sink_eviction() {
        let sink = MemoryAuditSink::with_capacity(2);

        for i in 0..3 {
            let event = permission_requested(&format!("pkg-{}", i), "contacts.read");
            sink.record(event).unwrap();
        }

        assert_eq!(sink.count(), 2);
        let events = sink.events();
        assert_eq!(events[0].package, "pkg-1");
        assert_eq!(events[1].package, "pkg-2");
    }

    #[test]
    fn test_find_by_package() {
        let sink = MemoryAuditSink::new();
        sink.record(permission_requested("a", "x.read")).unwrap();
        sink.record(permission_denied("b", "y.read", "y")).unwrap();

        assert_eq!(sink.find_by_package("a").len(), 1);
        assert_eq!(sink.find_by_package("c").len(), 0);
    }

    #[test]
    fn test_null_sink() {
        let sink = NullAuditSink::new();

        let event = permission_requested("test", "contacts.read");
        assert!(sink.record(event).is_ok());
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn test_composite_sink_fans_out() {
        let sink = CompositeAuditSink::new()
            .with_sink(NullAuditSink::new())
            .with_sink(MemoryAuditSink::new());

        let event = request_completed("test", vec!["contacts".into()]);
        assert!(sink.record(event).is_ok());
        assert!(sink.flush().is_ok());
        assert!(sink.is_healthy());
    }

    #[test]
    fn test_event_serialization() {
        let event = permission_denied("com.example.notes", "contacts.read", "contacts");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("permission_denied"));
        assert!(json.contains("com.example.notes"));
        assert!(json.contains("contacts.read"));
        assert!(json.contains("\"group\":\"contacts\""));
    }

    #[test]
    fn test_request_completed_lists_groups() {
        let event = request_completed("pkg", vec!["contacts".into(), "camera".into()]);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("request_completed"));
        assert!(json.contains("camera"));
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = FileAuditSink::new(&path).unwrap();

        sink.record(permission_requested("test", "contacts.read"))
            .unwrap();
        sink.record(permission_denied("test", "contacts.read", "contacts"))
            .unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("permission_requested"));
        assert!(content.contains("permission_denied"));
    }
}
