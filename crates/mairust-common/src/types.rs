//! Common types for MaiRust

use chrono::{DateTime, Utc};

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;
