use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Metadata for one listing entry or stat result.
///
/// Directory entries (common prefixes produced by a delimiter listing) carry
/// only a filename; every other field is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStat {
    pub filename: String,
    pub size: Option<u64>,
    pub creation_time: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub is_dir: bool,
}

impl ObjectStat {
    pub fn object(
        filename: impl Into<String>,
        size: u64,
        creation_time: DateTime<Utc>,
        etag: impl Into<String>,
        content_type: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            size: Some(size),
            creation_time: Some(creation_time),
            etag: Some(etag.into()),
            content_type: Some(content_type.into()),
            metadata: Some(metadata),
            is_dir: false,
        }
    }

    pub fn directory(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size: None,
            creation_time: None,
            etag: None,
            content_type: None,
            metadata: None,
            is_dir: true,
        }
    }
}

impl fmt::Display for ObjectStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dir {
            return write!(f, "(directory: {})", self.filename);
        }
        write!(f, "(filename: {}, st_size: ", self.filename)?;
        write_opt(f, self.size.as_ref())?;
        f.write_str(", st_ctime: ")?;
        match self.creation_time {
            // Seconds as a float, always with a fractional part.
            Some(t) => write!(f, "{:?}", epoch_seconds(t))?,
            None => f.write_str("None")?,
        }
        f.write_str(", etag: ")?;
        write_opt(f, self.etag.as_ref())?;
        f.write_str(", content_type: ")?;
        write_opt(f, self.content_type.as_ref())?;
        f.write_str(", metadata: {")?;
        if let Some(metadata) = &self.metadata {
            for (i, (k, v)) in metadata.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "'{}': '{}'", k, v)?;
            }
        }
        f.write_str("})")
    }
}

fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) / 1_000_000.0
}

fn write_opt<T: fmt::Display>(f: &mut fmt::Formatter<'_>, value: Option<&T>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{}", v),
        None => f.write_str("None"),
    }
}
