// Identifier normalization
// Converts opaque id strings into the representation each backend expects

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use crate::{Result, StoreError};

/// Namespace used to derive vector point ids from document ids
const POINT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a9e_43b7_4d0a_9b5e_2c8d_71e4_a3f6);

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Whether a backend stores documents or vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendRole {
    Document,
    Vector,
}

/// Every database product the storage layer can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    DocSqlite,
    DocMongo,
    DocCosmos,
    VectorLance,
    VectorQdrant,
    VectorPgvector,
    VectorOracle,
}

impl BackendKind {
    pub const ALL: [BackendKind; 7] = [
        BackendKind::DocSqlite,
        BackendKind::DocMongo,
        BackendKind::DocCosmos,
        BackendKind::VectorLance,
        BackendKind::VectorQdrant,
        BackendKind::VectorPgvector,
        BackendKind::VectorOracle,
    ];

    #[inline]
    pub fn role(self) -> BackendRole {
        match self {
            BackendKind::DocSqlite | BackendKind::DocMongo | BackendKind::DocCosmos => {
                BackendRole::Document
            }
            BackendKind::VectorLance
            | BackendKind::VectorQdrant
            | BackendKind::VectorPgvector
            | BackendKind::VectorOracle => BackendRole::Vector,
        }
    }

    #[inline]
    pub fn id_format(self) -> IdFormat {
        match self {
            BackendKind::DocMongo => IdFormat::ObjectId,
            BackendKind::VectorOracle => IdFormat::Hex32,
            BackendKind::DocSqlite
            | BackendKind::DocCosmos
            | BackendKind::VectorLance
            | BackendKind::VectorQdrant
            | BackendKind::VectorPgvector => IdFormat::Uuid,
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::DocSqlite => "doc_sqlite",
            BackendKind::DocMongo => "doc_mongo",
            BackendKind::DocCosmos => "doc_cosmos",
            BackendKind::VectorLance => "vector_lance",
            BackendKind::VectorQdrant => "vector_qdrant",
            BackendKind::VectorPgvector => "vector_pgvector",
            BackendKind::VectorOracle => "vector_oracle",
        }
    }
}

impl fmt::Display for BackendKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| StoreError::UnsupportedBackend(s.to_string()))
    }
}

/// Textual identifier shape accepted by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdFormat {
    /// 32 uppercase hexadecimal characters (RAW(16) columns)
    Hex32,
    /// 24 hexadecimal characters (12-byte object ids)
    ObjectId,
    /// Any UUID, stored in canonical hyphenated lowercase form
    Uuid,
}

impl fmt::Display for IdFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IdFormat::Hex32 => write!(f, "hex32"),
            IdFormat::ObjectId => write!(f, "object-id"),
            IdFormat::Uuid => write!(f, "uuid"),
        }
    }
}

/// A normalized identifier, valid only for backends sharing its format
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordId {
    #[serde(skip)]
    format: IdFormat,
    value: String,
}

impl RecordId {
    /// Validate `raw` against `format` and return its canonical form
    pub fn parse(raw: &str, format: IdFormat) -> Result<Self> {
        let invalid = || StoreError::InvalidIdentifier {
            format,
            raw: raw.to_string(),
        };

        let value = match format {
            IdFormat::Hex32 => {
                let valid = raw.len() == 32
                    && raw
                        .bytes()
                        .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));
                if !valid {
                    return Err(invalid());
                }
                raw.to_string()
            }
            IdFormat::ObjectId => {
                if raw.len() != 24 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(invalid());
                }
                raw.to_ascii_lowercase()
            }
            IdFormat::Uuid => Uuid::parse_str(raw)
                .map_err(|_| invalid())?
                .hyphenated()
                .to_string(),
        };

        Ok(Self { format, value })
    }

    /// Create a fresh identifier in the given format
    pub fn generate(format: IdFormat) -> Self {
        let value = match format {
            IdFormat::Hex32 => Uuid::new_v4().simple().to_string().to_ascii_uppercase(),
            IdFormat::ObjectId => generate_object_id(),
            IdFormat::Uuid => Uuid::new_v4().hyphenated().to_string(),
        };
        Self { format, value }
    }

    /// Deterministically map `seed` to an identifier in a UUID-like format.
    ///
    /// Used to give a document's vector point a stable id on every vector
    /// backend, whatever format the document store uses. Object ids carry a
    /// timestamp and are never derived, so `ObjectId` yields `None`.
    pub fn derive(format: IdFormat, seed: &str) -> Option<Self> {
        let uuid = Uuid::new_v5(&POINT_ID_NAMESPACE, seed.as_bytes());
        let value = match format {
            IdFormat::Hex32 => uuid.simple().to_string().to_ascii_uppercase(),
            IdFormat::Uuid => uuid.hyphenated().to_string(),
            IdFormat::ObjectId => return None,
        };
        Some(Self { format, value })
    }

    #[inline]
    pub fn format(&self) -> IdFormat {
        self.format
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    #[inline]
    pub fn into_string(self) -> String {
        self.value
    }
}

impl fmt::Display for RecordId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Normalize `raw` into the identifier representation used by `backend`
#[inline]
pub fn normalize(raw: &str, backend: BackendKind) -> Result<RecordId> {
    RecordId::parse(raw, backend.id_format())
}

// 4-byte big-endian seconds, 5 random bytes, 3-byte counter
fn generate_object_id() -> String {
    let seconds = chrono::Utc::now().timestamp() as u32;
    let random = Uuid::new_v4();
    let counter = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&seconds.to_be_bytes());
    bytes[4..9].copy_from_slice(&random.as_bytes()[..5]);
    bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);

    let mut hex = String::with_capacity(24);
    for byte in bytes {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}
