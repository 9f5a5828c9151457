use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker recorded where an address or bay could not be determined.
pub const UNKNOWN: &str = "Unknown";

/// A bay number, or `Unknown` until it has been resolved on an enclosure.
/// Stored in the model as a string so that both forms share one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Bay {
    Known(u32),
    #[default]
    Unknown,
}

impl Bay {
    pub fn number(self) -> Option<u32> {
        match self {
            Bay::Known(n) => Some(n),
            Bay::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Bay::Known(_))
    }
}

impl From<Option<u32>> for Bay {
    fn from(bay: Option<u32>) -> Self {
        bay.map_or(Bay::Unknown, Bay::Known)
    }
}

impl fmt::Display for Bay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bay::Known(n) => write!(f, "{n}"),
            Bay::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for Bay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Bay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Bay::Known(n)),
            Raw::Text(s) if s == UNKNOWN => Ok(Bay::Unknown),
            Raw::Text(s) => s
                .parse()
                .map(Bay::Known)
                .map_err(|_| serde::de::Error::custom(format!("invalid bay '{s}'"))),
        }
    }
}

/// One blade being moved. The system name is the key of the model map and
/// is not repeated inside the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blade {
    #[serde(skip)]
    pub system: String,
    pub hostname: String,
    pub serial: String,
    pub src_ilo: String,
    pub dest_ilo: String,
    pub src_bay: Bay,
    pub dest_bay: Bay,
    pub ilo_user: Option<String>,
    #[serde(rename = "key")]
    pub ilo_key: Option<String>,
}

impl Blade {
    pub fn is_moving(&self) -> bool {
        self.src_ilo != self.dest_ilo
    }
}
