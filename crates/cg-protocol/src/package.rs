//! SDK distributions and version negotiation.

use std::fmt;
use std::str::FromStr;

use crate::frame::HeaderFormat;

/// Known SDK distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum SdkPackage {
    #[serde(rename = "compose-node")]
    Node,
    #[serde(rename = "compose-python")]
    Python,
}

impl SdkPackage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "compose-node",
            Self::Python => "compose-python",
        }
    }

    /// Oldest version the gateway accepts a connection from.
    pub const fn min_supported_version(self) -> Version {
        match self {
            Self::Node | Self::Python => Version::new(0, 19, 0),
        }
    }

    /// First version that sends and expects execution-id-bearing headers.
    pub const fn new_header_format_version(self) -> Version {
        match self {
            Self::Node | Self::Python => Version::new(0, 25, 8),
        }
    }

    /// Resolve the header format for a connection. Computed once at connect.
    pub fn header_format(self, version: &str) -> HeaderFormat {
        match meets_minimum_version(version, self.new_header_format_version()) {
            Ok(()) => HeaderFormat::WithExecutionId,
            Err(_) => HeaderFormat::Legacy,
        }
    }
}

impl fmt::Display for SdkPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown package name: {0}")]
pub struct UnknownPackage(pub String);

impl FromStr for SdkPackage {
    type Err = UnknownPackage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compose-node" => Ok(Self::Node),
            "compose-python" => Ok(Self::Python),
            other => Err(UnknownPackage(other.to_string())),
        }
    }
}

/// `major.minor.patch`, compared numerically component by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version: {0:?}")]
pub struct InvalidVersion(pub String);

impl FromStr for Version {
    type Err = InvalidVersion;

    /// Missing trailing components count as zero; components past the
    /// third are ignored but must still be numeric.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersion(s.to_string());
        if s.trim().is_empty() {
            return Err(invalid());
        }

        let mut parts = [0u64; 3];
        for (i, raw) in s.split('.').enumerate() {
            let n: u64 = raw.trim().parse().map_err(|_| invalid())?;
            if let Some(slot) = parts.get_mut(i) {
                *slot = n;
            }
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("Package version is missing.")]
    Missing,

    #[error(
        "Unsupported package version. Minimum supported version is {minimum}. \
         Please upgrade your package to continue using Compose."
    )]
    Unsupported { minimum: Version },
}

/// Check `version` against `minimum`. A malformed version is unsupported,
/// never a panic.
pub fn meets_minimum_version(version: &str, minimum: Version) -> Result<(), VersionError> {
    if version.is_empty() {
        return Err(VersionError::Missing);
    }

    match version.parse::<Version>() {
        Ok(v) if v >= minimum => Ok(()),
        _ => Err(VersionError::Unsupported { minimum }),
    }
}
