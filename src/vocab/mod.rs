mod artifact_formats;
mod artifact_hash;
mod artifact_name;
mod core_metadata;
mod extra;
mod package_name;
mod reqparse;
mod requirement;
mod rfc822ish;
mod specifier;
mod version;

// All this stuff is also re-exported from crate::prelude::*

pub use self::artifact_formats::{Artifact, ReadPlusSeek, Sdist, Wheel};
pub use self::artifact_hash::{ArtifactHash, HashChecker};
pub use self::artifact_name::{
    ArtifactName, ArtifactNameUnwrap, SdistFormat, SdistName, WheelName,
};
pub use self::core_metadata::WheelCoreMetadata;
pub use self::extra::Extra;
pub use self::package_name::PackageName;
pub use self::requirement::{
    marker, ParseExtra, PackageRequirement, PythonRequirement, Requirement,
    StandaloneMarkerExpr, UserRequirement,
};
pub use self::specifier::{CompareOp, Specifier, Specifiers};
pub use self::version::{Version, VERSION_INFINITY, VERSION_ZERO};
