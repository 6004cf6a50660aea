pub use std::collections::{HashMap, HashSet};
pub use std::convert::{TryFrom, TryInto};
pub use std::fmt::Display;
pub use std::io::{Read, Seek, Write};
pub use std::rc::Rc;
pub use std::str::FromStr;

// Internal, single-purpose fallible functions return plain `anyhow::Error` (or one of
// the typed errors in `crate::error`); only the outermost per-platform resolve entry
// points deal in `eyre::Report`, so that a failure three layers deep in a build-env
// closure still prints with the full `context!` chain attached. See `src/output.rs`.
pub use anyhow::{anyhow, bail, Context as _, Result};
pub use derivative::Derivative;
pub use once_cell::sync::Lazy;
pub use regex::Regex;
pub use serde::{Deserialize, Serialize};
pub use serde_with::{DeserializeFromStr, SerializeDisplay};
pub use tracing::{debug, error, info, trace, warn};
pub use url::Url;

pub use crate::context;
pub use crate::try_from_str_boilerplate;
pub use crate::util::slurp;
pub use crate::vocab::*;

use directories::ProjectDirs;
pub static PROJECT_DIRS: Lazy<ProjectDirs> = Lazy::new(|| {
    ProjectDirs::from("", "", env!("CARGO_PKG_NAME")).expect(
        "couldn't determine a home directory for nixpy's caches; \
         set NIXPY_CACHE_DIR or HOME",
    )
});
