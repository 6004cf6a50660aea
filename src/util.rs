use std::io::{ErrorKind, Read};

/// Work around an annoyance in Rust's standard traits -- if you define
/// TryFrom<&str>, then you probably also want TryFrom<String> and FromStr,
/// and the implementation is trivial in terms of TryFrom<&str>. So this macro
/// just generates the boilerplate for you.
#[macro_export]
macro_rules! try_from_str_boilerplate {
    ($name:ident) => {
        impl std::convert::TryFrom<String> for $name {
            type Error = anyhow::Error;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                (&*s).try_into()
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.try_into()
            }
        }
    };
}

/// Retry a blocking syscall-wrapping closure if it fails with EINTR.
///
/// fs2's file-locking calls (and a few other blocking OS calls we make) don't retry
/// internally, so a stray signal during a resolve can otherwise bubble up as a spurious
/// error.
pub fn retry_interrupted<T, F>(mut f: F) -> std::io::Result<T>
where
    F: FnMut() -> std::io::Result<T>,
{
    loop {
        match f() {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Read a reader to exhaustion into a Vec. Small helper used anywhere we need to pull an
/// entire cache entry, zip member, or HTTP body into memory.
pub fn slurp<R: Read>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(buf)
}
