use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct ArtifactHash {
    pub mode: String,
    pub raw_data: Vec<u8>,
}

impl ArtifactHash {
    pub fn from_hex(mode: &str, hex: &str) -> Result<ArtifactHash> {
        Ok(ArtifactHash {
            mode: mode.into(),
            raw_data: data_encoding::HEXLOWER_PERMISSIVE.decode(hex.as_bytes())?,
        })
    }

    pub fn hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.raw_data)
    }

    pub fn checker<'a, T: Write>(&'a self, inner: T) -> Result<HashChecker<'a, T>> {
        let algorithm = match self.mode.as_str() {
            "sha256" => &ring::digest::SHA256,
            _ => bail!("unknown hash algorithm {self.mode}"),
        };
        let state = ring::digest::Context::new(algorithm);
        Ok(HashChecker {
            inner,
            state,
            expected: self,
        })
    }
}

impl Display for ArtifactHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}={}",
            self.mode,
            data_encoding::HEXLOWER.encode(&self.raw_data),
        )
    }
}

impl TryFrom<&str> for ArtifactHash {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let (mode, hex) = value
            .split_once('=')
            .ok_or_else(|| anyhow!("expected 'mode=hexdigest', got {:?}", value))?;
        ArtifactHash::from_hex(mode, hex)
    }
}

try_from_str_boilerplate!(ArtifactHash);

pub struct HashChecker<'a, T: Write> {
    inner: T,
    state: ring::digest::Context,
    expected: &'a ArtifactHash,
}

impl<'a, T: Write> HashChecker<'a, T> {
    pub fn finish(self) -> Result<T> {
        let digest = self.state.finish();
        if &self.expected.raw_data != digest.as_ref() {
            bail!("hash mismatch: {:?} != {:?}", self.expected, digest);
        }
        Ok(self.inner)
    }
}

impl<'a, T: Write> Write for HashChecker<'a, T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(&buf)?;
        self.state.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
