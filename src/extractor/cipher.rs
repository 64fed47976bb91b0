//! Reversal of the signature transformation applied to page stream URLs

use crate::utils::error::{Result, TubeloaderError};
use async_trait::async_trait;
use std::str::FromStr;
use url::Url;

/// Pluggable strategy that turns a scrambled signature back into a valid one
#[async_trait]
pub trait SignatureDecipher: Send + Sync {
    fn id(&self) -> &'static str;

    async fn decipher(&self, signature: &str) -> Result<String>;
}

/// Default strategy: every ciphered stream is reported as unsupported
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedDecipher;

#[async_trait]
impl SignatureDecipher for UnsupportedDecipher {
    fn id(&self) -> &'static str {
        "unsupported"
    }

    async fn decipher(&self, _signature: &str) -> Result<String> {
        Err(TubeloaderError::CipherUnsupported(
            "no signature transform configured".to_string(),
        ))
    }
}

/// One primitive of the classic player transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOp {
    Reverse,
    /// Drop the first `n` characters
    Splice(usize),
    /// Swap the first character with the one at `n % len`
    Swap(usize),
}

impl CipherOp {
    fn apply(self, chars: &mut Vec<char>) {
        match self {
            CipherOp::Reverse => chars.reverse(),
            CipherOp::Splice(n) => {
                chars.drain(..n.min(chars.len()));
            }
            CipherOp::Swap(n) => {
                if !chars.is_empty() {
                    let idx = n % chars.len();
                    chars.swap(0, idx);
                }
            }
        }
    }
}

/// A configured sequence of primitives, e.g. `"r,s2,w3"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformDecipher {
    ops: Vec<CipherOp>,
}

impl TransformDecipher {
    pub fn new(ops: Vec<CipherOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[CipherOp] {
        &self.ops
    }

    pub fn apply(&self, signature: &str) -> String {
        let mut chars: Vec<char> = signature.chars().collect();
        for op in &self.ops {
            op.apply(&mut chars);
        }
        chars.into_iter().collect()
    }
}

impl FromStr for TransformDecipher {
    type Err = TubeloaderError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |token: &str| {
            TubeloaderError::Configuration(format!("invalid cipher operation '{}' in '{}'", token, s))
        };

        let mut ops = Vec::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut chars = token.chars();
            let head = chars.next();
            let arg = chars.as_str();
            let op = match head {
                Some('r') if arg.is_empty() => CipherOp::Reverse,
                Some('s') => CipherOp::Splice(arg.parse().map_err(|_| invalid(token))?),
                Some('w') => CipherOp::Swap(arg.parse().map_err(|_| invalid(token))?),
                _ => return Err(invalid(token)),
            };
            ops.push(op);
        }

        if ops.is_empty() {
            return Err(TubeloaderError::Configuration(
                "cipher operation list is empty".to_string(),
            ));
        }
        Ok(Self { ops })
    }
}

#[async_trait]
impl SignatureDecipher for TransformDecipher {
    fn id(&self) -> &'static str {
        "transform"
    }

    async fn decipher(&self, signature: &str) -> Result<String> {
        Ok(self.apply(signature))
    }
}

/// Parts of a `signatureCipher` query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipheredUrl {
    pub url: String,
    pub signature: String,
    /// Query parameter that carries the deciphered signature
    pub signature_param: String,
}

impl CipheredUrl {
    /// Parse `s=..&sp=..&url=..`
    pub fn parse(cipher: &str) -> Result<Self> {
        let mut url = None;
        let mut signature = None;
        let mut signature_param = None;

        for (key, value) in url::form_urlencoded::parse(cipher.as_bytes()) {
            match key.as_ref() {
                "url" => url = Some(value.into_owned()),
                "s" => signature = Some(value.into_owned()),
                "sp" => signature_param = Some(value.into_owned()),
                _ => {}
            }
        }

        match (url, signature) {
            (Some(url), Some(signature)) => Ok(Self {
                url,
                signature,
                signature_param: signature_param.unwrap_or_else(|| "signature".to_string()),
            }),
            _ => Err(TubeloaderError::Extraction(
                "signature cipher is missing 'url' or 's'".to_string(),
            )),
        }
    }

    /// Build the playable URL with the deciphered signature attached
    pub async fn resolve(&self, decipher: &dyn SignatureDecipher) -> Result<String> {
        let signature = decipher.decipher(&self.signature).await?;
        let mut url = Url::parse(&self.url)
            .map_err(|e| TubeloaderError::Extraction(format!("bad ciphered url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair(&self.signature_param, &signature);
        Ok(url.into())
    }
}

/// Build the configured decipher strategy
pub fn decipher_from_config(operations: Option<&str>) -> Result<Box<dyn SignatureDecipher>> {
    match operations {
        Some(ops) => Ok(Box::new(ops.parse::<TransformDecipher>()?)),
        None => Ok(Box::new(UnsupportedDecipher)),
    }
}
