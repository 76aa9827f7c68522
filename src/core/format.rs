//! Format records as delivered by the player response

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One streaming format.
///
/// Only the URL-bearing fields are typed; everything else the player response
/// carries (itag, mimeType, bitrate, ...) is kept untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Direct, usable URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Query-string bundle of `url`, `s` and `sp`
    #[serde(
        default,
        rename = "signatureCipher",
        skip_serializing_if = "Option::is_none"
    )]
    pub signature_cipher: Option<String>,
    /// Older name of `signatureCipher`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FormatDescriptor {
    /// Format with a direct URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Format with a `signatureCipher` bundle
    pub fn with_signature_cipher(bundle: impl Into<String>) -> Self {
        Self {
            signature_cipher: Some(bundle.into()),
            ..Default::default()
        }
    }

    /// Non-empty direct URL
    pub fn direct_url(&self) -> Option<&str> {
        non_empty(&self.url)
    }

    /// Non-empty cipher bundle, `signatureCipher` taking precedence
    pub fn cipher_bundle(&self) -> Option<&str> {
        non_empty(&self.signature_cipher).or_else(|| non_empty(&self.cipher))
    }

    /// Whether the URL has to be deciphered first
    pub fn is_ciphered(&self) -> bool {
        self.direct_url().is_none() && self.cipher_bundle().is_some()
    }

    /// Itag from the untyped fields, when present
    pub fn itag(&self) -> Option<u64> {
        self.extra.get("itag").and_then(Value::as_u64)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}
