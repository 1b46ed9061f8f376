//! Serializer selection for node payloads.
//!
//! The codec is picked once when a node is built and every websocket frame
//! and REST body for that node goes through it.

use serde::{de::DeserializeOwned, Serialize};
use std::str::FromStr;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    /// `serde_json`, always available.
    #[default]
    Json,
    /// `simd-json`, enabled by the `simd` feature.
    #[cfg(feature = "simd")]
    Simd,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        match self {
            Codec::Json => Ok(serde_json::to_string(value)?),
            #[cfg(feature = "simd")]
            Codec::Simd => Ok(simd_json::serde::to_string(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        match self {
            Codec::Json => Ok(serde_json::from_str(text)?),
            #[cfg(feature = "simd")]
            Codec::Simd => {
                let mut bytes = text.as_bytes().to_vec();
                Ok(simd_json::serde::from_slice(&mut bytes)?)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Json => "json",
            #[cfg(feature = "simd")]
            Codec::Simd => "simd",
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "json" => Ok(Codec::Json),
            #[cfg(feature = "simd")]
            "simd" => Ok(Codec::Simd),
            other => Err(Error::Config(format!("unknown codec: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        op: String,
        value: u32,
    }

    #[test]
    fn json_codec_handles_payloads() {
        let codec = Codec::Json;
        let text = codec
            .encode(&Probe {
                op: "stats".into(),
                value: 3,
            })
            .unwrap();
        assert_eq!(text, r#"{"op":"stats","value":3}"#);

        let back: Probe = codec.decode(r#"{"value": 7, "op": "ready"}"#).unwrap();
        assert_eq!(back.value, 7);
    }

    #[test]
    fn parses_codec_names() {
        assert_eq!("JSON".parse::<Codec>().unwrap(), Codec::Json);
        assert_eq!("".parse::<Codec>().unwrap(), Codec::Json);
        assert!("msgpack".parse::<Codec>().is_err());
    }
}
