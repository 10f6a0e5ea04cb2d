//! Real `StreamProber` backed by an `ffprobe` subprocess.
//!
//! Grounded on the teacher's `rustant-ml/src/zoo/download.rs`
//! (`tokio::process::Command::new(...).output().await`, checking
//! `output.status.success()` before trusting stdout) for the external
//! process invocation idiom.

use std::time::Duration;

use serde::Deserialize;

use super::{ProbeOutcome, StreamProber};

pub struct FfprobeStreamProber {
    binary: String,
}

impl Default for FfprobeStreamProber {
    fn default() -> Self {
        Self { binary: "ffprobe".into() }
    }
}

impl FfprobeStreamProber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    bit_rate: Option<String>,
}

#[async_trait::async_trait]
impl StreamProber for FfprobeStreamProber {
    async fn probe(&self, url: &str, bitrate_sample: Duration) -> Result<ProbeOutcome, String> {
        let output = tokio::process::Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name,width,height:format=bit_rate",
                "-of",
                "json",
                "-timeout",
                &(bitrate_sample.as_micros().max(1_000_000)).to_string(),
                url,
            ])
            .output()
            .await
            .map_err(|e| format!("failed to spawn ffprobe: {e}"))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }

        let parsed: FfprobeOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| format!("failed to parse ffprobe output: {e}"))?;

        let stream = parsed.streams.into_iter().next();
        let resolution = stream
            .as_ref()
            .and_then(|s| Some(format!("{}x{}", s.width?, s.height?)));
        let codec = stream.and_then(|s| s.codec_name);
        let bitrate = parsed.format.and_then(|f| f.bit_rate).and_then(|b| b.parse::<u64>().ok());

        Ok(ProbeOutcome { resolution, bitrate, codec })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_resolution_codec_and_bitrate() {
        let json = r#"{"streams":[{"codec_name":"h264","width":1920,"height":1080}],"format":{"bit_rate":"4000000"}}"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        let stream = parsed.streams.into_iter().next().unwrap();
        assert_eq!(stream.codec_name.as_deref(), Some("h264"));
        assert_eq!(parsed.format.unwrap().bit_rate.as_deref(), Some("4000000"));
    }

    #[test]
    fn test_missing_streams_array_defaults_empty() {
        let parsed: FfprobeOutput = serde_json::from_str("{}").unwrap();
        assert!(parsed.streams.is_empty());
    }
}
