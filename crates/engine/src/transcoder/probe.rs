use std::path::Path;

use rasbora_common::RasboraError;
use serde_json::Value;
use tokio::process::Command;

/// Parsed probe metadata. `duration_us` feeds the progress monitor's
/// percentage calculation; `raw` is threaded into the handler template
/// context unchanged (handlers may reference stream details the template
/// author cares about).
#[derive(Clone, Debug)]
pub struct ProbeInfo {
    pub duration_us: i64,
    pub raw: Value,
}

/// Run the configured probe executable against a staged input file and
/// parse its JSON report, mirroring `ffprobe.ProbeURL` in
/// `_readInputVideoInformation`.
pub async fn probe(probe_exe: &str, input_file: &Path) -> Result<ProbeInfo, RasboraError> {
    let output = Command::new(probe_exe)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(input_file)
        .output()
        .await?;

    if !output.status.success() {
        return Err(RasboraError::Probe(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<ProbeInfo, RasboraError> {
    let raw: Value = serde_json::from_slice(stdout)?;

    let duration_secs: f64 = raw
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| RasboraError::Probe("missing format.duration in probe output".into()))?;

    Ok(ProbeInfo {
        duration_us: (duration_secs * 1_000_000.0) as i64,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_seconds_into_microseconds() {
        let stdout = br#"{"format":{"duration":"12.500000"},"streams":[{"codec_type":"video"}]}"#;
        let info = parse_probe_output(stdout).unwrap();
        assert_eq!(info.duration_us, 12_500_000);
        assert_eq!(info.raw["streams"][0]["codec_type"], "video");
    }

    #[test]
    fn missing_duration_is_an_error() {
        let stdout = br#"{"format":{}}"#;
        let err = parse_probe_output(stdout).unwrap_err();
        assert!(matches!(err, RasboraError::Probe(_)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = parse_probe_output(b"not json").unwrap_err();
        assert!(matches!(err, RasboraError::Serialization(_)));
    }
}
