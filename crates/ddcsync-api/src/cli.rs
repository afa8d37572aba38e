//! `ddcutil` command-line backend.
//!
//! Used when no D-Bus service answers but the `ddcutil` binary is
//! installed. Every call spawns one process with a deadline. JSON output is
//! tried first where `ddcutil` builds support it; otherwise the plain-text
//! output is parsed.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use crate::error::Error;
use crate::flags::CallFlags;
use crate::reply::{self, Reply};
use crate::types::{DisplayAddress, DisplayRecord, FeatureMetadata, Reading, WireFeature};

static DISPLAY_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Display\s+(\d+)").expect("valid regex"));
static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+([A-Za-z0-9 ]+?):\s*(.*?)\s*$").expect("valid regex"));
static BUS_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"i2c-(\d+)").expect("valid regex"));
static CONTINUOUS_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"current value\s*=\s*(\d+),\s*max value\s*=\s*(\d+)").expect("valid regex")
});
static SIMPLE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(sl=0x([0-9A-Fa-f]+)\)").expect("valid regex"));
static FEATURE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Feature:\s*([0-9A-Fa-f]{2})\b(?:\s*\(([^)]*)\))?").expect("valid regex")
});
static CHOICE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+([0-9A-Fa-f]{2}):\s*(.+?)\s*$").expect("valid regex"));
static CAPABILITIES_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)capabilities string:\s*(\(.*\))\s*$").expect("valid regex")
});

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub program: String,
    pub timeout: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            program: "ddcutil".into(),
            timeout: Duration::from_secs(5),
        }
    }
}

// ── CliClient ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CliClient {
    program: String,
    timeout: Duration,
}

impl CliClient {
    pub fn new(config: &CliConfig) -> Self {
        Self {
            program: config.program.clone(),
            timeout: config.timeout,
        }
    }

    /// Check the binary runs at all. Returns its version line.
    pub async fn probe(&self) -> Result<String, Error> {
        let out = self.run(&["--version".to_owned()]).await?;
        Ok(out.lines().next().unwrap_or_default().trim().to_owned())
    }

    pub async fn detect(&self) -> Result<Vec<DisplayRecord>, Error> {
        let json = self.run(&args(["detect", "--json"])).await.and_then(|out| parse_json(&out));
        match json {
            Ok(body) => reply::decode_displays(body),
            Err(e) => {
                tracing::debug!(error = %e, "falling back to text detection");
                let out = self.run(&args(["detect", "--brief", "--terse"])).await?;
                Ok(parse_detect_text(&out))
            }
        }
    }

    pub async fn read_value(
        &self,
        display: &DisplayAddress,
        code: u8,
    ) -> Result<Reading, Error> {
        let mut base = display_args(display);
        base.extend(args(["getvcp", &format!("0x{code:02x}")]));

        let mut json_args = base.clone();
        json_args.push("--json".into());
        let json = self.run(&json_args).await.and_then(|out| parse_json(&out));
        match json.and_then(reply::decode_reading) {
            Ok(reading) => Ok(reading),
            Err(e) => {
                tracing::debug!(error = %e, code, "falling back to text getvcp parsing");
                let out = self.run(&base).await?;
                parse_getvcp_text(&out)
                    .ok_or_else(|| Error::ReplyShape(format!("unparseable getvcp output: {out}")))
            }
        }
    }

    pub async fn write_value(
        &self,
        display: &DisplayAddress,
        code: u8,
        value: u16,
        flags: CallFlags,
    ) -> Result<(), Error> {
        let mut argv = display_args(display);
        argv.extend(args(["setvcp", &format!("0x{code:02x}"), &value.to_string()]));
        if flags.contains(CallFlags::NO_VERIFY) {
            argv.push("--noverify".into());
        }
        self.run(&argv).await.map(|_| ())
    }

    pub async fn list_features(&self, display: &DisplayAddress) -> Result<Vec<WireFeature>, Error> {
        let mut argv = display_args(display);
        argv.extend(args(["capabilities", "--terse"]));
        let out = self.run(&argv).await?;
        Ok(parse_capabilities_text(&out))
    }

    /// The unparsed capabilities string, from `capabilities --verbose`.
    pub async fn capabilities_string(&self, display: &DisplayAddress) -> Result<String, Error> {
        let mut argv = display_args(display);
        argv.extend(args(["capabilities", "--verbose"]));
        let out = self.run(&argv).await?;
        parse_capabilities_string(&out)
            .ok_or_else(|| Error::ReplyShape("no capabilities string in output".into()))
    }

    /// Metadata of one feature as listed by `capabilities --terse`.
    pub async fn feature_metadata(
        &self,
        display: &DisplayAddress,
        code: u8,
    ) -> Result<FeatureMetadata, Error> {
        self.list_features(display)
            .await?
            .into_iter()
            .find(|f| f.code == code)
            .map(|f| f.metadata.unwrap_or_default())
            .ok_or(Error::UnsupportedFeature(code))
    }

    /// Properties describing the helper program.
    pub async fn properties(&self) -> Result<BTreeMap<String, serde_json::Value>, Error> {
        let version = self.probe().await?;
        Ok(BTreeMap::from([
            ("Program".to_owned(), serde_json::json!(self.program)),
            ("DdcutilVersion".to_owned(), serde_json::json!(version)),
        ]))
    }

    async fn run(&self, argv: &[String]) -> Result<String, Error> {
        let command_line = format!("{} {}", self.program, argv.join(" "));
        tracing::debug!(command = %command_line, "running");

        let mut cmd = Command::new(&self.program);
        cmd.args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("ddcutil failed")
                .to_owned();
            return Err(Error::Command {
                command: command_line,
                message,
            });
        }
        Ok(stdout)
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

/// Prefer `--bus N`, else `--display N`.
fn display_args(display: &DisplayAddress) -> Vec<String> {
    match &display.bus {
        Some(bus) => args(["--bus", bus.as_str()]),
        None => vec!["--display".into(), display.display_number.to_string()],
    }
}

fn parse_json(out: &str) -> Result<Reply, Error> {
    serde_json::from_str::<serde_json::Value>(out)
        .map(Reply::from)
        .map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: out.to_owned(),
        })
}

// ── Text parsing ─────────────────────────────────────────────────────

/// Parse `ddcutil detect --brief --terse` output.
pub fn parse_detect_text(out: &str) -> Vec<DisplayRecord> {
    let mut displays = Vec::new();
    let mut current: Option<DisplayRecord> = None;

    for line in out.lines() {
        if let Some(caps) = DISPLAY_HEADER.captures(line) {
            displays.extend(current.take().map(finish_display));
            let number = caps[1].parse().unwrap_or(0);
            current = Some(DisplayRecord {
                display_number: number,
                edid: String::new(),
                manufacturer: None,
                model: None,
                serial: None,
                bus: None,
                address: None,
                attributes: BTreeMap::new(),
            });
            continue;
        }
        // Lines outside a `Display N` block (e.g. "Invalid display") are ignored.
        let Some(display) = current.as_mut() else {
            continue;
        };
        let Some(caps) = KEY_VALUE.captures(line) else {
            continue;
        };
        let key = caps[1].trim().to_lowercase();
        let value = caps[2].to_owned();
        match key.as_str() {
            "i2c bus" | "bus" => {
                display.bus = BUS_NUMBER
                    .captures(&value)
                    .map_or_else(|| Some(value.clone()), |c| Some(c[1].to_owned()));
            }
            // "Monitor: MFG:MODEL:SERIAL"
            "monitor" => {
                let mut parts = value.splitn(3, ':');
                display.manufacturer = non_empty(parts.next());
                display.model = non_empty(parts.next());
                display.serial = non_empty(parts.next());
            }
            "mfg id" | "mfg" | "manufacturer" => display.manufacturer = non_empty(Some(&value)),
            "model" => display.model = non_empty(Some(&value)),
            "serial number" | "sn" => display.serial = non_empty(Some(&value)),
            _ => {}
        }
        display
            .attributes
            .insert(key, serde_json::Value::String(value));
    }
    displays.extend(current.take().map(finish_display));
    displays
}

fn finish_display(mut display: DisplayRecord) -> DisplayRecord {
    display.edid = reply::synthetic_edid(
        display.display_number,
        display.model.as_deref(),
        display.serial.as_deref(),
        display.bus.as_deref(),
    );
    display
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

/// Parse plain `getvcp` output. Continuous features report
/// `current value = N, max value = M`; non-continuous ones report
/// `(sl=0xNN)` and no maximum.
pub fn parse_getvcp_text(out: &str) -> Option<Reading> {
    if let Some(caps) = CONTINUOUS_VALUE.captures(out) {
        let current = caps[1].parse().ok()?;
        let maximum = caps[2].parse().ok()?;
        return Some(Reading::new(current, Some(maximum)));
    }
    let caps = SIMPLE_VALUE.captures(out)?;
    let current = u16::from_str_radix(&caps[1], 16).ok()?;
    Some(Reading::new(current, None))
}

/// Extract the raw `(prot(..)..)` string from verbose capabilities output.
pub fn parse_capabilities_string(out: &str) -> Option<String> {
    CAPABILITIES_STRING
        .captures(out)
        .map(|caps| caps[1].to_owned())
}

/// Parse `capabilities --terse` output: `Feature: XX (Name)` lines,
/// optionally followed by `NN: label` choice lines.
pub fn parse_capabilities_text(out: &str) -> Vec<WireFeature> {
    let mut features: Vec<WireFeature> = Vec::new();
    for line in out.lines() {
        if let Some(caps) = FEATURE_LINE.captures(line) {
            let Ok(code) = u8::from_str_radix(&caps[1], 16) else {
                continue;
            };
            let name = caps.get(2).map(|m| m.as_str().trim().to_owned());
            features.push(WireFeature {
                code,
                metadata: name.map(|name| FeatureMetadata {
                    name: Some(name),
                    ..FeatureMetadata::default()
                }),
            });
            continue;
        }
        let Some(caps) = CHOICE_LINE.captures(line) else {
            continue;
        };
        let (Some(feature), Ok(value)) = (features.last_mut(), u16::from_str_radix(&caps[1], 16))
        else {
            continue;
        };
        feature
            .metadata
            .get_or_insert_with(FeatureMetadata::default)
            .choices
            .insert(value, caps[2].to_owned());
    }
    features
}
