//! # Printer
//!
//! Renders readings as human readable lines, separated fields or JSON, and
//! pushes them to the configured sinks: stdout (or the logfile), one file
//! per meter, and the user's shell hooks. Every sink is best effort; a
//! failing sink is logged and the rest still run.

use crate::error::MetersError;
use crate::meters::{Meter, Reading};
use crate::telegram::{media_name, Telegram};
use crate::units::convert;
use serde_json::{json, Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// The output format selected for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Hr,
    Fields,
    Json,
}

/// What to do with an existing per-meter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeterFileAction {
    #[default]
    Overwrite,
    Append,
}

/// Output sink configuration.
#[derive(Default)]
pub struct Printer {
    pub format: OutputFormat,
    pub separator: char,
    pub meterfiles: Option<PathBuf>,
    pub meterfiles_action: MeterFileAction,
    pub logfile: Option<PathBuf>,
    /// Shell hooks run for every meter, before the meter's own hooks.
    pub shells: Vec<String>,
}

/// Strip float noise so canonical and converted values print cleanly.
fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

fn format_number(value: f64) -> String {
    format!("{:.3}", value)
}

fn timestamp_robot(meter: &Meter) -> String {
    meter
        .last_update()
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

fn timestamp_hr(meter: &Meter) -> String {
    meter
        .last_update()
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_default()
}

impl Printer {
    pub fn new(format: OutputFormat, separator: char) -> Printer {
        Printer {
            format,
            separator,
            ..Printer::default()
        }
    }

    /// Render and deliver one reading to every sink.
    pub fn print(&self, meter: &Meter, t: &Telegram, reading: &Reading) {
        let line = self.render(meter, t, reading);

        if let Err(e) = self.write_main(&line) {
            log::warn!("(printer) output failed: {e}");
        }
        if let Err(e) = self.write_meter_file(meter, &line) {
            log::warn!("(printer) meter file failed: {e}");
        }
        self.run_shells(meter, t, reading);
    }

    /// The line the selected format produces.
    pub fn render(&self, meter: &Meter, t: &Telegram, reading: &Reading) -> String {
        match self.format {
            OutputFormat::Hr => self.render_hr(meter, t, reading),
            OutputFormat::Fields => self.render_fields(meter, reading),
            OutputFormat::Json => self.render_json(meter, t, reading).to_string(),
        }
    }

    fn render_hr(&self, meter: &Meter, _t: &Telegram, reading: &Reading) -> String {
        let mut parts = vec![meter.info().name.clone(), meter.info().id.clone()];
        for field in &reading.numerics {
            parts.push(format!(
                "{} {}",
                format_number(round6(field.value)),
                field.unit.hr()
            ));
        }
        for field in &reading.texts {
            parts.push(field.value.clone());
        }
        parts.push(timestamp_hr(meter));
        parts.join("\t")
    }

    fn render_fields(&self, meter: &Meter, reading: &Reading) -> String {
        let mut parts = vec![meter.info().name.clone(), meter.info().id.clone()];
        for field in &reading.numerics {
            parts.push(format_number(round6(field.value)));
            for unit in meter.conversions() {
                if unit.quantity() == field.unit.quantity() && *unit != field.unit {
                    if let Ok(converted) = convert(field.value, field.unit, *unit) {
                        parts.push(format_number(round6(converted)));
                    }
                }
            }
        }
        for field in &reading.texts {
            parts.push(field.value.clone());
        }
        parts.push(timestamp_hr(meter));
        parts.join(&self.separator.to_string())
    }

    /// The JSON object with the fixed key set; conversion keys are added
    /// next to their canonical field.
    pub fn render_json(&self, meter: &Meter, t: &Telegram, reading: &Reading) -> Value {
        let mut object = Map::new();
        object.insert("media".to_string(), json!(media_name(t.media)));
        object.insert("meter".to_string(), json!(meter.info().family.name));
        object.insert("name".to_string(), json!(meter.info().name));
        object.insert("id".to_string(), json!(meter.info().id));

        for field in &reading.numerics {
            let key = format!("{}_{}", field.name, field.unit.suffix());
            object.insert(key, json!(round6(field.value)));
            for unit in meter.conversions() {
                if unit.quantity() == field.unit.quantity() && *unit != field.unit {
                    if let Ok(converted) = convert(field.value, field.unit, *unit) {
                        let key = format!("{}_{}", field.name, unit.suffix());
                        object.insert(key, json!(round6(converted)));
                    }
                }
            }
        }
        for field in &reading.texts {
            object.insert(field.name.to_string(), json!(field.value));
        }
        object.insert("timestamp".to_string(), json!(timestamp_robot(meter)));
        Value::Object(object)
    }

    /// The `METER_...` environment bag handed to shell hooks.
    pub fn env_bag(&self, meter: &Meter, t: &Telegram, reading: &Reading) -> Vec<(String, String)> {
        let mut envs = vec![
            (
                "METER_JSON".to_string(),
                self.render_json(meter, t, reading).to_string(),
            ),
            ("METER_TYPE".to_string(), meter.info().family.name.to_string()),
            ("METER_NAME".to_string(), meter.info().name.clone()),
            ("METER_ID".to_string(), meter.info().id.clone()),
            ("METER_MEDIA".to_string(), media_name(t.media).to_string()),
        ];
        for field in &reading.numerics {
            envs.push((
                format!(
                    "METER_{}",
                    format!("{}_{}", field.name, field.unit.suffix()).to_uppercase()
                ),
                round6(field.value).to_string(),
            ));
            for unit in meter.conversions() {
                if unit.quantity() == field.unit.quantity() && *unit != field.unit {
                    if let Ok(converted) = convert(field.value, field.unit, *unit) {
                        envs.push((
                            format!(
                                "METER_{}",
                                format!("{}_{}", field.name, unit.suffix()).to_uppercase()
                            ),
                            round6(converted).to_string(),
                        ));
                    }
                }
            }
        }
        for field in &reading.texts {
            envs.push((
                format!("METER_{}", field.name.to_uppercase()),
                field.value.clone(),
            ));
        }
        envs.push(("METER_TIMESTAMP".to_string(), timestamp_robot(meter)));
        envs
    }

    fn write_main(&self, line: &str) -> Result<(), MetersError> {
        match &self.logfile {
            Some(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| MetersError::OutputFailed(format!("{}: {e}", path.display())))?;
                writeln!(file, "{line}")
                    .map_err(|e| MetersError::OutputFailed(format!("{}: {e}", path.display())))
            }
            None => {
                let mut out = std::io::stdout();
                writeln!(out, "{line}")
                    .map_err(|e| MetersError::OutputFailed(format!("stdout: {e}")))
            }
        }
    }

    fn write_meter_file(&self, meter: &Meter, line: &str) -> Result<(), MetersError> {
        let Some(dir) = &self.meterfiles else {
            return Ok(());
        };
        let path = dir.join(&meter.info().name);
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        match self.meterfiles_action {
            MeterFileAction::Overwrite => options.truncate(true),
            MeterFileAction::Append => options.append(true),
        };
        let mut file = options
            .open(&path)
            .map_err(|e| MetersError::OutputFailed(format!("{}: {e}", path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| MetersError::OutputFailed(format!("{}: {e}", path.display())))
    }

    /// Run the global hooks, then the meter's own, each with the env bag.
    /// Hooks run synchronously: a slow hook blocks ingestion, so hooks
    /// should be short or detach themselves.
    fn run_shells(&self, meter: &Meter, t: &Telegram, reading: &Reading) {
        let cmdlines: Vec<&String> = self
            .shells
            .iter()
            .chain(meter.info().shells.iter())
            .collect();
        if cmdlines.is_empty() {
            return;
        }
        let envs = self.env_bag(meter, t, reading);
        for cmdline in cmdlines {
            let status = std::process::Command::new("/bin/sh")
                .arg("-c")
                .arg(cmdline)
                .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .status();
            match status {
                Ok(status) if !status.success() => {
                    log::warn!("(shell) \"{cmdline}\" exited with {status}");
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("(shell) could not run \"{cmdline}\": {e}");
                }
            }
        }
    }
}
