//! # Configuration
//!
//! Command line parsing, the `--useconfig` directory format and the meter
//! quadruples. Everything resolves into one immutable [`Configuration`]
//! before the event loop starts.
//!
//! A config directory mirrors the command line: `DIR/etc/wmbusmeters.conf`
//! holds `key=value` lines whose keys are the long option names, and every
//! file in `DIR/etc/wmbusmeters.d/` configures one meter with `name=`,
//! `type=`, `id=`, `key=` and optional `shell=` lines.

use crate::device::DeviceSpec;
use crate::error::MetersError;
use crate::link_mode::LinkModeSet;
use crate::logging::Verbosity;
use crate::meters::{family_by_name, MeterInfo};
use crate::printer::{MeterFileAction, OutputFormat};
use crate::telegram::crypto::AesKey;
use crate::units::Unit;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ABOUT: &str = "Receives wireless M-Bus telegrams from utility meters \
and prints the readings as human readable text, fields or JSON.";

const AFTER_HELP: &str = "\
As DEVICE you can use: auto, a /dev/ttyUSB* path, rtlwmbus, rtlwmbus:FREQ,
rtlwmbus:COMMANDLINE, or a simulation_*.txt replay file.

Meters are configured as quadruples: NAME TYPE[:MODES] ID KEY
where KEY is 32 hex characters, or \"\" for unencrypted meters.

Supported meter types:
  water:       multical21 flowiq3100 supercom587 iperl mkradio3 apator162
  heat:        vario451 multical302
  electricity: omnipower amiplus
  heat cost:   qcaloric eurisii";

#[derive(Parser, Debug, Default)]
#[command(name = "wmbusmeters", version, about = ABOUT, after_help = AFTER_HELP)]
pub struct Cli {
    /// Print the license and exit
    #[arg(long)]
    pub license: bool,

    /// Run as a daemon (reads meters from the config files)
    #[arg(long)]
    pub daemon: bool,

    /// Load configuration from this directory
    #[arg(long, value_name = "DIR")]
    pub useconfig: Option<PathBuf>,

    /// Write the process id to this file before the loop starts
    #[arg(long, value_name = "PATH")]
    pub pidfile: Option<PathBuf>,

    /// Append output and log lines to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    pub logfile: Option<PathBuf>,

    /// Log every received telegram as a replayable simulation line
    #[arg(long)]
    pub logtelegrams: bool,

    /// A lot of information
    #[arg(long)]
    pub debug: bool,

    /// More information
    #[arg(long)]
    pub verbose: bool,

    /// Errors only
    #[arg(long)]
    pub silent: bool,

    /// Wait for one update from each meter, then exit
    #[arg(long)]
    pub oneshot: bool,

    /// Exit after this long, e.g. 20h, 10m or 5s
    #[arg(long, value_name = "DURATION")]
    pub exitafter: Option<String>,

    /// Output format: hr, fields or json
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Field separator for the fields format
    #[arg(long, value_name = "CHAR")]
    pub separator: Option<char>,

    /// Store meter readings in this directory
    #[arg(long, value_name = "DIR")]
    pub meterfiles: Option<PathBuf>,

    /// overwrite or append to the meter reading files
    #[arg(long, value_name = "ACTION")]
    pub meterfilesaction: Option<String>,

    /// Invoke this command for each reading, with METER_... variables set
    #[arg(long = "shell", value_name = "CMDLINE")]
    pub shells: Vec<String>,

    /// List the environment variables available to shell hooks and exit
    #[arg(long)]
    pub shellenvs: bool,

    /// Add conversions to these units to json and shell environments
    #[arg(long = "addconversion", value_name = "UNIT", value_delimiter = ',')]
    pub addconversions: Vec<String>,

    /// Listen to these link modes, e.g. c1,t1
    #[arg(long, value_name = "MODE")]
    pub listento: Option<String>,

    #[arg(long)]
    pub c1: bool,
    #[arg(long)]
    pub t1: bool,
    #[arg(long)]
    pub s1: bool,
    #[arg(long)]
    pub s1m: bool,
    #[arg(long)]
    pub n1a: bool,
    #[arg(long)]
    pub n1b: bool,
    #[arg(long)]
    pub n1c: bool,
    #[arg(long)]
    pub n1d: bool,
    #[arg(long)]
    pub n1e: bool,
    #[arg(long)]
    pub n1f: bool,

    #[arg(value_name = "DEVICE")]
    pub device: Option<String>,

    /// NAME TYPE[:MODES] ID KEY, repeated
    #[arg(value_name = "METER", num_args = 0..)]
    pub meter_args: Vec<String>,
}

/// The resolved, immutable run configuration.
pub struct Configuration {
    pub daemon: bool,
    pub pidfile: Option<PathBuf>,
    pub logfile: Option<PathBuf>,
    pub logtelegrams: bool,
    pub verbosity: Verbosity,
    pub oneshot: bool,
    pub exit_after: Option<Duration>,
    pub format: OutputFormat,
    pub separator: char,
    pub meterfiles: Option<PathBuf>,
    pub meterfiles_action: MeterFileAction,
    pub shells: Vec<String>,
    pub shellenvs: bool,
    pub conversions: Vec<Unit>,
    /// Modes explicitly requested with --listento and the shorthand flags.
    pub listento: LinkModeSet,
    pub device: DeviceSpec,
    pub meters: Vec<MeterInfo>,
}

/// Parse a duration of the form `20h`, `10m`, `5s` or `1h30m`.
pub fn parse_duration(s: &str) -> Result<Duration, MetersError> {
    let mut total = 0u64;
    let mut digits = String::new();
    let mut seen_any = false;
    for c in s.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| MetersError::ConfigInvalid(format!("bad duration \"{s}\"")))?;
        digits.clear();
        seen_any = true;
        total += match c {
            's' => value,
            'm' => value * 60,
            'h' => value * 3600,
            _ => {
                return Err(MetersError::ConfigInvalid(format!(
                    "bad duration suffix '{c}' in \"{s}\""
                )))
            }
        };
    }
    if !digits.is_empty() {
        // A bare number counts as seconds
        total += digits
            .parse::<u64>()
            .map_err(|_| MetersError::ConfigInvalid(format!("bad duration \"{s}\"")))?;
        seen_any = true;
    }
    if !seen_any || total == 0 {
        return Err(MetersError::ConfigInvalid(format!("bad duration \"{s}\"")));
    }
    Ok(Duration::from_secs(total))
}

/// Build one MeterInfo from a NAME TYPE[:MODES] ID KEY quadruple.
pub fn parse_meter_quadruple(
    name: &str,
    family_and_modes: &str,
    id: &str,
    key: &str,
) -> Result<MeterInfo, MetersError> {
    let (family_name, modes) = match family_and_modes.split_once(':') {
        Some((family, modes)) => {
            let set = LinkModeSet::parse(modes).ok_or_else(|| {
                MetersError::ConfigInvalid(format!("unknown link modes \"{modes}\""))
            })?;
            (family, set)
        }
        None => (family_and_modes, LinkModeSet::empty()),
    };

    let family = family_by_name(family_name)
        .ok_or_else(|| MetersError::ConfigInvalid(format!("no such meter type \"{family_name}\"")))?;

    if id.len() != 8 || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(MetersError::ConfigInvalid(format!(
            "meter id \"{id}\" must be 8 decimal digits"
        )));
    }

    let key = if key.is_empty() {
        None
    } else {
        if key.len() != 32 {
            return Err(MetersError::ConfigInvalid(format!(
                "meter key must be 32 hex characters, got {}",
                key.len()
            )));
        }
        Some(
            AesKey::from_hex(key)
                .map_err(|e| MetersError::ConfigInvalid(format!("bad meter key: {e}")))?,
        )
    };

    Ok(MeterInfo {
        name: name.to_string(),
        family,
        id: id.to_string(),
        key,
        expected_link_modes: modes,
        shells: Vec::new(),
    })
}

fn parse_meter_args(args: &[String]) -> Result<Vec<MeterInfo>, MetersError> {
    if args.len() % 4 != 0 {
        return Err(MetersError::ConfigInvalid(format!(
            "meters are specified as quadruples NAME TYPE ID KEY, got {} trailing arguments",
            args.len()
        )));
    }
    args.chunks(4)
        .map(|q| parse_meter_quadruple(&q[0], &q[1], &q[2], &q[3]))
        .collect()
}

fn parse_format(s: &str) -> Result<OutputFormat, MetersError> {
    match s {
        "hr" => Ok(OutputFormat::Hr),
        "fields" => Ok(OutputFormat::Fields),
        "json" => Ok(OutputFormat::Json),
        _ => Err(MetersError::ConfigInvalid(format!(
            "unknown format \"{s}\", expected hr, fields or json"
        ))),
    }
}

fn parse_meterfiles_action(s: &str) -> Result<MeterFileAction, MetersError> {
    match s {
        "overwrite" => Ok(MeterFileAction::Overwrite),
        "append" => Ok(MeterFileAction::Append),
        _ => Err(MetersError::ConfigInvalid(format!(
            "unknown meterfilesaction \"{s}\", expected overwrite or append"
        ))),
    }
}

fn shorthand_modes(cli: &Cli) -> LinkModeSet {
    let flags = [
        (cli.c1, LinkModeSet::C1),
        (cli.t1, LinkModeSet::T1),
        (cli.s1, LinkModeSet::S1),
        (cli.s1m, LinkModeSet::S1M),
        (cli.n1a, LinkModeSet::N1A),
        (cli.n1b, LinkModeSet::N1B),
        (cli.n1c, LinkModeSet::N1C),
        (cli.n1d, LinkModeSet::N1D),
        (cli.n1e, LinkModeSet::N1E),
        (cli.n1f, LinkModeSet::N1F),
    ];
    let mut set = LinkModeSet::empty();
    for (enabled, mode) in flags {
        if enabled {
            set |= mode;
        }
    }
    set
}

impl Configuration {
    /// Resolve the command line (and, with `--useconfig`, the config
    /// directory) into a run configuration.
    pub fn from_cli(cli: &Cli) -> Result<Configuration, MetersError> {
        let mut listento = match &cli.listento {
            Some(s) => LinkModeSet::parse(s).ok_or_else(|| {
                MetersError::ConfigInvalid(format!("unknown link modes \"{s}\""))
            })?,
            None => LinkModeSet::empty(),
        };
        listento |= shorthand_modes(cli);

        let mut config = Configuration {
            daemon: cli.daemon,
            pidfile: cli.pidfile.clone(),
            logfile: cli.logfile.clone(),
            logtelegrams: cli.logtelegrams,
            verbosity: if cli.debug {
                Verbosity::Debug
            } else if cli.verbose {
                Verbosity::Verbose
            } else if cli.silent {
                Verbosity::Silent
            } else {
                Verbosity::Normal
            },
            oneshot: cli.oneshot,
            exit_after: match &cli.exitafter {
                Some(s) => Some(parse_duration(s)?),
                None => None,
            },
            format: match &cli.format {
                Some(s) => parse_format(s)?,
                None => OutputFormat::Hr,
            },
            separator: cli.separator.unwrap_or(';'),
            meterfiles: cli.meterfiles.clone(),
            meterfiles_action: match &cli.meterfilesaction {
                Some(s) => parse_meterfiles_action(s)?,
                None => MeterFileAction::Overwrite,
            },
            shells: cli.shells.clone(),
            shellenvs: cli.shellenvs,
            conversions: cli
                .addconversions
                .iter()
                .map(|s| Unit::parse(s).map_err(|e| MetersError::ConfigInvalid(e.to_string())))
                .collect::<Result<Vec<_>, _>>()?,
            listento,
            device: DeviceSpec::Auto,
            meters: Vec::new(),
        };

        if let Some(dir) = &cli.useconfig {
            config.load_config_dir(dir)?;
        } else {
            let device = cli.device.as_deref().ok_or_else(|| {
                MetersError::ConfigInvalid("no device given, try --help".to_string())
            })?;
            config.device = DeviceSpec::parse(device);
            config.meters = parse_meter_args(&cli.meter_args)?;
        }

        Ok(config)
    }

    /// The link modes the dongle must hear: every meter's family default
    /// and expectation, plus the explicitly requested ones.
    pub fn listen_modes(&self) -> LinkModeSet {
        let mut modes = self.listento;
        for meter in &self.meters {
            modes |= meter.listen_modes();
        }
        if modes.is_empty() {
            // Nothing configured; T1 hears the majority of meters
            modes = LinkModeSet::T1;
        }
        modes
    }

    fn load_config_dir(&mut self, dir: &Path) -> Result<(), MetersError> {
        let conf = dir.join("etc/wmbusmeters.conf");
        let content = std::fs::read_to_string(&conf)
            .map_err(|e| MetersError::ConfigInvalid(format!("{}: {e}", conf.display())))?;
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (keyword, value) = line.split_once('=').ok_or_else(|| {
                MetersError::ConfigInvalid(format!("{}:{} expected key=value", conf.display(), lineno + 1))
            })?;
            self.apply_config_line(keyword.trim(), value.trim())?;
        }

        let meter_dir = dir.join("etc/wmbusmeters.d");
        if meter_dir.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&meter_dir)
                .map_err(|e| MetersError::ConfigInvalid(format!("{}: {e}", meter_dir.display())))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            for path in entries {
                let info = load_meter_file(&path)?;
                self.meters.push(info);
            }
        }
        Ok(())
    }

    fn apply_config_line(&mut self, keyword: &str, value: &str) -> Result<(), MetersError> {
        match keyword {
            "device" => self.device = DeviceSpec::parse(value),
            "format" => self.format = parse_format(value)?,
            "separator" => {
                let mut chars = value.chars();
                self.separator = chars.next().ok_or_else(|| {
                    MetersError::ConfigInvalid("empty separator".to_string())
                })?;
            }
            "listento" => {
                self.listento |= LinkModeSet::parse(value).ok_or_else(|| {
                    MetersError::ConfigInvalid(format!("unknown link modes \"{value}\""))
                })?;
            }
            "meterfiles" => self.meterfiles = Some(PathBuf::from(value)),
            "meterfilesaction" => self.meterfiles_action = parse_meterfiles_action(value)?,
            "logfile" => self.logfile = Some(PathBuf::from(value)),
            "logtelegrams" => self.logtelegrams = value == "true",
            "debug" => {
                if value == "true" {
                    self.verbosity = Verbosity::Debug;
                }
            }
            "verbose" => {
                if value == "true" && self.verbosity != Verbosity::Debug {
                    self.verbosity = Verbosity::Verbose;
                }
            }
            "silent" => {
                if value == "true" {
                    self.verbosity = Verbosity::Silent;
                }
            }
            "oneshot" => self.oneshot = value == "true",
            "exitafter" => self.exit_after = Some(parse_duration(value)?),
            "shell" => self.shells.push(value.to_string()),
            "addconversion" => {
                for unit in value.split(',') {
                    self.conversions.push(
                        Unit::parse(unit.trim())
                            .map_err(|e| MetersError::ConfigInvalid(e.to_string()))?,
                    );
                }
            }
            other => {
                return Err(MetersError::ConfigInvalid(format!(
                    "unknown configuration key \"{other}\""
                )))
            }
        }
        Ok(())
    }
}

fn load_meter_file(path: &Path) -> Result<MeterInfo, MetersError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| MetersError::ConfigInvalid(format!("{}: {e}", path.display())))?;
    let mut name = None;
    let mut family = None;
    let mut id = None;
    let mut key = String::new();
    let mut shells = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((keyword, value)) = line.split_once('=') else {
            continue;
        };
        match keyword.trim() {
            "name" => name = Some(value.trim().to_string()),
            "type" => family = Some(value.trim().to_string()),
            "id" => id = Some(value.trim().to_string()),
            "key" => key = value.trim().to_string(),
            "shell" => shells.push(value.trim().to_string()),
            _ => {}
        }
    }

    let (name, family, id) = match (name, family, id) {
        (Some(n), Some(f), Some(i)) => (n, f, i),
        _ => {
            return Err(MetersError::ConfigInvalid(format!(
                "{} must set name, type and id",
                path.display()
            )))
        }
    };

    let mut info = parse_meter_quadruple(&name, &family, &id, &key)?;
    info.shells = shells;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("wmbusmeters").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("20h").unwrap(), Duration::from_secs(72000));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn test_meter_quadruple() {
        let info = parse_meter_quadruple("mywater", "multical21", "76348799", "").unwrap();
        assert_eq!(info.name, "mywater");
        assert_eq!(info.family.name, "multical21");
        assert!(info.key.is_none());
        assert!(info.expected_link_modes.is_empty());

        let info =
            parse_meter_quadruple("w", "iperl:t1,c1", "12345678", "000102030405060708090A0B0C0D0E0F")
                .unwrap();
        assert_eq!(info.expected_link_modes, LinkModeSet::T1 | LinkModeSet::C1);
        assert!(info.key.is_some());

        assert!(parse_meter_quadruple("w", "nosuch", "12345678", "").is_err());
        assert!(parse_meter_quadruple("w", "iperl", "1234", "").is_err());
        assert!(parse_meter_quadruple("w", "iperl", "12345678", "abcd").is_err());
        assert!(parse_meter_quadruple("w", "iperl:x9", "12345678", "").is_err());
    }

    #[test]
    fn test_cli_to_configuration() {
        let cli = cli(&[
            "--format=json",
            "--separator=,",
            "--oneshot",
            "--exitafter=5s",
            "--addconversion=GJ,L",
            "--listento=c1,t1",
            "/dev/ttyUSB0",
            "mywater",
            "multical21",
            "76348799",
            "",
        ]);
        let config = Configuration::from_cli(&cli).unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.separator, ',');
        assert!(config.oneshot);
        assert_eq!(config.exit_after, Some(Duration::from_secs(5)));
        assert_eq!(config.conversions, vec![Unit::Gj, Unit::Litre]);
        assert_eq!(config.listento, LinkModeSet::C1 | LinkModeSet::T1);
        assert_eq!(config.device, DeviceSpec::Tty("/dev/ttyUSB0".to_string()));
        assert_eq!(config.meters.len(), 1);
    }

    #[test]
    fn test_shorthand_link_mode_flags() {
        let cli = cli(&["--c1", "--s1m", "simulation_x.txt"]);
        let config = Configuration::from_cli(&cli).unwrap();
        assert_eq!(config.listento, LinkModeSet::C1 | LinkModeSet::S1M);
    }

    #[test]
    fn test_listen_modes_union_with_meters() {
        let cli = cli(&[
            "simulation_x.txt",
            "mywater",
            "multical21",
            "76348799",
            "",
            "hca",
            "eurisii",
            "11111111",
            "",
        ]);
        let config = Configuration::from_cli(&cli).unwrap();
        // multical21 is C1, eurisii is T1
        assert_eq!(config.listen_modes(), LinkModeSet::C1 | LinkModeSet::T1);
    }

    #[test]
    fn test_missing_device_is_config_error() {
        let cli = cli(&[]);
        assert!(matches!(
            Configuration::from_cli(&cli),
            Err(MetersError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_bad_quadruple_count() {
        let cli = cli(&["auto", "mywater", "multical21"]);
        assert!(matches!(
            Configuration::from_cli(&cli),
            Err(MetersError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_config_dir_loading() {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        std::fs::create_dir_all(etc.join("wmbusmeters.d")).unwrap();
        std::fs::write(
            etc.join("wmbusmeters.conf"),
            "# main config\ndevice=auto\nformat=json\nlistento=c1\nshell=echo $METER_JSON\n",
        )
        .unwrap();
        std::fs::write(
            etc.join("wmbusmeters.d/mywater"),
            "name=mywater\ntype=multical21\nid=76348799\nkey=\nshell=touch /tmp/updated\n",
        )
        .unwrap();

        let cli = cli(&[&format!("--useconfig={}", dir.path().display())]);
        let config = Configuration::from_cli(&cli).unwrap();
        assert_eq!(config.device, DeviceSpec::Auto);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.shells, vec!["echo $METER_JSON".to_string()]);
        assert_eq!(config.meters.len(), 1);
        assert_eq!(config.meters[0].name, "mywater");
        assert_eq!(config.meters[0].shells.len(), 1);
    }

    #[test]
    fn test_unknown_config_key() {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        std::fs::create_dir_all(&etc).unwrap();
        std::fs::write(etc.join("wmbusmeters.conf"), "device=auto\nbogus=1\n").unwrap();
        let cli = cli(&[&format!("--useconfig={}", dir.path().display())]);
        assert!(matches!(
            Configuration::from_cli(&cli),
            Err(MetersError::ConfigInvalid(_))
        ));
    }
}
