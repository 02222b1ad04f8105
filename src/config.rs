// Config Module - Configuration management and command-line argument parsing
use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::types::{Channel, Rgb};

// Global storage for custom config path
static CUSTOM_CONFIG_PATH: OnceLock<Option<String>> = OnceLock::new();

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Terminal control panel for a networked moodlamp",
    long_about = "Mirrors the per-LED red/green/blue state of a moodlamp and lets you change it with sliders.\n\
                  Talks to the lamp over plain HTTP GET requests (/color, /rainbow, /status).\n\
                  Can also run a lamp emulator for testing without hardware."
)]
pub struct Args {
    /// Lamp base URL (e.g. http://moodlamp.local)
    #[arg(short = 'u', long)]
    pub lamp_url: Option<String>,

    /// Number of LEDs on the lamp
    #[arg(short = 'L', long)]
    pub leds: Option<usize>,

    /// Status resync interval in milliseconds (0 = only on demand)
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Print the lamp status and exit
    #[arg(long)]
    pub status: bool,

    /// Set one LED and exit, format: ID,R,G,B
    #[arg(long, value_name = "ID,R,G,B")]
    pub color: Option<String>,

    /// Send a rainbow action (start, stop, pause) and exit
    #[arg(long, value_name = "ACTION")]
    pub rainbow: Option<String>,

    /// Run the lamp emulator instead of the panel
    #[arg(long)]
    pub emulate: bool,

    /// Emulator listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<String>,

    /// Config file path or name (e.g., --cfg /full/path or --cfg kitchen for ~/.config/moodlamp/kitchen.conf)
    #[arg(long)]
    pub cfg: Option<String>,
}

/// Parse the `--color` argument: `ID,R,G,B`
pub fn parse_color_arg(arg: &str) -> Result<(usize, Rgb)> {
    let parts: Vec<&str> = arg.split(',').map(|s| s.trim()).collect();
    if parts.len() != 4 {
        anyhow::bail!("Expected ID,R,G,B but got: {}", arg);
    }

    let id: usize = parts[0]
        .parse()
        .with_context(|| format!("Invalid LED id: {}", parts[0]))?;

    let mut values = [0u8; 3];
    for ((channel, part), value) in Channel::ALL.iter().zip(&parts[1..]).zip(values.iter_mut()) {
        *value = part
            .parse()
            .with_context(|| format!("Invalid {} value (0-255): {}", channel, part))?;
    }

    Ok((id, Rgb::new(values[0], values[1], values[2])))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LampConfig {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,  // Stores the config file path (not serialized)

    pub lamp_url: String,
    pub led_count: usize,
    pub status_poll_ms: u64,  // 0 = no periodic resync
    pub slider_step: u8,
    pub slider_coarse_step: u8,
    pub emulator_ip: String,
    pub emulator_port: u16,
    pub rainbow_tick_ms: u64,
    pub log_file: String,  // Empty = stderr
}

impl Default for LampConfig {
    fn default() -> Self {
        LampConfig {
            config_path: None,
            lamp_url: "http://moodlamp.local".to_string(),
            led_count: 2,
            status_poll_ms: 5000,
            slider_step: 1,
            slider_coarse_step: 16,
            emulator_ip: "127.0.0.1".to_string(),
            emulator_port: 8266,
            rainbow_tick_ms: 15,  // Same tick delay as the lamp firmware
            log_file: "".to_string(),
        }
    }
}

impl LampConfig {
    pub fn merge_with_args(&mut self, args: &Args) -> bool {
        // Track if any args were actually provided
        let mut args_provided = false;

        if let Some(ref lamp_url) = args.lamp_url {
            self.lamp_url = lamp_url.clone();
            args_provided = true;
        }

        if let Some(leds) = args.leds {
            self.led_count = leds;
            args_provided = true;
        }

        if let Some(poll_ms) = args.poll_ms {
            self.status_poll_ms = poll_ms;
            args_provided = true;
        }

        if let Some(port) = args.port {
            self.emulator_port = port;
            args_provided = true;
        }

        if let Some(ref log_file) = args.log_file {
            self.log_file = log_file.clone();
            args_provided = true;
        }

        args_provided
    }

    /// Set the global config path (called once at startup)
    pub fn set_config_path(cfg: Option<String>) {
        let _ = CUSTOM_CONFIG_PATH.set(cfg);
    }

    /// Get the global config path (if set)
    fn get_config_path_arg() -> Option<&'static str> {
        CUSTOM_CONFIG_PATH.get()
            .and_then(|opt| opt.as_deref())
    }

    pub fn config_path(cfg_arg: Option<&str>) -> Result<PathBuf> {
        // Priority: explicit arg > global > None
        let cfg = cfg_arg.or_else(|| Self::get_config_path_arg());

        if let Some(cfg) = cfg {
            let path = PathBuf::from(cfg);
            if path.is_absolute() || cfg.contains('/') || cfg.contains('\\') {
                return Ok(path);
            }

            // Otherwise treat as config name in config directory
            let filename = if cfg.ends_with(".conf") {
                cfg.to_string()
            } else {
                format!("{}.conf", cfg)
            };
            Ok(Self::config_dir()?.join(filename))
        } else {
            Ok(Self::config_dir()?.join("config.conf"))
        }
    }

    fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let config_dir = PathBuf::from(home).join(".config").join("moodlamp");
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        Ok(config_dir)
    }

    pub fn load_with_path(cfg_arg: Option<&str>) -> Result<Self> {
        let path = Self::config_path(cfg_arg)?;
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut parsed: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        parsed.config_path = Some(path);
        parsed.sanitize();
        Ok(parsed)
    }

    /// Sanitize config values to handle common formatting issues
    pub fn sanitize(&mut self) {
        self.lamp_url = self.lamp_url.trim().trim_end_matches('/').to_string();
        if !self.lamp_url.is_empty() && !self.lamp_url.contains("://") {
            self.lamp_url = format!("http://{}", self.lamp_url);
        }
        self.emulator_ip = self.emulator_ip.trim().to_string();
        self.log_file = self.log_file.trim().to_string();

        // Clamp numeric values to reasonable ranges
        self.led_count = self.led_count.max(1).min(16);
        self.status_poll_ms = self.status_poll_ms.min(600_000);
        self.slider_step = self.slider_step.max(1);
        self.slider_coarse_step = self.slider_coarse_step.max(self.slider_step);
        self.emulator_port = self.emulator_port.max(1);
        self.rainbow_tick_ms = self.rainbow_tick_ms.max(1).min(10_000);
    }

    pub fn save(&self) -> Result<()> {
        let path = match self.config_path.clone() {
            Some(path) => path,
            None => Self::config_path(None)?,
        };

        // Sanitize values before saving
        let mut sanitized = self.clone();
        sanitized.sanitize();

        // Build TOML with comments manually for better documentation
        let contents = format!(
            r#"# Moodlamp Configuration File

# Base URL of the lamp (the panel sends GET /color, /rainbow and /status here)
lamp_url = "{}"

# Number of LEDs on the lamp (one row of r/g/b sliders per LED)
led_count = {}

# How often to resync the panel from /status, in milliseconds (0 = only on demand)
status_poll_ms = {}

# Slider step for arrow keys, and for Shift+arrow / PageUp / PageDown
slider_step = {}
slider_coarse_step = {}

# Lamp emulator (--emulate) listen address
emulator_ip = "{}"
emulator_port = {}

# Rainbow animation tick interval of the emulator, in milliseconds
rainbow_tick_ms = {}

# Log file (empty = stderr). The panel owns the terminal, so set this to see logs while it runs.
log_file = "{}"
"#,
            sanitized.lamp_url,
            sanitized.led_count,
            sanitized.status_poll_ms,
            sanitized.slider_step,
            sanitized.slider_coarse_step,
            sanitized.emulator_ip,
            sanitized.emulator_port,
            sanitized.rainbow_tick_ms,
            sanitized.log_file,
        );

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
