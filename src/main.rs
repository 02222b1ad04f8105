// Moodlamp - Terminal control panel for a networked RGB moodlamp
// Mirrors the lamp's LED state, drives it over HTTP, and can emulate a lamp for testing
use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatcher;
mod httpd;
mod lamp;
mod panel;
mod tui;
mod types;

use config::{parse_color_arg, Args, LampConfig};
use dispatcher::{HttpDispatcher, Reply};
use panel::Panel;
use types::PanelExitReason;

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("moodlamp=info,tower_http=info"))
}

// The panel owns the terminal: without a log file its logs are dropped
fn init_logging(config: &LampConfig, owns_terminal: bool) -> Result<()> {
    if !config.log_file.is_empty() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
            .with_context(|| format!("Failed to open log file {}", config.log_file))?;
        tracing_subscriber::fmt()
            .with_env_filter(log_filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else if !owns_terminal {
        tracing_subscriber::fmt()
            .with_env_filter(log_filter())
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn print_panel(panel: &Panel) {
    println!("Mode: {}", panel.mode());
    for (id, led) in panel.leds().iter().enumerate() {
        println!("  LED {}: r={:>3} g={:>3} b={:>3}", id, led.r, led.g, led.b);
    }
}

fn check_reply(reply: &Reply) -> Result<()> {
    if reply.is_success() {
        return Ok(());
    }
    if reply.status == 0 {
        anyhow::bail!("Lamp unreachable: {}", reply.body);
    }
    anyhow::bail!("Lamp answered HTTP {}: {}", reply.status, reply.body.trim());
}

/// --status, --color and --rainbow: one handler round trip, then exit
async fn run_one_shot(args: &Args, config: &LampConfig) -> Result<()> {
    let dispatcher = HttpDispatcher::new(&config.lamp_url)?;
    let mut panel = Panel::new(config.led_count);

    if let Some(ref color_arg) = args.color {
        let (id, color) = parse_color_arg(color_arg)?;
        if id >= config.led_count {
            anyhow::bail!("LED id {} out of range (lamp has {} LEDs)", id, config.led_count);
        }
        let reply = panel
            .set_color(&dispatcher, id, color)
            .await
            .context("LED sliders are locked")?;
        check_reply(&reply)?;
        println!("LED {} set to r={} g={} b={}", id, color.r, color.g, color.b);
        return Ok(());
    }

    let reply = match args.rainbow {
        Some(ref action) => panel.toggle_rainbow(&dispatcher, action).await,
        None => panel.refresh_status(&dispatcher).await,
    };

    check_reply(&reply)?;
    print_panel(&panel);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set global config path immediately (before any config loads)
    LampConfig::set_config_path(args.cfg.clone());

    let cfg_arg = args.cfg.as_deref();
    let config_path = LampConfig::config_path(cfg_arg)?;
    let config_file_exists = config_path.exists();

    let mut config = if config_file_exists {
        match LampConfig::load_with_path(cfg_arg) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("\nFailed to load config file: {:#}", e);
                eprintln!("Config file: {}", config_path.display());
                eprintln!("\nPlease fix the config file or delete it to regenerate with defaults.");
                return Err(e);
            }
        }
    } else {
        LampConfig {
            config_path: Some(config_path.clone()),
            ..LampConfig::default()
        }
    };

    let args_provided = config.merge_with_args(&args);
    config.sanitize();

    // Save config ONLY on first run or when command-line args changed something
    if !config_file_exists || args_provided {
        config.save()?;
    }

    let one_shot = args.status || args.color.is_some() || args.rainbow.is_some();
    init_logging(&config, !args.emulate && !one_shot)?;

    let rt = tokio::runtime::Runtime::new()?;

    if args.emulate {
        return rt.block_on(httpd::run_lamp_emulator(&config));
    }

    if one_shot {
        return rt.block_on(run_one_shot(&args, &config));
    }

    match tui::run_panel(&config, rt.handle().clone())? {
        PanelExitReason::UserQuit => {}
        PanelExitReason::InputClosed => eprintln!("Terminal input closed, panel stopped"),
    }

    // Abandon whatever requests are still in flight
    rt.shutdown_background();
    Ok(())
}
