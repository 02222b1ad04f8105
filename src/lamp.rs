// Lamp Module - Emulated moodlamp: RGB LEDs plus the rainbow animator
use std::f64::consts::PI;

use crate::types::{Channel, LampStatus, Mode, Rgb};

/// Color cycle that drives every LED the same way, one step per tick.
#[derive(Debug, Clone, Default)]
pub struct Rainbow {
    running: bool,
    counter: u32,
}

impl Rainbow {
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Halts and blacks the LEDs out.
    pub fn stop(&mut self, leds: &mut [Rgb]) {
        if self.running {
            self.running = false;
            self.reset(leds);
        }
    }

    /// Halts and keeps the current colors.
    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn reset(&mut self, leds: &mut [Rgb]) {
        self.counter = 0;
        leds.fill(Rgb::BLACK);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn tick(&mut self, leds: &mut [Rgb]) {
        self.counter = self.counter.wrapping_add(1);
        leds.fill(Self::color_at(self.counter));
    }

    // Three cosines offset by 90 and 180 (radians, as the firmware does it)
    pub fn color_at(counter: u32) -> Rgb {
        let rad = counter as f64 * 20.0 * PI / 180.0;
        let wave = |offset: f64| (((rad / 128.0 + offset).cos() + 1.0) / 2.0 * 255.0) as u8;
        Rgb {
            r: wave(0.0),
            g: wave(90.0),
            b: wave(180.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RainbowAction {
    Start,
    Stop,
    Pause,
}

impl RainbowAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action.trim().to_lowercase().as_str() {
            "start" => Some(RainbowAction::Start),
            "stop" => Some(RainbowAction::Stop),
            "pause" => Some(RainbowAction::Pause),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lamp {
    leds: Vec<Rgb>,
    rainbow: Rainbow,
}

impl Lamp {
    pub fn new(led_count: usize) -> Self {
        Lamp {
            leds: vec![Rgb::BLACK; led_count],
            rainbow: Rainbow::default(),
        }
    }

    pub fn led_count(&self) -> usize {
        self.leds.len()
    }

    pub fn color(&self, id: usize) -> Option<Rgb> {
        self.leds.get(id).copied()
    }

    pub fn channel(&self, id: usize, channel: Channel) -> Option<u8> {
        self.leds.get(id).map(|led| led.channel(channel))
    }

    /// Manual color wins over the animation: a running rainbow is paused.
    pub fn set_color(&mut self, id: usize, color: Rgb) -> bool {
        let Some(led) = self.leds.get_mut(id) else {
            return false;
        };
        *led = color;
        self.rainbow.pause();
        true
    }

    /// Same as `set_color` for one channel; the other two keep their value.
    pub fn set_channel(&mut self, id: usize, channel: Channel, value: u8) -> bool {
        let Some(led) = self.leds.get_mut(id) else {
            return false;
        };
        led.set_channel(channel, value);
        self.rainbow.pause();
        true
    }

    pub fn rainbow(&mut self, action: RainbowAction) {
        match action {
            RainbowAction::Start => self.rainbow.start(),
            RainbowAction::Stop => self.rainbow.stop(&mut self.leds),
            RainbowAction::Pause => self.rainbow.pause(),
        }
    }

    /// Advances the animation if it is running.
    pub fn tick(&mut self) {
        if self.rainbow.is_running() {
            self.rainbow.tick(&mut self.leds);
        }
    }

    pub fn status(&self) -> LampStatus {
        let mode = if self.rainbow.is_running() {
            Mode::Effect("rainbow".to_string())
        } else {
            Mode::Color
        };
        LampStatus {
            mode,
            leds: self.leds.clone(),
        }
    }
}
