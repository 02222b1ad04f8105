// Panel Module - State mirror of the lamp and the slider handlers
//
// The panel owns the LED records, the device mode and the slider views. Every
// handler is split into a `begin_*` half that mutates state and returns the
// command to send, and a `finish_*` half that applies the reply. The UI loop
// runs requests in the background and feeds replies back in, so state is only
// ever touched from the loop. The async helpers at the bottom chain both
// halves for callers that just want one round trip.
use tracing::{debug, info, warn};

use crate::dispatcher::{Command, Dispatch, Reply};
use crate::types::{Channel, LampStatus, Mode, Rgb};

/// One slider: the view of a single channel of a single LED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slider {
    pub led_id: usize,
    pub channel: Channel,
    pub value: u8,
    pub enabled: bool,
    pub label: String,
}

impl Slider {
    fn new(led_id: usize, channel: Channel) -> Self {
        Slider {
            led_id,
            channel,
            value: 0,
            enabled: true,
            label: "0".to_string(),
        }
    }

    /// Id of the numeric label next to the slider: `<channel>_<led_id>_val`
    pub fn label_id(&self) -> String {
        format!("{}_{}_val", self.channel, self.led_id)
    }

    fn show(&mut self, value: u8) {
        self.value = value;
        self.label = value.to_string();
    }
}

/// A color change that has been applied optimistically and is waiting for
/// the lamp's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingColor {
    pub slider: usize,
    pub before: u8,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub struct Panel {
    leds: Vec<Rgb>,
    mode: Mode,
    sliders: Vec<Slider>,
}

impl Panel {
    pub fn new(led_count: usize) -> Self {
        let sliders = (0..led_count)
            .flat_map(|led_id| Channel::ALL.into_iter().map(move |channel| Slider::new(led_id, channel)))
            .collect();

        Panel {
            leds: vec![Rgb::BLACK; led_count],
            mode: Mode::Color,
            sliders,
        }
    }

    pub fn leds(&self) -> &[Rgb] {
        &self.leds
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn sliders(&self) -> &[Slider] {
        &self.sliders
    }

    pub fn slider_index(&self, led_id: usize, channel: Channel) -> Option<usize> {
        self.sliders
            .iter()
            .position(|s| s.led_id == led_id && s.channel == channel)
    }

    /// Slider moved: update the record and label right away, lock the slider
    /// and hand back the `color` command carrying the LED's full triple.
    ///
    /// Returns `None` when the slider does not exist, is disabled, or its LED
    /// has no record.
    pub fn begin_color_change(&mut self, slider: usize, value: u8) -> Option<PendingColor> {
        let view = self.sliders.get_mut(slider)?;
        if !view.enabled {
            return None;
        }
        let (led_id, channel) = (view.led_id, view.channel);
        let record = self.leds.get_mut(led_id)?;

        let before = record.channel(channel);
        record.set_channel(channel, value);
        let color = *record;

        view.show(value);
        view.enabled = false;

        debug!(label = %view.label_id(), before, value, "color change sent");
        Some(PendingColor {
            slider,
            before,
            command: Command::Color { id: led_id, color },
        })
    }

    /// Lamp answered a color change: roll back the one channel on failure and
    /// unlock the slider either way.
    pub fn finish_color_change(&mut self, pending: &PendingColor, reply: &Reply) {
        let Some(view) = self.sliders.get_mut(pending.slider) else {
            return;
        };

        if !reply.is_success() {
            warn!(
                led = view.led_id,
                channel = %view.channel,
                status = reply.status,
                restored = pending.before,
                "color change rejected, rolling back"
            );
            if let Some(record) = self.leds.get_mut(view.led_id) {
                record.set_channel(view.channel, pending.before);
            }
            view.show(pending.before);
        }

        // A status refresh may have dropped the LED while the request was out
        view.enabled = self.leds.get(view.led_id).is_some();
    }

    pub fn rainbow_command(action: &str) -> Command {
        Command::Rainbow { action: action.to_string() }
    }

    /// Returns whether a status refresh should follow.
    pub fn finish_rainbow(&self, reply: &Reply) -> bool {
        if reply.is_success() {
            true
        } else {
            warn!(status = reply.status, "rainbow request failed");
            false
        }
    }

    /// Lamp answered a status request: replace the mirror wholesale and
    /// re-render every slider. Returns whether the status was applied.
    pub fn finish_status(&mut self, reply: &Reply) -> bool {
        if !reply.is_success() {
            warn!(status = reply.status, "status request failed");
            return false;
        }

        let status: LampStatus = match serde_json::from_str(&reply.body) {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, body = %reply.body, "unreadable status body");
                return false;
            }
        };

        if status.mode != self.mode {
            info!(mode = %status.mode, "lamp mode changed");
        }
        self.mode = status.mode;
        self.leds = status.leds;
        self.render();
        true
    }

    // Sliders are live only in color mode; a slider whose LED is missing from
    // the mirror keeps its value and stays locked.
    fn render(&mut self) {
        let interactive = self.mode.is_color();
        for view in &mut self.sliders {
            match self.leds.get(view.led_id) {
                Some(record) => {
                    view.show(record.channel(view.channel));
                    view.enabled = interactive;
                }
                None => view.enabled = false,
            }
        }
    }

    /// One complete color round trip. `None` if the slider could not move.
    pub async fn change_color<D: Dispatch>(
        &mut self,
        dispatcher: &D,
        led_id: usize,
        channel: Channel,
        value: u8,
    ) -> Option<Reply> {
        let slider = self.slider_index(led_id, channel)?;
        let pending = self.begin_color_change(slider, value)?;
        let reply = dispatcher.dispatch(pending.command.clone()).await;
        self.finish_color_change(&pending, &reply);
        Some(reply)
    }

    /// Set a whole LED by moving its three sliders in turn, stopping at the
    /// first channel the lamp rejects.
    pub async fn set_color<D: Dispatch>(&mut self, dispatcher: &D, led_id: usize, color: Rgb) -> Option<Reply> {
        let mut last = None;
        for channel in Channel::ALL {
            let reply = self.change_color(dispatcher, led_id, channel, color.channel(channel)).await?;
            let ok = reply.is_success();
            last = Some(reply);
            if !ok {
                break;
            }
        }
        last
    }

    /// Rainbow action round trip, followed by a status refresh on success.
    pub async fn toggle_rainbow<D: Dispatch>(&mut self, dispatcher: &D, action: &str) -> Reply {
        let reply = dispatcher.dispatch(Self::rainbow_command(action)).await;
        if self.finish_rainbow(&reply) {
            self.refresh_status(dispatcher).await;
        }
        reply
    }

    pub async fn refresh_status<D: Dispatch>(&mut self, dispatcher: &D) -> Reply {
        let reply = dispatcher.dispatch(Command::Status).await;
        self.finish_status(&reply);
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::testing::ScriptedDispatcher;

    fn rainbow_status() -> &'static str {
        r#"{"mode":"rainbow","leds":[{"r":10,"g":20,"b":30},{"r":5,"g":5,"b":5}]}"#
    }

    #[test]
    fn test_new_panel() {
        let panel = Panel::new(2);
        assert_eq!(panel.leds(), &[Rgb::BLACK, Rgb::BLACK]);
        assert_eq!(panel.mode(), &Mode::Color);
        assert_eq!(panel.sliders().len(), 6);
        assert!(panel.sliders().iter().all(|s| s.enabled && s.value == 0 && s.label == "0"));
        assert_eq!(panel.sliders()[4].label_id(), "g_1_val");
    }

    #[tokio::test]
    async fn test_drag_success_keeps_value() {
        let dispatcher = ScriptedDispatcher::new();
        let mut panel = Panel::new(2);

        let reply = panel.change_color(&dispatcher, 0, Channel::Green, 128).await.unwrap();
        assert!(reply.is_success());

        assert_eq!(
            dispatcher.sent(),
            vec![Command::Color { id: 0, color: Rgb::new(0, 128, 0) }]
        );
        assert_eq!(panel.leds()[0].g, 128);
        let slider = &panel.sliders()[panel.slider_index(0, Channel::Green).unwrap()];
        assert!(slider.enabled);
        assert_eq!(slider.value, 128);
        assert_eq!(slider.label, "128");
    }

    #[tokio::test]
    async fn test_drag_failure_rolls_back() {
        let dispatcher = ScriptedDispatcher::new();
        dispatcher.push_reply(500, "boom");
        let mut panel = Panel::new(2);

        let reply = panel.change_color(&dispatcher, 0, Channel::Green, 128).await.unwrap();
        assert_eq!(reply.status, 500);

        assert_eq!(panel.leds()[0].g, 0);
        let slider = &panel.sliders()[panel.slider_index(0, Channel::Green).unwrap()];
        assert!(slider.enabled);
        assert_eq!(slider.value, 0);
        assert_eq!(slider.label, "0");
    }

    #[test]
    fn test_rollback_touches_only_the_changed_channel() {
        let mut panel = Panel::new(2);
        let red = panel.slider_index(1, Channel::Red).unwrap();
        let blue = panel.slider_index(1, Channel::Blue).unwrap();

        let first = panel.begin_color_change(red, 40).unwrap();
        let second = panel.begin_color_change(blue, 90).unwrap();
        assert_eq!(
            second.command,
            Command::Color { id: 1, color: Rgb::new(40, 0, 90) }
        );

        // Out of order: blue succeeds first, then red fails
        panel.finish_color_change(&second, &Reply { status: 200, body: String::new() });
        panel.finish_color_change(&first, &Reply::failed("timeout"));

        assert_eq!(panel.leds()[1], Rgb::new(0, 0, 90));
        assert!(panel.sliders()[red].enabled);
        assert!(panel.sliders()[blue].enabled);
        assert_eq!(panel.sliders()[red].label, "0");
    }

    #[test]
    fn test_slider_locked_while_in_flight() {
        let mut panel = Panel::new(2);
        let slider = panel.slider_index(0, Channel::Red).unwrap();

        let pending = panel.begin_color_change(slider, 10).unwrap();
        assert!(!panel.sliders()[slider].enabled);
        assert!(panel.begin_color_change(slider, 20).is_none());
        assert_eq!(panel.leds()[0].r, 10);

        panel.finish_color_change(&pending, &Reply { status: 200, body: String::new() });
        assert!(panel.begin_color_change(slider, 20).is_some());
    }

    #[test]
    fn test_unknown_slider() {
        let mut panel = Panel::new(2);
        assert!(panel.slider_index(2, Channel::Red).is_none());
        assert!(panel.begin_color_change(99, 1).is_none());
    }

    #[tokio::test]
    async fn test_rainbow_start_refreshes_status() {
        let dispatcher = ScriptedDispatcher::new();
        dispatcher.push_reply(200, "");
        dispatcher.push_reply(200, rainbow_status());
        let mut panel = Panel::new(2);

        let reply = panel.toggle_rainbow(&dispatcher, "start").await;
        assert!(reply.is_success());
        assert_eq!(
            dispatcher.sent(),
            vec![Command::Rainbow { action: "start".to_string() }, Command::Status]
        );

        assert_eq!(panel.mode(), &Mode::Effect("rainbow".to_string()));
        assert_eq!(panel.leds(), &[Rgb::new(10, 20, 30), Rgb::new(5, 5, 5)]);
        for slider in panel.sliders() {
            assert!(!slider.enabled);
            assert_eq!(slider.value, panel.leds()[slider.led_id].channel(slider.channel));
            assert_eq!(slider.label, slider.value.to_string());
        }
    }

    #[tokio::test]
    async fn test_rainbow_failure_does_nothing_more() {
        let dispatcher = ScriptedDispatcher::new();
        dispatcher.push_reply(404, "");
        let mut panel = Panel::new(2);

        let reply = panel.toggle_rainbow(&dispatcher, "start").await;
        assert!(!reply.is_success());
        assert_eq!(dispatcher.sent().len(), 1);
        assert!(panel.mode().is_color());
        assert!(panel.sliders().iter().all(|s| s.enabled));
    }

    #[test]
    fn test_status_back_to_color_mode_unlocks_sliders() {
        let mut panel = Panel::new(2);
        assert!(panel.finish_status(&Reply { status: 200, body: rainbow_status().to_string() }));
        assert!(panel.sliders().iter().all(|s| !s.enabled));

        let body = r#"{"mode":"color","leds":[{"r":1,"g":2,"b":3},{"r":4,"g":5,"b":6}]}"#;
        assert!(panel.finish_status(&Reply { status: 200, body: body.to_string() }));
        assert!(panel.sliders().iter().all(|s| s.enabled));
        assert_eq!(panel.sliders()[5].value, 6);
    }

    #[test]
    fn test_status_failure_keeps_mirror() {
        let mut panel = Panel::new(2);
        let slider = panel.slider_index(0, Channel::Red).unwrap();
        let pending = panel.begin_color_change(slider, 77).unwrap();
        panel.finish_color_change(&pending, &Reply { status: 200, body: String::new() });

        assert!(!panel.finish_status(&Reply { status: 503, body: String::new() }));
        assert!(!panel.finish_status(&Reply { status: 200, body: "not json".to_string() }));
        assert_eq!(panel.leds()[0].r, 77);
        assert!(panel.mode().is_color());
    }

    #[test]
    fn test_status_with_fewer_leds_locks_orphan_sliders() {
        let mut panel = Panel::new(2);
        let body = r#"{"mode":"color","leds":[{"r":9,"g":9,"b":9}]}"#;
        assert!(panel.finish_status(&Reply { status: 200, body: body.to_string() }));

        assert_eq!(panel.leds().len(), 1);
        for slider in panel.sliders() {
            assert_eq!(slider.enabled, slider.led_id == 0);
        }
        let orphan = panel.slider_index(1, Channel::Green).unwrap();
        assert!(panel.begin_color_change(orphan, 1).is_none());
    }

    #[test]
    fn test_reply_for_dropped_led_keeps_slider_locked() {
        let mut panel = Panel::new(2);
        let slider = panel.slider_index(1, Channel::Red).unwrap();
        let pending = panel.begin_color_change(slider, 50).unwrap();

        // Status shrinks the lamp to one LED while the color request is out
        let body = r#"{"mode":"color","leds":[{"r":9,"g":9,"b":9}]}"#;
        assert!(panel.finish_status(&Reply { status: 200, body: body.to_string() }));

        panel.finish_color_change(&pending, &Reply { status: 400, body: String::new() });
        let view = &panel.sliders()[slider];
        assert!(!view.enabled);
        assert_eq!(view.label, "0");
        assert_eq!(panel.leds().len(), 1);

        panel.finish_color_change(&pending, &Reply { status: 200, body: String::new() });
        assert!(!panel.sliders()[slider].enabled);
    }

    #[tokio::test]
    async fn test_set_color_stops_at_first_rejection() {
        let dispatcher = ScriptedDispatcher::new();
        dispatcher.push_reply(200, "");
        dispatcher.push_reply(400, "");
        let mut panel = Panel::new(2);

        let reply = panel.set_color(&dispatcher, 1, Rgb::new(1, 2, 3)).await.unwrap();
        assert_eq!(reply.status, 400);
        assert_eq!(dispatcher.sent().len(), 2);
        assert_eq!(panel.leds()[1], Rgb::new(1, 0, 0));
    }
}
