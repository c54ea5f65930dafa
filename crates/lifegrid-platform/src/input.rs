// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use tracing::trace;
use winit::event::{ElementState, MouseButton, MouseScrollDelta};
use winit::keyboard::{Key, KeyCode, NamedKey, PhysicalKey};

/// Pixels of touchpad scroll that count as one wheel notch.
const PIXELS_PER_STEP: f64 = 40.0;

/// Runtime control produced from user input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Control {
    TogglePause,
    Faster,
    Slower,
    Reseed,
    Close,
    /// Wheel notches; positive zooms in.
    Zoom(f32),
    /// Cursor moved from one window pixel to another while dragging.
    Pan { from: [f32; 2], to: [f32; 2] },
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Buttons: u8 {
        const LEFT = 1 << 0;
        const MIDDLE = 1 << 1;
        const RIGHT = 1 << 2;
    }
}

impl Buttons {
    fn from_winit(b: MouseButton) -> Self {
        match b {
            MouseButton::Left => Buttons::LEFT,
            MouseButton::Middle => Buttons::MIDDLE,
            MouseButton::Right => Buttons::RIGHT,
            _ => Buttons::empty(),
        }
    }
}

/// Maps a key event to a control.
///
/// Rate keys honour key repeat; pause and reseed fire once per press.
pub fn map_key(logical: &Key, physical: PhysicalKey, pressed: bool, repeat: bool) -> Option<Control> {
    if !pressed {
        return None;
    }

    match physical {
        PhysicalKey::Code(KeyCode::NumpadAdd) => return Some(Control::Faster),
        PhysicalKey::Code(KeyCode::NumpadSubtract) => return Some(Control::Slower),
        _ => {}
    }

    let once = |c| if repeat { None } else { Some(c) };
    match logical {
        Key::Named(NamedKey::Escape) => once(Control::Close),
        Key::Character(s) => match s.as_str() {
            "+" | "=" => Some(Control::Faster),
            "-" | "_" => Some(Control::Slower),
            "p" | "P" => once(Control::TogglePause),
            "r" | "R" => once(Control::Reseed),
            _ => None,
        },
        _ => None,
    }
}

/// Scroll delta in wheel notches.
pub fn scroll_steps(delta: MouseScrollDelta) -> f32 {
    match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(p) => (p.y / PIXELS_PER_STEP) as f32,
    }
}

/// Mouse state needed to turn cursor motion into drags.
#[derive(Debug, Default)]
pub struct InputState {
    cursor: Option<[f32; 2]>,
    held: Buttons,
}

impl InputState {
    pub fn held(&self) -> Buttons {
        self.held
    }

    pub fn on_button(&mut self, button: MouseButton, state: ElementState) {
        let b = Buttons::from_winit(button);
        match state {
            ElementState::Pressed => self.held.insert(b),
            ElementState::Released => self.held.remove(b),
        }
    }

    /// Returns a pan when the cursor moves with the left button held.
    pub fn on_cursor(&mut self, x: f64, y: f64) -> Option<Control> {
        let to = [x as f32, y as f32];
        let prev = self.cursor.replace(to);
        match prev {
            Some(from) if self.held.contains(Buttons::LEFT) && from != to => {
                trace!(?from, ?to, "drag");
                Some(Control::Pan { from, to })
            }
            _ => None,
        }
    }

    pub fn on_cursor_left(&mut self) {
        self.cursor = None;
        self.held = Buttons::empty();
    }

    pub fn on_scroll(&mut self, delta: MouseScrollDelta) -> Option<Control> {
        let steps = scroll_steps(delta);
        (steps != 0.0).then_some(Control::Zoom(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(s: &str) -> Key {
        Key::Character(s.into())
    }

    const NONE: PhysicalKey = PhysicalKey::Code(KeyCode::F24);

    #[test]
    fn keys_map_to_controls() {
        assert_eq!(map_key(&ch("p"), NONE, true, false), Some(Control::TogglePause));
        assert_eq!(map_key(&ch("r"), NONE, true, false), Some(Control::Reseed));
        assert_eq!(map_key(&ch("+"), NONE, true, false), Some(Control::Faster));
        assert_eq!(map_key(&ch("-"), NONE, true, false), Some(Control::Slower));
        assert_eq!(
            map_key(&Key::Named(NamedKey::Escape), NONE, true, false),
            Some(Control::Close)
        );
        assert_eq!(map_key(&ch("x"), NONE, true, false), None);
    }

    #[test]
    fn keypad_uses_physical_code() {
        let k = Key::Named(NamedKey::Enter);
        let add = PhysicalKey::Code(KeyCode::NumpadAdd);
        let sub = PhysicalKey::Code(KeyCode::NumpadSubtract);
        assert_eq!(map_key(&k, add, true, true), Some(Control::Faster));
        assert_eq!(map_key(&k, sub, true, false), Some(Control::Slower));
    }

    #[test]
    fn repeat_only_for_rate_keys() {
        assert_eq!(map_key(&ch("p"), NONE, true, true), None);
        assert_eq!(map_key(&ch("r"), NONE, true, true), None);
        assert_eq!(map_key(&ch("="), NONE, true, true), Some(Control::Faster));
        assert_eq!(map_key(&ch("p"), NONE, false, false), None);
    }

    #[test]
    fn drag_needs_left_button() {
        let mut input = InputState::default();
        assert_eq!(input.on_cursor(10.0, 10.0), None);
        assert_eq!(input.on_cursor(12.0, 10.0), None);

        input.on_button(MouseButton::Left, ElementState::Pressed);
        assert_eq!(
            input.on_cursor(15.0, 11.0),
            Some(Control::Pan {
                from: [12.0, 10.0],
                to: [15.0, 11.0]
            })
        );

        input.on_button(MouseButton::Left, ElementState::Released);
        assert!(input.held().is_empty());
        assert_eq!(input.on_cursor(20.0, 20.0), None);
    }

    #[test]
    fn scroll_zooms() {
        let mut input = InputState::default();
        assert_eq!(
            input.on_scroll(MouseScrollDelta::LineDelta(0.0, 2.0)),
            Some(Control::Zoom(2.0))
        );
        assert_eq!(input.on_scroll(MouseScrollDelta::LineDelta(0.0, 0.0)), None);
    }
}
