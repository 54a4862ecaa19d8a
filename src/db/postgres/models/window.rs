use serde::Serialize;
use std::fmt;

/// Rolling window over which a baseline average is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Window {
    #[serde(rename = "7d")]
    D7,
    #[serde(rename = "30d")]
    D30,
    #[serde(rename = "90d")]
    D90,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::D7, Window::D30, Window::D90];

    /// Length of the window in calendar days
    pub fn days(self) -> u32 {
        match self {
            Window::D7 => 7,
            Window::D30 => 30,
            Window::D90 => 90,
        }
    }

    pub fn from_days(days: i32) -> Option<Window> {
        match days {
            7 => Some(Window::D7),
            30 => Some(Window::D30),
            90 => Some(Window::D90),
            _ => None,
        }
    }

    pub fn longest() -> Window {
        Window::D90
    }

    /// Human-readable name used in notifications
    pub fn display_name(self) -> String {
        format!("{}-Day Average", self.days())
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_round_trip_through_days() {
        for window in Window::ALL {
            assert_eq!(Window::from_days(window.days() as i32), Some(window));
        }
        assert_eq!(Window::from_days(14), None);
    }

    #[test]
    fn test_window_labels() {
        assert_eq!(Window::D30.to_string(), "30d");
        assert_eq!(Window::D90.display_name(), "90-Day Average");
        assert_eq!(Window::longest(), Window::D90);
    }
}
