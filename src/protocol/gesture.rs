//! Movement catalog for the training sessions.
//!
//! The training UI and the recording server enumerate the same five
//! gestures in different orders. Movement numbers on the wire use the UI
//! order; the server stores recordings under its own class numbers.

/// A trained hand/wrist gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    NoMotion,
    HandClose,
    HandOpen,
    WristFlexion,
    WristExtension,
}

impl Gesture {
    /// Gestures in the order the training UI numbers them.
    pub const CLIENT_ORDER: [Gesture; 5] = [
        Gesture::HandClose,
        Gesture::HandOpen,
        Gesture::NoMotion,
        Gesture::WristExtension,
        Gesture::WristFlexion,
    ];

    /// Gestures in the order the recording server numbers its classes.
    pub const SERVER_ORDER: [Gesture; 5] = [
        Gesture::NoMotion,
        Gesture::HandClose,
        Gesture::HandOpen,
        Gesture::WristFlexion,
        Gesture::WristExtension,
    ];

    /// Look up the gesture for a movement number sent by the UI.
    pub fn from_movement_number(movement: u32) -> Option<Self> {
        Self::CLIENT_ORDER.get(movement as usize).copied()
    }

    /// Look up the gesture for a server class number.
    pub fn from_class_index(class: usize) -> Option<Self> {
        Self::SERVER_ORDER.get(class).copied()
    }

    /// Movement number of this gesture in the UI order.
    pub fn movement_number(&self) -> u32 {
        Self::CLIENT_ORDER
            .iter()
            .position(|g| g == self)
            .unwrap_or_default() as u32
    }

    /// Class number of this gesture in the server order.
    pub fn class_index(&self) -> usize {
        Self::SERVER_ORDER
            .iter()
            .position(|g| g == self)
            .unwrap_or_default()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Gesture::NoMotion => "No Motion",
            Gesture::HandClose => "Hand Close",
            Gesture::HandOpen => "Hand Open",
            Gesture::WristFlexion => "Wrist Flexion",
            Gesture::WristExtension => "Wrist Extension",
        }
    }
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}
