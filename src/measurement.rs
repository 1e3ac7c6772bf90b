use serde::Serialize;

/// Message published on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Payload {
    pub temperature: f64,
    pub average: f64,
}

impl Payload {
    pub fn new(temperature: f64, average: f64) -> Self {
        Self {
            temperature: round2(temperature),
            average: round2(average),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
