use wakeup_weather::{WeatherSnapshot, WEATHER_UNAVAILABLE};

use crate::types::{Execution, ScheduledJob};

/// Said instead of weather when the job wants weather but has no location.
pub const NO_WEATHER_LOCATION: &str =
    "Weather information is not available because no weather location is configured.";

pub const CLOSING: &str = "Have a great day!";

/// Spoken content of a live voice session, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceScript {
    /// Greeting, weather and custom text; one `<Say>` each.
    pub lines: Vec<String>,
    /// Interactive menu read while collecting input.
    pub prompt: String,
    /// Said when the caller gives no input.
    pub closing: String,
}

/// Builds the words of a wake-up message.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    brand: String,
    snooze_minutes: i64,
}

impl MessageComposer {
    pub fn new(brand: impl Into<String>, snooze_minutes: i64) -> Self {
        Self {
            brand: brand.into(),
            snooze_minutes,
        }
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn greeting(&self, is_snooze: bool) -> String {
        if is_snooze {
            format!(
                "Rise and shine! This is your snooze wake-up call from {}.",
                self.brand
            )
        } else {
            format!("Good morning! This is your wake-up call from {}.", self.brand)
        }
    }

    /// Greeting, weather sentence and custom text, space separated.
    pub fn compose(&self, is_snooze: bool, weather: Option<&str>, custom: Option<&str>) -> String {
        let greeting = self.greeting(is_snooze);
        let parts = [Some(greeting.as_str()), weather, custom];
        parts
            .iter()
            .flatten()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn menu_prompt(&self) -> String {
        format!(
            "Press 1 to snooze for {} minutes, press 2 to cancel future calls, \
             or say 'reschedule' to change your wake-up time. \
             Press any other key to end this call.",
            self.snooze_minutes
        )
    }

    /// Script for the voice session of `execution`, using the weather
    /// snapshot stored when the call was placed.
    pub fn voice_script(&self, job: &ScheduledJob, execution: &Execution) -> VoiceScript {
        let mut lines = vec![self.greeting(execution.is_snooze)];
        lines.extend(weather_sentence(job, execution.weather.as_ref()));
        lines.extend(
            job.custom_text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from),
        );
        VoiceScript {
            lines,
            prompt: self.menu_prompt(),
            closing: CLOSING.to_string(),
        }
    }
}

/// Weather sentence for a job, given the snapshot obtained for it (if any).
/// `None` when the job does not ask for weather.
pub fn weather_sentence(job: &ScheduledJob, snapshot: Option<&WeatherSnapshot>) -> Option<String> {
    if !job.include_weather {
        return None;
    }
    if job.weather_location().is_none() {
        return Some(NO_WEATHER_LOCATION.to_string());
    }
    Some(match snapshot {
        Some(s) => s.announcement(),
        None => WEATHER_UNAVAILABLE.to_string(),
    })
}
