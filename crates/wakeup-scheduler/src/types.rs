use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use wakeup_weather::WeatherSnapshot;

/// How the owner wants to be woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Voice,
    Sms,
}

impl std::fmt::Display for ContactMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactMethod::Voice => write!(f, "voice"),
            ContactMethod::Sms => write!(f, "sms"),
        }
    }
}

impl std::str::FromStr for ContactMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "voice" => Ok(ContactMethod::Voice),
            "sms" => Ok(ContactMethod::Sms),
            other => Err(format!("unknown contact method: {other}")),
        }
    }
}

/// Selected weekdays for [`Recurrence::Custom`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeekdaySet {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl WeekdaySet {
    pub fn from_days(days: &[Weekday]) -> Self {
        let mut set = Self::default();
        for day in days {
            *set.flag_mut(*day) = true;
        }
        set
    }

    pub fn contains(&self, day: Weekday) -> bool {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn flag_mut(&mut self, day: Weekday) -> &mut bool {
        match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }
}

/// Which local dates a job fires on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// Only on `start_date`.
    Once,
    Daily,
    /// Every seventh day counted from `start_date`.
    Weekly,
    /// Monday to Friday.
    Weekdays,
    /// Saturday and Sunday.
    Weekends,
    Custom { days: WeekdaySet },
}

/// The timing half of a job: everything recurrence math needs besides the zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    /// Local wall-clock time in the owner's zone.
    pub fire_time: NaiveTime,
    pub recurrence: Recurrence,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl JobSchedule {
    /// Contract checks applied before a schedule is ever stored.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Recurrence::Custom { days } = &self.recurrence {
            if days.is_empty() {
                return Err("custom recurrence requires at least one weekday".to_string());
            }
        }
        if let Some(end) = self.end_date {
            if end <= self.start_date {
                return Err("end_date must be after start_date".to_string());
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Paused,
    /// Schedule exhausted (one-shot fired or end date passed).
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(JobStatus::Active),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub owner_id: String,
    /// Phone number in E.164 form.
    pub contact_address: String,
    pub contact_method: ContactMethod,
    #[serde(flatten)]
    pub schedule: JobSchedule,
    #[serde(default)]
    pub include_weather: bool,
    /// Overrides `owner_location` for the weather lookup.
    #[serde(default)]
    pub weather_location: Option<String>,
    #[serde(default)]
    pub custom_text: Option<String>,
    /// IANA zone name; unresolvable names behave as UTC.
    #[serde(default = "default_zone")]
    pub owner_timezone: String,
    #[serde(default)]
    pub owner_location: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
}

fn default_zone() -> String {
    "UTC".to_string()
}

/// A persisted wake-up configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub owner_id: String,
    pub contact_address: String,
    pub contact_method: ContactMethod,
    #[serde(flatten)]
    pub schedule: JobSchedule,
    pub include_weather: bool,
    pub weather_location: Option<String>,
    pub custom_text: Option<String>,
    pub status: JobStatus,
    pub owner_timezone: String,
    pub owner_location: Option<String>,
    pub last_fired: Option<DateTime<Utc>>,
    /// Next UTC instant the job is due; `None` whenever the job is not active.
    pub next_fire: Option<DateTime<Utc>>,
    pub is_demo: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Location used for weather: the job's override, else the owner's default.
    pub fn weather_location(&self) -> Option<&str> {
        non_blank(&self.weather_location).or_else(|| non_blank(&self.owner_location))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Lifecycle state of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::InProgress => "in_progress",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "in_progress" => Ok(ExecutionStatus::InProgress),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One concrete firing of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub job_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub provider_id: Option<String>,
    pub provider_status: Option<String>,
    /// Snapshot the message was composed with.
    pub weather: Option<WeatherSnapshot>,
    pub error: Option<String>,
    pub user_response: Option<String>,
    /// Raw interactive-session payload, kept for audit.
    pub interaction_data: Option<serde_json::Value>,
    pub is_snooze: bool,
    pub created_at: DateTime<Utc>,
}

/// Final state the runner writes for an execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub provider_id: Option<String>,
    pub provider_status: Option<String>,
    pub error: Option<String>,
}
