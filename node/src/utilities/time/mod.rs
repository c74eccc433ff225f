use chrono::Utc;

pub struct LaminaTime;

impl LaminaTime {
    /// Milliseconds since the unix epoch.
    pub fn now() -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}
