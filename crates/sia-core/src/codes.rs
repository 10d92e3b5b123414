//! SIA event code -> human description lookup.
//!
//! The original ships this as a Python dict (`EVENT_CODE_DESCRIPTIONS`). A
//! `match` is the idiomatic Rust equivalent of a small fixed lookup table —
//! no allocation, no startup construction.

/// Describe a two-letter SIA event code. Unknown codes yield `"Unknown"`.
pub fn describe(code: &str) -> &'static str {
    match code {
        "BA" => "Burglary Alarm",
        "CL" => "Closing Report (User Armed)",
        "OP" => "Opening Report (User Disarmed)",
        "AR" => "AC Power Restored",
        "AT" => "AC Power Failure",
        "RP" => "Automatic Test",
        "FA" => "Fire Alarm",
        "TA" => "Tamper Alarm",
        "BR" => "Burglary Alarm Restore",
        "FR" => "Fire Alarm Restore",
        "YP" => "Power Up / Reset",
        "LB" => "Low Battery",
        "LX" => "Low Battery Restore",
        _ => "Unknown",
    }
}
