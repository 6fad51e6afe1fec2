//! Minimal `{{field}}` substitution. Not a templating engine or an authoring
//! UI — just enough rendering to turn an alarm into channel-appropriate text.

use alarm_common::Alarm;

pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

/// Renders a body (and, for email, a subject) from a small fixed set of
/// alarm fields. Templates are plain strings containing `{{field}}`
/// placeholders; unknown placeholders are left as-is.
pub fn render(body_template: &str, subject_template: Option<&str>, alarm: &Alarm) -> RenderedMessage {
    RenderedMessage {
        subject: subject_template.map(|t| substitute(t, alarm)),
        body: substitute(body_template, alarm),
    }
}

fn substitute(template: &str, alarm: &Alarm) -> String {
    template
        .replace("{{alarm_id}}", &alarm.id.to_string())
        .replace("{{imei}}", &alarm.imei)
        .replace("{{status}}", &alarm.status)
        .replace("{{category}}", alarm.category.as_deref().unwrap_or(""))
        .replace("{{gps_time}}", &alarm.gps_time.to_rfc3339())
        .replace("{{latitude}}", &alarm.latitude.to_string())
        .replace("{{longitude}}", &alarm.longitude.to_string())
        .replace("{{speed}}", &alarm.speed.to_string())
}

pub const DEFAULT_SMS_TEMPLATE: &str = "Alert {{status}} for device {{imei}} at {{gps_time}}";
pub const DEFAULT_EMAIL_SUBJECT_TEMPLATE: &str = "Alarm: {{status}} ({{imei}})";
pub const DEFAULT_EMAIL_BODY_TEMPLATE: &str =
    "Device {{imei}} reported {{status}} at {{gps_time}}.\nLocation: {{latitude}}, {{longitude}}\nSpeed: {{speed}}";
pub const DEFAULT_VOICE_SCRIPT_TEMPLATE: &str = "Alert. Status {{status}} for device {{imei}}.";

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_common::Alarm;
    use chrono::Utc;

    fn sample_alarm() -> Alarm {
        Alarm {
            id: 1,
            imei: "123456789012345".to_string(),
            status: "sos".to_string(),
            category: Some("critical".to_string()),
            gps_time: Utc::now(),
            latitude: 1.0,
            longitude: 2.0,
            speed: 0.0,
            is_sms: true,
            is_email: true,
            is_call: true,
            is_valid: true,
            sms_sent: false,
            sms_sent_at: None,
            email_sent: false,
            email_sent_at: None,
            call_sent: false,
            call_sent_at: None,
        }
    }

    #[test]
    fn test_substitute_replaces_known_fields() {
        let alarm = sample_alarm();
        let rendered = render(DEFAULT_SMS_TEMPLATE, None, &alarm);
        assert!(rendered.body.contains("sos"));
        assert!(rendered.body.contains("123456789012345"));
    }
}
