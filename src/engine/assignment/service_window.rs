// Service-window evaluation for the assignment rule: weekday + time-range
// check in the rule's own timezone, with overnight wraparound support
// (e.g. 22:00-06:00). Absent rule or absent window fields default to
// "always in service".

use crate::atoms::types::VisitorAssignmentRule;
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use log::warn;

pub fn in_service(rule: &VisitorAssignmentRule, now: DateTime<Utc>) -> bool {
    let tz: Tz = rule.timezone.parse().unwrap_or_else(|_| {
        warn!("invalid timezone {:?} on assignment rule, falling back to UTC", rule.timezone);
        Tz::UTC
    });
    let local = now.with_timezone(&tz);

    if let Some(weekdays) = &rule.service_weekdays {
        if !weekdays.is_empty() {
            let iso_weekday = isoweekday(local.weekday());
            if !weekdays.contains(&iso_weekday) {
                return false;
            }
        }
    }

    let (Some(start_raw), Some(end_raw)) = (&rule.service_start_time, &rule.service_end_time) else {
        return true;
    };
    let (Some(start), Some(end)) = (parse_hhmm(start_raw), parse_hhmm(end_raw)) else {
        warn!("invalid service_start_time/service_end_time on assignment rule, ignoring window");
        return true;
    };
    let current = local.time();

    if start <= end {
        current >= start && current <= end
    } else {
        current >= start || current <= end
    }
}

fn isoweekday(w: Weekday) -> u8 {
    w.number_from_monday() as u8
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rule(weekdays: Option<Vec<u8>>, start: Option<&str>, end: Option<&str>) -> VisitorAssignmentRule {
        VisitorAssignmentRule {
            project_id: crate::atoms::ids::ProjectId::new(),
            max_concurrent_chats: None,
            service_weekdays: weekdays,
            service_start_time: start.map(String::from),
            service_end_time: end.map(String::from),
            timezone: "UTC".into(),
            llm_assignment_enabled: false,
            ai_provider_id: None,
            model: None,
            effective_prompt: String::new(),
            queue_wait_timeout_minutes: None,
        }
    }

    #[test]
    fn no_window_configured_is_always_in_service() {
        let r = rule(None, None, None);
        assert!(in_service(&r, Utc::now()));
    }

    #[test]
    fn normal_window_excludes_outside_hours() {
        let r = rule(None, Some("09:00"), Some("18:00"));
        let inside = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 1, 5, 20, 0, 0).unwrap();
        assert!(in_service(&r, inside));
        assert!(!in_service(&r, outside));
    }

    #[test]
    fn overnight_window_wraps_past_midnight() {
        let r = rule(None, Some("22:00"), Some("06:00"));
        let late_night = Utc.with_ymd_and_hms(2026, 1, 5, 23, 30, 0).unwrap();
        let early_morning = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        assert!(in_service(&r, late_night));
        assert!(in_service(&r, early_morning));
        assert!(!in_service(&r, midday));
    }

    #[test]
    fn weekday_restriction_excludes_other_days() {
        // 2026-01-05 is a Monday.
        let r = rule(Some(vec![2, 3, 4, 5, 6]), None, None);
        let monday = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let tuesday = Utc.with_ymd_and_hms(2026, 1, 6, 12, 0, 0).unwrap();
        assert!(!in_service(&r, monday));
        assert!(in_service(&r, tuesday));
    }
}
