use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use hazardwatch_common::{ChangeKind, Digest, DigestEntry, Event, HazardKind};

/// Newest first; ties broken by provider then external id, ascending.
pub fn digest_order(a: &Event, b: &Event) -> Ordering {
    b.occurred_at
        .cmp(&a.occurred_at)
        .then_with(|| a.provider_id.cmp(&b.provider_id))
        .then_with(|| a.external_id.cmp(&b.external_id))
}

/// Assemble the run's digest in its canonical order.
pub fn build(mut entries: Vec<DigestEntry>, generated_at: DateTime<Utc>) -> Digest {
    entries.sort_by(|a, b| digest_order(&a.event, &b.event));
    Digest {
        generated_at: Some(generated_at),
        entries,
    }
}

/// Plain-text rendering shared by every notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDigest {
    pub subject: String,
    pub body: String,
}

pub fn render_text(digest: &Digest) -> RenderedDigest {
    let new = digest.count(ChangeKind::New);
    let updated = digest.count(ChangeKind::Updated);
    let subject = match (new, updated) {
        (0, 0) => "[hazardwatch] no new hazard events".to_string(),
        (n, 0) => format!("[hazardwatch] {n} new hazard event{}", plural(n)),
        (0, u) => format!("[hazardwatch] {u} updated hazard event{}", plural(u)),
        (n, u) => format!("[hazardwatch] {n} new, {u} updated hazard events"),
    };

    let mut lines = Vec::with_capacity(digest.len() * 3);
    for entry in &digest.entries {
        let e = &entry.event;
        let tag = match entry.change_kind {
            ChangeKind::New => "NEW",
            ChangeKind::Updated => "UPDATED",
            ChangeKind::Unchanged => "UNCHANGED",
        };
        let measure = match e.kind {
            HazardKind::Seismic => format!("M{:.1}", e.severity_value),
            HazardKind::Weather => e.severity_level.to_string(),
        };
        lines.push(format!(
            "[{tag}] {} | {} | {measure} | {}",
            e.occurred_at.format("%Y-%m-%d %H:%M UTC"),
            e.event_type,
            e.title,
        ));
        if !e.summary.is_empty() {
            lines.push(format!("    {}", e.summary));
        }
        if let Some(link) = &e.link {
            lines.push(format!("    {link}"));
        }
    }

    RenderedDigest {
        subject,
        body: lines.join("\n"),
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use hazardwatch_common::{EventMetrics, Location, SeverityLevel};

    fn event(provider: &str, id: &str, occurred_at: DateTime<Utc>) -> Event {
        Event {
            provider_id: provider.into(),
            external_id: id.into(),
            version_key: "1".into(),
            kind: HazardKind::Seismic,
            event_type: "earthquake".into(),
            severity_value: 5.1,
            severity_level: SeverityLevel::Severe,
            occurred_at,
            updated_at: occurred_at,
            expires_at: None,
            location: Location::point(0.0, 0.0),
            metrics: EventMetrics::default(),
            title: format!("M 5.1 - {id}"),
            summary: String::new(),
            link: None,
        }
    }

    fn entry(event: Event, change_kind: ChangeKind) -> DigestEntry {
        DigestEntry { event, change_kind }
    }

    #[test]
    fn newest_first_then_key() {
        let t = Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap();
        let digest = build(
            vec![
                entry(event("p", "b", t), ChangeKind::New),
                entry(event("p", "a", t), ChangeKind::New),
                entry(event("p", "c", t - Duration::minutes(1)), ChangeKind::New),
            ],
            t,
        );
        let ids: Vec<_> = digest
            .entries
            .iter()
            .map(|e| e.event.external_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn provider_breaks_ties_before_id() {
        let t = Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap();
        let digest = build(
            vec![
                entry(event("usgs", "a", t), ChangeKind::New),
                entry(event("nws", "z", t), ChangeKind::New),
            ],
            t,
        );
        assert_eq!(digest.entries[0].event.provider_id, "nws");
    }

    #[test]
    fn renders_subject_and_lines() {
        let t = Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap();
        let mut updated = event("nws", "w1", t);
        updated.kind = HazardKind::Weather;
        updated.event_type = "flood_warning".into();
        updated.summary = "Kern County".into();
        updated.link = Some("https://api.weather.gov/alerts/w1".into());

        let digest = build(
            vec![
                entry(event("usgs", "q1", t), ChangeKind::New),
                entry(updated, ChangeKind::Updated),
            ],
            t,
        );
        let text = render_text(&digest);
        assert_eq!(text.subject, "[hazardwatch] 1 new, 1 updated hazard events");
        assert!(text
            .body
            .contains("[UPDATED] 2025-05-05 10:00 UTC | flood_warning | severe |"));
        assert!(text.body.contains("[NEW] 2025-05-05 10:00 UTC | earthquake | M5.1 | M 5.1 - q1"));
        assert!(text.body.contains("    Kern County"));
    }

    #[test]
    fn singular_subject() {
        let t = Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap();
        let digest = build(vec![entry(event("usgs", "q1", t), ChangeKind::New)], t);
        assert_eq!(render_text(&digest).subject, "[hazardwatch] 1 new hazard event");
        assert_eq!(
            render_text(&Digest::default()).subject,
            "[hazardwatch] no new hazard events"
        );
    }
}
