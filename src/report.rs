//! Terminal rendering of sync summaries, tracked repos, and the release
//! report. With colour disabled the output is plain text.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use console::Style;
use thiserror::Error;

use crate::db::{self, Pool, ReleaseWithRepo, SyncRun, TrackedRepo};
use crate::model::SyncSummary;

const DESCRIPTION_WIDTH: usize = 75;
const DESCRIPTION_LINES: usize = 2;
const GITHUB: &str = "https://github.com";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("No sync data found. Run 'astrolabe --sync' first.")]
    NoSyncData,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Options for one report rendering.
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub days: u32,
    pub full: bool,
    pub stale_after_days: u32,
    /// ANSI colours and OSC 8 hyperlinks.
    pub color: bool,
}

#[derive(Debug, Clone, Copy)]
struct Painter {
    enabled: bool,
}

impl Painter {
    fn paint(self, text: &str, style: Style) -> String {
        if self.enabled {
            style.force_styling(true).apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn link(self, url: &str, text: String) -> String {
        if self.enabled {
            format!("\x1b]8;;{}\x07{}\x1b]8;;\x07", url, text)
        } else {
            text
        }
    }
}

/// Oldest publish time inside a `days` window ending at `now`. Windows
/// reaching past the epoch start at the epoch.
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |since| {
            since.max(DateTime::<Utc>::UNIX_EPOCH)
        })
}

/// Load releases from the last `opts.days` days and render them.
pub async fn generate(
    pool: &Pool,
    opts: ReportOptions,
    now: DateTime<Utc>,
) -> Result<String, ReportError> {
    let sync = db::latest_sync(pool).await?.ok_or(ReportError::NoSyncData)?;
    let releases = db::releases_since(pool, window_start(now, opts.days)).await?;
    Ok(render(&releases, &sync, opts, now))
}

/// Render the report for already loaded releases (newest first).
pub fn render(
    releases: &[ReleaseWithRepo],
    sync: &SyncRun,
    opts: ReportOptions,
    now: DateTime<Utc>,
) -> String {
    let painter = Painter {
        enabled: opts.color,
    };
    let synced_at = Utc.from_utc_datetime(&sync.synced_at);
    let synced_label = sync.synced_at.format("%Y-%m-%d %H:%M:%S");
    let age_days = (now - synced_at).num_days();
    let stale_warning = (age_days >= i64::from(opts.stale_after_days)).then(|| {
        painter.paint(
            &format!(
                "Data is {} days old. Run 'astrolabe --sync' to refresh.",
                age_days
            ),
            Style::new().yellow(),
        )
    });

    let period = if opts.days == 1 {
        "1 day".to_string()
    } else {
        format!("{} days", opts.days)
    };

    let mut out: Vec<String> = Vec::new();

    if releases.is_empty() {
        out.push(painter.paint(
            &format!("No new releases in the last {}.", period),
            Style::new().yellow(),
        ));
        out.push(painter.paint(
            &format!("Last sync: {} ({} repos)", synced_label, sync.repos_checked),
            Style::new().dim(),
        ));
        out.extend(stale_warning);
        return out.join("\n");
    }

    let mut repo_names: Vec<&str> = releases.iter().map(|r| r.full_name.as_str()).collect();
    repo_names.sort_unstable();
    repo_names.dedup();
    let repo_width = releases
        .iter()
        .map(|r| r.full_name.chars().count())
        .max()
        .unwrap_or(0);

    out.extend(stale_warning);
    out.push(painter.paint(
        &format!(
            "{} releases across {} repos in the last {}",
            releases.len(),
            repo_names.len(),
            period
        ),
        Style::new().bold(),
    ));
    out.push(painter.paint(
        &format!("Last sync: {}", synced_label),
        Style::new().dim(),
    ));
    out.push(String::new());

    let mut by_day: BTreeMap<&str, Vec<&ReleaseWithRepo>> = BTreeMap::new();
    for rel in releases {
        let day = rel
            .published_at
            .as_deref()
            .and_then(|p| p.split('T').next())
            .filter(|d| !d.is_empty())
            .unwrap_or("unknown");
        by_day.entry(day).or_default().push(rel);
    }

    let today = now.date_naive();
    for (day, mut day_releases) in by_day.into_iter().rev() {
        out.push(painter.paint(&relative_date(day, today), Style::new().bold()));
        out.push(painter.paint(&"─".repeat(50), Style::new().dim()));
        day_releases.sort_by_key(|r| r.full_name.to_lowercase());
        for rel in day_releases {
            out.push(release_line(rel, repo_width, painter));
            if opts.full {
                out.push(render_body(rel.body.as_deref(), painter));
            }
        }
        out.push(String::new());
    }

    out.join("\n")
}

fn release_line(rel: &ReleaseWithRepo, repo_width: usize, painter: Painter) -> String {
    let name = rel.full_name.as_str();
    let padding = " ".repeat(repo_width.saturating_sub(name.chars().count()));
    let repo_url = format!("{}/{}", GITHUB, name);
    let release_url = format!("{}/releases/tag/{}", repo_url, rel.tag_name);
    let linked_name = painter.link(&repo_url, painter.paint(name, Style::new().cyan()));
    let linked_version = painter.link(
        &release_url,
        painter.paint(&format_version(rel), Style::new().green()),
    );
    let mut line = format!(
        "  {}{} {} {}",
        padding,
        linked_name,
        painter.paint("│", Style::new().dim()),
        linked_version
    );

    let desc = rel.repo_description.as_deref().unwrap_or("").trim();
    if !desc.is_empty() {
        let desc_padding = " ".repeat(repo_width + 5);
        for wrapped in wrap_description(desc) {
            line.push('\n');
            line.push_str(&desc_padding);
            line.push_str(&painter.paint(&wrapped, Style::new().dim()));
        }
    }
    line
}

fn format_version(rel: &ReleaseWithRepo) -> String {
    match rel.old_tag.as_deref() {
        Some(old) => format!("{} → {}", old, rel.tag_name),
        None => rel.tag_name.clone(),
    }
}

/// Greedy word wrap to at most two lines, with an ellipsis when text was cut.
fn wrap_description(desc: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in desc.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.chars().count() + 1 + word.chars().count() <= DESCRIPTION_WIDTH {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
            if lines.len() >= DESCRIPTION_LINES {
                break;
            }
        }
    }
    if lines.len() < DESCRIPTION_LINES && !current.is_empty() {
        lines.push(current);
    }
    if lines.len() >= DESCRIPTION_LINES && lines.join(" ").chars().count() < desc.chars().count()
    {
        if let Some(last) = lines.last_mut() {
            last.push_str("...");
        }
    }
    lines
}

fn render_body(body: Option<&str>, painter: Painter) -> String {
    let body = body.unwrap_or("").trim();
    if body.is_empty() {
        return painter.paint("  (no release notes)", Style::new().dim());
    }
    body.lines()
        .map(|l| format!("  {}", l).trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn relative_date(day: &str, today: NaiveDate) -> String {
    let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") else {
        return day.to_string();
    };
    let formatted = date.format("%b %-d, %Y");
    match (today - date).num_days() {
        0 => format!("Today ({})", formatted),
        1 => format!("Yesterday ({})", formatted),
        diff => format!("{} days ago ({})", diff, formatted),
    }
}

/// Lines printed after `--sync`.
pub fn render_sync_summary(summary: &SyncSummary, color: bool) -> String {
    let painter = Painter { enabled: color };
    let mut out = Vec::new();
    if !summary.first_sync.is_empty() {
        out.push(painter.paint(
            &format!(
                "Baselined {} repos (first sync — not counted as new)",
                summary.first_sync.len()
            ),
            Style::new().yellow(),
        ));
    }
    for rel in &summary.new_releases {
        out.push(format!(
            "New release: {} {} → {}",
            rel.full_name, rel.old_tag, rel.new_tag
        ));
    }

    let mut checked = format!("Checked {} repos.", summary.repos_synced);
    if let Some(rl) = summary.rate_limit {
        checked.push_str(&format!(" API: {}/{} remaining.", rl.remaining, rl.limit));
    }
    out.push(painter.paint(&checked, Style::new().dim()));

    if !summary.errors.is_empty() {
        out.push(painter.paint(
            &format!(
                "{} release batches failed; their releases were not updated.",
                summary.errors.len()
            ),
            Style::new().yellow(),
        ));
    }
    if summary.rate_limited {
        out.push(painter.paint(
            "Sync stopped early due to rate limiting. Run again later.",
            Style::new().yellow(),
        ));
    }
    out.join("\n")
}

/// One line per tracked repo plus a count footer.
pub fn render_repo_list(repos: &[TrackedRepo]) -> String {
    let mut out: Vec<String> = repos
        .iter()
        .map(|repo| {
            let mut line = repo.full_name.clone();
            if let Some(tag) = &repo.last_known_tag {
                line.push_str("  ");
                line.push_str(tag);
            }
            if let Some(lang) = &repo.language {
                line.push_str("  ");
                line.push_str(lang);
            }
            line
        })
        .collect();
    out.push(String::new());
    out.push(format!("{} repos tracked", repos.len()));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewRelease, RateLimit};
    use chrono::NaiveDateTime;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn sync_run(synced_at: &str) -> SyncRun {
        SyncRun {
            id: 1,
            synced_at: NaiveDateTime::parse_from_str(synced_at, "%Y-%m-%d %H:%M:%S").unwrap(),
            repos_checked: 42,
            new_releases_found: 1,
        }
    }

    fn rel(name: &str, tag: &str, old: Option<&str>, published: Option<&str>) -> ReleaseWithRepo {
        ReleaseWithRepo {
            tag_name: tag.into(),
            name: None,
            body: None,
            published_at: published.map(str::to_string),
            old_tag: old.map(str::to_string),
            full_name: name.into(),
            language: None,
            repo_description: None,
        }
    }

    fn opts(days: u32, full: bool) -> ReportOptions {
        ReportOptions {
            days,
            full,
            stale_after_days: 3,
            color: false,
        }
    }

    #[test]
    fn empty_window_reports_last_sync() {
        let out = render(
            &[],
            &sync_run("2024-03-10 08:00:00"),
            opts(1, false),
            at("2024-03-10T12:00:00Z"),
        );
        assert_eq!(
            out,
            "No new releases in the last 1 day.\nLast sync: 2024-03-10 08:00:00 (42 repos)"
        );
    }

    #[test]
    fn stale_data_warns() {
        let out = render(
            &[],
            &sync_run("2024-03-01 08:00:00"),
            opts(7, false),
            at("2024-03-05T12:00:00Z"),
        );
        assert!(out.ends_with("Data is 4 days old. Run 'astrolabe --sync' to refresh."));
    }

    #[test]
    fn groups_by_day_newest_first_and_aligns_names() {
        let releases = vec![
            rel("zeta/z", "v2", Some("v1"), Some("2024-03-10T09:00:00Z")),
            rel("Alpha/long-name", "1.0", None, Some("2024-03-10T08:00:00Z")),
            rel("b/c", "0.3", Some("0.2"), Some("2024-03-08T08:00:00Z")),
        ];
        let out = render(
            &releases,
            &sync_run("2024-03-10 10:00:00"),
            opts(7, false),
            at("2024-03-10T12:00:00Z"),
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "3 releases across 3 repos in the last 7 days");
        assert_eq!(lines[1], "Last sync: 2024-03-10 10:00:00");
        assert_eq!(lines[3], "Today (Mar 10, 2024)");
        assert_eq!(lines[5], "  Alpha/long-name │ 1.0");
        assert_eq!(lines[6], "           zeta/z │ v1 → v2");
        assert_eq!(lines[8], "2 days ago (Mar 8, 2024)");
        assert_eq!(lines[10], "              b/c │ 0.2 → 0.3");
    }

    #[test]
    fn yesterday_and_unknown_dates() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(relative_date("2024-03-09", today), "Yesterday (Mar 9, 2024)");
        assert_eq!(relative_date("unknown", today), "unknown");
    }

    #[test]
    fn full_report_includes_notes() {
        let mut with_notes = rel("a/b", "v2", Some("v1"), Some("2024-03-10T09:00:00Z"));
        with_notes.body = Some("## Changes\n- fix\n".into());
        let without = rel("c/d", "v1", None, Some("2024-03-10T09:00:00Z"));
        let out = render(
            &[with_notes, without],
            &sync_run("2024-03-10 10:00:00"),
            opts(7, true),
            at("2024-03-10T12:00:00Z"),
        );
        assert!(out.contains("  ## Changes\n  - fix"));
        assert!(out.contains("  (no release notes)"));
    }

    #[test]
    fn description_wraps_to_two_lines_with_ellipsis() {
        let word = "word ";
        let desc = word.repeat(60);
        let lines = wrap_description(desc.trim());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].chars().count() <= DESCRIPTION_WIDTH);
        assert!(lines[1].ends_with("..."));

        let short = wrap_description("A small tool");
        assert_eq!(short, vec!["A small tool".to_string()]);
    }

    #[test]
    fn description_is_indented_under_version() {
        let mut r = rel("a/b", "v1", None, Some("2024-03-10T09:00:00Z"));
        r.repo_description = Some("Fast thing".into());
        assert_eq!(
            release_line(&r, 3, Painter { enabled: false }),
            "  a/b │ v1\n        Fast thing"
        );
    }

    #[test]
    fn colored_line_links_repo_and_release() {
        let r = rel("a/b", "v2", Some("v1"), Some("2024-03-10T09:00:00Z"));
        let line = release_line(&r, 3, Painter { enabled: true });
        assert!(line.contains("\x1b]8;;https://github.com/a/b\x07"));
        assert!(line.contains("\x1b]8;;https://github.com/a/b/releases/tag/v2\x07"));
        assert!(line.contains("\x1b["));
        assert!(line.contains("v1 → v2"));
        assert_eq!(line.matches("\x1b]8;;\x07").count(), 2);
    }

    #[test]
    fn window_start_saturates_at_epoch() {
        let now = at("2024-03-10T12:00:00Z");
        assert_eq!(window_start(now, 7), at("2024-03-03T12:00:00Z"));
        assert_eq!(window_start(now, 200_000_000), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(window_start(now, u32::MAX), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn sync_summary_lines() {
        let summary = SyncSummary {
            repos_synced: 250,
            new_releases: vec![NewRelease {
                full_name: "a/b".into(),
                old_tag: "v1.0".into(),
                new_tag: "v1.1".into(),
                name: None,
                body: None,
                published_at: None,
            }],
            first_sync: vec!["c/d".into(), "e/f".into()],
            rate_limited: true,
            errors: vec!["boom".into()],
            rate_limit: Some(RateLimit {
                remaining: 4990,
                limit: 5000,
                used: 10,
            }),
        };
        let out = render_sync_summary(&summary, false);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Baselined 2 repos (first sync — not counted as new)",
                "New release: a/b v1.0 → v1.1",
                "Checked 250 repos. API: 4990/5000 remaining.",
                "1 release batches failed; their releases were not updated.",
                "Sync stopped early due to rate limiting. Run again later.",
            ]
        );
    }

    #[test]
    fn repo_list_shows_tag_and_language() {
        let repos = vec![
            TrackedRepo {
                id: 1,
                full_name: "a/b".into(),
                description: None,
                language: Some("Rust".into()),
                last_checked_at: None,
                last_known_tag: Some("v1".into()),
            },
            TrackedRepo {
                id: 2,
                full_name: "c/d".into(),
                description: None,
                language: None,
                last_checked_at: None,
                last_known_tag: None,
            },
        ];
        assert_eq!(
            render_repo_list(&repos),
            "a/b  v1  Rust\nc/d\n\n2 repos tracked"
        );
    }
}
