//! Aggregate statistics commands

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use cms_common::pagination::DateRange;
use cms_domain::{
    article::{ArticleStatus, CategoryCount},
    hit::{TargetCount, TargetKind},
    media::{StorageStats, VideoStatus},
    news::SourceCount,
    user::UserRole,
    EventId, StatusCount, SurveyId,
};

use crate::commands::CommandContext;
use crate::output::{self, colors, TableFormatter};

/// Site-wide content totals
#[derive(Debug, Serialize)]
pub struct Overview {
    pub articles: Vec<StatusCount<ArticleStatus>>,
    pub articles_by_category: Vec<CategoryCount>,
    pub news_by_source: Vec<SourceCount>,
    pub videos: Vec<StatusCount<VideoStatus>>,
    pub video_seconds: i64,
    pub images: StorageStats,
    pub users: Vec<StatusCount<UserRole>>,
}

pub async fn overview(ctx: &CommandContext) -> Result<()> {
    let repos = &ctx.repos;
    let (articles, articles_by_category, news_by_source, videos, video_seconds, images, users) = tokio::try_join!(
        repos.articles.count_by_status(),
        repos.articles.count_by_category(),
        repos.news.count_by_source(),
        repos.videos.count_by_status(),
        repos.videos.total_duration_seconds(),
        repos.images.storage_stats(),
        repos.users.count_by_role(),
    )?;

    let overview = Overview {
        articles,
        articles_by_category,
        news_by_source,
        videos,
        video_seconds,
        images,
        users,
    };

    output::print(ctx.format, &overview, |o| {
        TableFormatter::key_value(vec![
            ("Articles", status_line(&o.articles)),
            ("Videos", status_line(&o.videos)),
            ("Video length", format_duration(o.video_seconds)),
            ("Images", format!("{} ({})", o.images.total_count, format_bytes(o.images.total_bytes))),
            ("Users", status_line(&o.users)),
            (
                "Top categories",
                o.articles_by_category
                    .iter()
                    .take(5)
                    .map(|c| format!("{} {}", c.category_name.as_deref().unwrap_or("(none)"), c.count))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            (
                "News sources",
                o.news_by_source
                    .iter()
                    .take(5)
                    .map(|s| format!("{} {}", s.source.as_deref().unwrap_or("(none)"), s.count))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        ])
    })
}

/// Hits per day over the last `days` days
pub async fn traffic(ctx: &CommandContext, kind: TargetKind, target: Option<Uuid>, days: u32) -> Result<()> {
    let range = DateRange::last_days(Utc::now(), days);
    let counts = ctx.repos.hits.daily_counts(kind, target, range).await?;
    output::print(ctx.format, &counts, |c| TableFormatter::daily_counts(c))
}

/// Most visited targets of one kind
pub async fn top(ctx: &CommandContext, kind: TargetKind, days: u32, limit: u32) -> Result<()> {
    let range = DateRange::last_days(Utc::now(), days);
    let targets: Vec<TargetCount> = ctx.repos.hits.top_targets(kind, range, limit).await?;
    if targets.is_empty() {
        println!("{}", colors::warning("No hits in range."));
        return Ok(());
    }
    output::print(ctx.format, &targets, |t| {
        TableFormatter::simple(
            vec!["#", "Kind", "ID", "Hits"],
            t.iter()
                .enumerate()
                .map(|(i, c)| {
                    vec![
                        (i + 1).to_string(),
                        c.target.kind.to_string(),
                        c.target.id.to_string(),
                        c.count.to_string(),
                    ]
                })
                .collect(),
        )
    })
}

/// New WeChat followers per day
pub async fn subscriptions(ctx: &CommandContext, days: u32) -> Result<()> {
    let range = DateRange::last_days(Utc::now(), days);
    let counts = ctx.repos.wechat_users.daily_subscriptions(range).await?;
    output::print(ctx.format, &counts, |c| TableFormatter::daily_counts(c))
}

/// Per-option results of a survey
pub async fn survey(ctx: &CommandContext, id: SurveyId) -> Result<()> {
    let stats = ctx.repos.surveys.statistics(id).await?;
    output::print(ctx.format, &stats, |s| {
        let mut rows = Vec::new();
        for question in &s.questions {
            rows.push(vec![
                question.title.clone(),
                String::new(),
                question.answered.to_string(),
                String::new(),
            ]);
            for option in &question.options {
                rows.push(vec![
                    String::new(),
                    option.label.clone(),
                    option.count.to_string(),
                    format!("{:.1}%", option.percentage),
                ]);
            }
        }
        TableFormatter::simple(vec!["Question", "Option", "Count", "Share"], rows)
    })?;
    if ctx.format == output::OutputFormat::Table {
        println!("{}", colors::dim(&format!("{} responses", stats.responses)));
    }
    Ok(())
}

/// Registration counts of one event
pub async fn event(ctx: &CommandContext, id: EventId) -> Result<()> {
    let event = ctx.repos.events.get_by_id(id).await?;
    let counts = ctx.repos.events.registration_stats(id).await?;

    if ctx.format == output::OutputFormat::Table {
        let seats = match event.remaining_seats() {
            Some(left) => format!("{} of {} seats left", left, event.capacity.unwrap_or_default()),
            None => "unlimited seats".to_string(),
        };
        println!("{} ({})", colors::bold(&event.title), seats);
    }
    output::print(ctx.format, &counts, |c| TableFormatter::status_counts(c))
}

fn status_line<S: std::fmt::Display>(counts: &[StatusCount<S>]) -> String {
    if counts.is_empty() {
        return "0".to_string();
    }
    counts
        .iter()
        .map(|c| format!("{} {}", c.status, c.count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_duration(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{}h {:02}m", hours, minutes)
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
