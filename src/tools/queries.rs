//! Read-only views over the caller's calendar.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{events_result, now};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::protocol::CallToolResult;
use crate::store::Event;
use crate::tenancy::TenancyEnforcer;
use crate::tool::{Tool, ToolBuilder};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchEventsInput {
    /// Matched case-insensitively against event names and descriptions
    pub query: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct UpcomingEventsInput {
    /// How many days ahead to look (1-30), defaults to 7
    #[serde(default)]
    pub days: Option<u32>,
    /// Only events in this category (case-insensitive)
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EventsByDateInput {
    /// YYYY-MM-DD
    pub date: String,
}

/// Reporting period a statistics summary is labelled with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsPeriod {
    Week,
    #[default]
    Month,
    Semester,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct StatisticsInput {
    /// Label for the summary, defaults to `month`
    #[serde(default)]
    pub period: StatisticsPeriod,
}

const DEFAULT_UPCOMING_DAYS: u32 = 7;
const MAX_UPCOMING_DAYS: u32 = 30;

pub(super) fn search_events(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("search_events")
        .description("Find events whose name or description contains the query")
        .read_only()
        .handler_with_context(move |ctx: RequestContext, input: SearchEventsInput| {
            let enforcer = enforcer.clone();
            async move {
                let needle = input.query.trim().to_lowercase();
                if needle.is_empty() {
                    return Err(Error::tool("query must not be empty"));
                }
                let scope = ctx.tenant_scope()?;
                let mut events = enforcer.with_scope(scope).list().await?;
                events.retain(|e| {
                    e.name.to_lowercase().contains(&needle)
                        || e.content.to_lowercase().contains(&needle)
                });
                events.sort_by(|a, b| a.start_time.cmp(&b.start_time));
                events_result(&events)
            }
        })
        .build()
}

pub(super) fn get_upcoming_events(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("get_upcoming_events")
        .description("Events starting between now and the given number of days from now")
        .read_only()
        .handler_with_context(move |ctx: RequestContext, input: UpcomingEventsInput| {
            let enforcer = enforcer.clone();
            async move {
                let days = input.days.unwrap_or(DEFAULT_UPCOMING_DAYS);
                if days == 0 || days > MAX_UPCOMING_DAYS {
                    return Err(Error::tool(format!(
                        "days must be between 1 and {}",
                        MAX_UPCOMING_DAYS
                    )));
                }
                let scope = ctx.tenant_scope()?;
                let from = now();
                let until = from + Duration::days(i64::from(days));

                let mut events = enforcer.with_scope(scope).list().await?;
                events.retain(|e| {
                    e.start_time >= from
                        && e.start_time <= until
                        && input
                            .category
                            .as_deref()
                            .is_none_or(|c| e.category.eq_ignore_ascii_case(c))
                });
                events.sort_by(|a, b| a.start_time.cmp(&b.start_time));
                events_result(&events)
            }
        })
        .build()
}

pub(super) fn get_events_by_date(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("get_events_by_date")
        .description("Events starting on the given day")
        .read_only()
        .handler_with_context(move |ctx: RequestContext, input: EventsByDateInput| {
            let enforcer = enforcer.clone();
            async move {
                let date = NaiveDate::parse_from_str(input.date.trim(), "%Y-%m-%d").map_err(
                    |_| Error::tool(format!("invalid date '{}', expected YYYY-MM-DD", input.date)),
                )?;
                let scope = ctx.tenant_scope()?;
                let mut events = enforcer.with_scope(scope).list().await?;
                events.retain(|e| e.start_time.date() == date);
                events.sort_by(|a, b| a.start_time.cmp(&b.start_time));
                events_result(&events)
            }
        })
        .build()
}

pub(super) fn get_calendar_statistics(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("get_calendar_statistics")
        .description("Counts by completion state and category for the caller's calendar")
        .read_only()
        .handler_with_context(move |ctx: RequestContext, input: StatisticsInput| {
            let enforcer = enforcer.clone();
            async move {
                let scope = ctx.tenant_scope()?;
                let events = enforcer.with_scope(scope).list().await?;
                let mut stats = statistics(&events);
                stats["period"] = serde_json::json!(input.period);
                Ok(CallToolResult::json(stats))
            }
        })
        .build()
}

fn activity_level(total: usize) -> &'static str {
    if total > 50 {
        "High"
    } else if total > 20 {
        "Medium"
    } else {
        "Low"
    }
}

fn statistics(events: &[Event]) -> serde_json::Value {
    let total = events.len();
    let completed = events.iter().filter(|e| e.status >= 1.0).count();
    let pending = events.iter().filter(|e| e.status <= 0.0).count();
    let in_progress = total - completed - pending;

    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    for event in events {
        *by_category.entry(event.category.as_str()).or_default() += 1;
    }

    let completion_rate = if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64 * 1000.0).round() / 10.0
    };

    serde_json::json!({
        "total_events": total,
        "completed": completed,
        "in_progress": in_progress,
        "pending": pending,
        "completion_rate": completion_rate,
        "by_category": by_category,
        "activity_level": activity_level(total),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{call, sids, tenant, tools_over};
    use super::*;
    use crate::store::DATETIME_FORMAT;
    use crate::store::fixtures::event;
    use serde_json::json;

    fn starting_in(sid: &str, tenant: &str, offset: Duration) -> Event {
        let mut e = event(sid, Some(tenant));
        let start = now() + offset;
        // whole seconds, like the wire format
        let start = chrono::NaiveDateTime::parse_from_str(
            &start.format(DATETIME_FORMAT).to_string(),
            DATETIME_FORMAT,
        )
        .unwrap();
        e.start_time = start;
        e.end_time = start + Duration::hours(1);
        e
    }

    #[test]
    fn test_activity_thresholds() {
        assert_eq!(activity_level(0), "Low");
        assert_eq!(activity_level(20), "Low");
        assert_eq!(activity_level(21), "Medium");
        assert_eq!(activity_level(50), "Medium");
        assert_eq!(activity_level(51), "High");
    }

    #[test]
    fn test_statistics() {
        let mut done = event("done", Some("user0"));
        done.status = 1.0;
        let mut half = event("half", Some("user0"));
        half.status = 0.5;
        half.category = "Lab".to_string();
        let todo = event("todo", Some("user0"));

        let stats = statistics(&[done, half, todo]);
        assert_eq!(stats["total_events"], 3);
        assert_eq!(stats["completed"], 1);
        assert_eq!(stats["in_progress"], 1);
        assert_eq!(stats["pending"], 1);
        assert_eq!(stats["completion_rate"], 33.3);
        assert_eq!(stats["by_category"]["Meeting"], 2);
        assert_eq!(stats["by_category"]["Lab"], 1);
        assert_eq!(stats["activity_level"], "Low");
    }

    #[test]
    fn test_statistics_empty_calendar() {
        let stats = statistics(&[]);
        assert_eq!(stats["total_events"], 0);
        assert_eq!(stats["completion_rate"], 0.0);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_scoped() {
        let mut review = event("review", Some("user0"));
        review.name = "Code Review".to_string();
        let mut other = event("other", Some("user1"));
        other.name = "code review".to_string();
        let (tools, _) = tools_over(vec![review, other, event("sync", Some("user0"))]);

        let result = call(
            &tools,
            "search_events",
            tenant("user0"),
            json!({ "query": "REVIEW" }),
        )
        .await;
        assert_eq!(sids(&result), vec!["review"]);

        let by_content = call(
            &tools,
            "search_events",
            tenant("user0"),
            json!({ "query": "weekly" }),
        )
        .await;
        assert_eq!(sids(&by_content).len(), 2);

        let empty = call(&tools, "search_events", tenant("user0"), json!({ "query": " " })).await;
        assert!(empty.is_error);
    }

    #[tokio::test]
    async fn test_upcoming_window() {
        let (tools, _) = tools_over(vec![
            starting_in("later", "user0", Duration::days(3)),
            starting_in("soon", "user0", Duration::hours(2)),
            starting_in("far", "user0", Duration::days(29)),
            starting_in("past", "user0", Duration::days(-1)),
            starting_in("foreign", "user1", Duration::hours(1)),
        ]);

        let week = call(&tools, "get_upcoming_events", tenant("user0"), json!({})).await;
        assert_eq!(sids(&week), vec!["soon", "later"]);

        let month = call(
            &tools,
            "get_upcoming_events",
            tenant("user0"),
            json!({ "days": 30 }),
        )
        .await;
        assert_eq!(sids(&month), vec!["soon", "later", "far"]);

        for days in [0, 31] {
            let out_of_range = call(
                &tools,
                "get_upcoming_events",
                tenant("user0"),
                json!({ "days": days }),
            )
            .await;
            assert!(out_of_range.is_error);
        }
    }

    #[tokio::test]
    async fn test_upcoming_filters_by_category() {
        let mut lab = starting_in("lab", "user0", Duration::days(1));
        lab.category = "Lab".to_string();
        let (tools, _) = tools_over(vec![
            lab,
            starting_in("sync", "user0", Duration::days(2)),
        ]);

        let labs = call(
            &tools,
            "get_upcoming_events",
            tenant("user0"),
            json!({ "category": "LAB" }),
        )
        .await;
        assert_eq!(sids(&labs), vec!["lab"]);

        let none = call(
            &tools,
            "get_upcoming_events",
            tenant("user0"),
            json!({ "category": "Defense", "days": 30 }),
        )
        .await;
        assert!(sids(&none).is_empty());
    }

    #[tokio::test]
    async fn test_events_by_date() {
        let mut tuesday = event("tuesday", Some("user0"));
        tuesday.start_time = crate::store::parse_datetime("2025-01-07 09:00:00").unwrap();
        tuesday.end_time = crate::store::parse_datetime("2025-01-07 10:00:00").unwrap();
        let (tools, _) = tools_over(vec![event("monday", Some("user0")), tuesday]);

        let result = call(
            &tools,
            "get_events_by_date",
            tenant("user0"),
            json!({ "date": "2025-01-06" }),
        )
        .await;
        assert_eq!(sids(&result), vec!["monday"]);

        let bad = call(
            &tools,
            "get_events_by_date",
            tenant("user0"),
            json!({ "date": "06/01/2025" }),
        )
        .await;
        assert!(bad.is_error);
    }

    #[tokio::test]
    async fn test_statistics_tool_counts_only_own_events() {
        let (tools, _) = tools_over(vec![
            event("a", Some("user0")),
            event("b", Some("user1")),
            event("c", Some("user1")),
        ]);
        let result = call(&tools, "get_calendar_statistics", tenant("user1"), json!({})).await;
        let stats = result.structured_content.unwrap();
        assert_eq!(stats["total_events"], 2);
        assert_eq!(stats["period"], "month");
    }

    #[tokio::test]
    async fn test_statistics_period_is_echoed_and_checked() {
        let (tools, _) = tools_over(vec![event("a", Some("user0"))]);
        let result = call(
            &tools,
            "get_calendar_statistics",
            tenant("user0"),
            json!({ "period": "semester" }),
        )
        .await;
        assert_eq!(result.structured_content.unwrap()["period"], "semester");

        let bad = call(
            &tools,
            "get_calendar_statistics",
            tenant("user0"),
            json!({ "period": "decade" }),
        )
        .await;
        assert!(bad.is_error);
    }
}
