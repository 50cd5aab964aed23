//! 日程规则
//!
//! 声明式的周期配置（每小时/每天/每周/每月，可附带时间窗口和固定间隔）。
//! 到期判断是纯函数，上次触发时间由调度器自行记录。

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use shipqueue_errors::{QueueError, QueueResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// 一天内的时间窗口，起止分钟均包含在内
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

impl TimeWindow {
    pub fn new(start_hour: u32, start_minute: u32, end_hour: u32, end_minute: u32) -> Self {
        Self {
            start_hour,
            start_minute,
            end_hour,
            end_minute,
        }
    }

    fn start_of_day_minutes(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    fn end_of_day_minutes(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let minutes = at.hour() * 60 + at.minute();
        minutes >= self.start_of_day_minutes() && minutes <= self.end_of_day_minutes()
    }
}

fn default_recurring() -> bool {
    true
}

/// 日程配置
///
/// 星期取值 0-6，0 表示星期日。设置了 `interval_minutes` 时进入间隔模式：
/// 在满足日期约束（以及可选时间窗口）的前提下每隔固定分钟触发一次，
/// `hour`/`minute` 不再参与判断。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub kind: RecurrenceKind,
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default)]
    pub window: Option<TimeWindow>,
    #[serde(default)]
    pub interval_minutes: Option<u32>,
    #[serde(default = "default_recurring")]
    pub recurring: bool,
}

impl ScheduleConfig {
    fn base(kind: RecurrenceKind) -> Self {
        Self {
            kind,
            days_of_week: Vec::new(),
            day_of_month: None,
            hour: 0,
            minute: 0,
            window: None,
            interval_minutes: None,
            recurring: true,
        }
    }

    pub fn hourly(minute: u32) -> Self {
        Self {
            minute,
            ..Self::base(RecurrenceKind::Hourly)
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            hour,
            minute,
            ..Self::base(RecurrenceKind::Daily)
        }
    }

    pub fn weekly(days_of_week: Vec<u32>, hour: u32, minute: u32) -> Self {
        Self {
            days_of_week,
            hour,
            minute,
            ..Self::base(RecurrenceKind::Weekly)
        }
    }

    pub fn monthly(day_of_month: u32, hour: u32, minute: u32) -> Self {
        Self {
            day_of_month: Some(day_of_month),
            hour,
            minute,
            ..Self::base(RecurrenceKind::Monthly)
        }
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_interval(mut self, interval_minutes: u32) -> Self {
        self.interval_minutes = Some(interval_minutes);
        self
    }

    /// 只触发一次
    pub fn one_shot(mut self) -> Self {
        self.recurring = false;
        self
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.hour > 23 {
            return Err(QueueError::invalid_schedule(format!(
                "小时必须在0-23之间: {}",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(QueueError::invalid_schedule(format!(
                "分钟必须在0-59之间: {}",
                self.minute
            )));
        }
        if let Some(day) = self.days_of_week.iter().find(|d| **d > 6) {
            return Err(QueueError::invalid_schedule(format!(
                "星期必须在0-6之间: {day}"
            )));
        }
        if self.kind == RecurrenceKind::Weekly && self.days_of_week.is_empty() {
            return Err(QueueError::invalid_schedule("每周规则至少需要一个星期"));
        }
        if self.kind == RecurrenceKind::Monthly {
            match self.day_of_month {
                Some(day) if (1..=31).contains(&day) => {}
                other => {
                    return Err(QueueError::invalid_schedule(format!(
                        "每月规则的日期必须在1-31之间: {other:?}"
                    )))
                }
            }
        }
        if let Some(window) = &self.window {
            if window.start_hour > 23
                || window.end_hour > 23
                || window.start_minute > 59
                || window.end_minute > 59
            {
                return Err(QueueError::invalid_schedule("时间窗口超出范围"));
            }
            if window.start_of_day_minutes() >= window.end_of_day_minutes() {
                return Err(QueueError::invalid_schedule("时间窗口开始必须早于结束"));
            }
            if self.interval_minutes.is_none() {
                return Err(QueueError::invalid_schedule("时间窗口需要配合触发间隔使用"));
            }
        }
        if self.interval_minutes == Some(0) {
            return Err(QueueError::invalid_schedule("触发间隔必须大于0分钟"));
        }
        Ok(())
    }

    fn day_matches(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            RecurrenceKind::Hourly | RecurrenceKind::Daily => true,
            RecurrenceKind::Weekly => self
                .days_of_week
                .contains(&now.weekday().num_days_from_sunday()),
            RecurrenceKind::Monthly => self.day_of_month == Some(now.day()),
        }
    }

    /// 判断 `now` 时是否到期
    ///
    /// `last_fired` 为该规则上一次成功入队的时间。
    pub fn is_due(&self, now: DateTime<Utc>, last_fired: Option<DateTime<Utc>>) -> bool {
        if !self.recurring && last_fired.is_some() {
            return false;
        }
        if !self.day_matches(now) {
            return false;
        }

        let now_minute = truncate_to_minute(now);
        let last_minute = last_fired.map(truncate_to_minute);

        if let Some(interval) = self.interval_minutes {
            if let Some(window) = &self.window {
                if !window.contains(now) {
                    return false;
                }
            }
            return match last_minute {
                None => true,
                Some(last) => now_minute - last >= Duration::minutes(i64::from(interval)),
            };
        }

        if now.minute() != self.minute {
            return false;
        }

        match self.kind {
            RecurrenceKind::Hourly => match last_minute {
                None => true,
                Some(last) => now_minute - last >= Duration::hours(1),
            },
            RecurrenceKind::Daily | RecurrenceKind::Weekly | RecurrenceKind::Monthly => {
                now.hour() == self.hour
                    && last_fired.map_or(true, |last| last.date_naive() < now.date_naive())
            }
        }
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::minutes(1)).unwrap_or(at)
}
