use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Local};
use sentinel::ControlEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A cron table. Five-field expressions get a leading seconds field of `0`.
/// Numeric days of the week count from 0 = Sunday, with 7 also Sunday.
#[derive(Debug, Clone)]
pub struct Schedule {
	expr: String,
	inner: cron::Schedule,
}

/// Rewrites `expr` into the six-field form the `cron` crate parses, whose
/// days of the week run 1 = Sunday through 7 = Saturday.
pub fn normalize(expr: &str) -> String {
	let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
	if fields.len() == 5 {
		fields.insert(0, "0".to_string());
	}
	if let Some(dow) = fields.get_mut(5) {
		*dow = dow.split(',').map(weekdays).collect::<Vec<_>>().join(",");
	}
	fields.join(" ")
}

/// Translates one list item of a day-of-week field. Names, `*` and anything
/// malformed pass through for the parser to judge.
fn weekdays(item: &str) -> String {
	let (range, step) = match item.split_once('/') {
		Some((range, step)) => match step.parse::<usize>() {
			Ok(step) if step > 0 => (range, step),
			_ => return item.to_string(),
		},
		None => (item, 1),
	};
	if range == "*" {
		return item.to_string();
	}
	let bounds = match range.split_once('-') {
		Some((lo, hi)) => lo.parse::<u8>().ok().zip(hi.parse::<u8>().ok()),
		None if step > 1 => range.parse::<u8>().ok().map(|lo| (lo, 6)),
		None => range.parse::<u8>().ok().map(|d| (d, d)),
	};
	let Some((lo, hi)) = bounds else {
		return item.to_string();
	};
	if lo > hi || hi > 7 {
		return item.to_string();
	}
	let days: BTreeSet<u8> = (lo..=hi).step_by(step).map(|d| d % 7 + 1).collect();
	days.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
}

impl Schedule {
	pub fn parse(expr: &str) -> anyhow::Result<Self> {
		let normalized = normalize(expr);
		let inner = cron::Schedule::from_str(&normalized)
			.with_context(|| format!("invalid schedule {:?}", expr))?;
		Ok(Self { expr: expr.trim().to_string(), inner })
	}

	pub fn next_after(&self, t: &DateTime<Local>) -> Option<DateTime<Local>> {
		self.inner.after(t).next()
	}
}

impl std::fmt::Display for Schedule {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.expr)
	}
}

/// Sends a trigger into the daemon's control loop at every scheduled time.
pub struct Scheduler {
	handle: JoinHandle<()>,
}

impl Scheduler {
	pub fn start(schedule: Schedule, tx: mpsc::Sender<ControlEvent>) -> Self {
		tracing::info!("scheduler started ({})", schedule);
		let handle = tokio::spawn(async move {
			loop {
				let now = Local::now();
				let Some(next) = schedule.next_after(&now) else {
					tracing::warn!("schedule {} has no upcoming run", schedule);
					return;
				};
				let wait = (next - now).to_std().unwrap_or_default();
				tracing::debug!("next scheduled backup at {}", next);
				tokio::time::sleep(wait).await;

				tracing::info!("starting scheduled backup");
				if tx.send(ControlEvent::Trigger).await.is_err() {
					return;
				}
			}
		});
		Self { handle }
	}

	pub fn stop(&self) {
		self.handle.abort();
		tracing::info!("scheduler stopped");
	}
}
