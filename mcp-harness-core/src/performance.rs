//! Web-Vitals style performance metrics.
//!
//! Metrics are collected by evaluating [`COLLECT_SCRIPT`] inside the page. The
//! script buffers observer entries for a fixed window and resolves a plain
//! record; everything after that (scoring, grading, recommendations) is pure.

use crate::driver::Page;
use serde::{Deserialize, Serialize};

/// Observer dwell time inside the page.
pub const OBSERVER_WINDOW_MS: u64 = 1000;

/// In-page collector. Resolves to a JSON object with the
/// [`PerformanceMetrics`] field names.
pub const COLLECT_SCRIPT: &str = r#"
new Promise((resolve) => {
  const metrics = {
    firstPaint: 0,
    firstContentfulPaint: 0,
    largestContentfulPaint: 0,
    timeToInteractive: 0,
    totalBlockingTime: 0,
    cumulativeLayoutShift: 0,
    domContentLoaded: 0,
    loadComplete: 0,
  };
  try {
    const nav = performance.getEntriesByType('navigation')[0];
    if (nav) {
      metrics.domContentLoaded = nav.domContentLoadedEventEnd - nav.fetchStart;
      metrics.loadComplete = nav.loadEventEnd - nav.fetchStart;
      metrics.timeToInteractive = nav.domInteractive - nav.fetchStart;
    }
    for (const entry of performance.getEntriesByType('paint')) {
      if (entry.name === 'first-paint') metrics.firstPaint = entry.startTime;
      if (entry.name === 'first-contentful-paint') metrics.firstContentfulPaint = entry.startTime;
    }
  } catch (e) {}

  const observers = [];
  const observe = (type, callback) => {
    try {
      const observer = new PerformanceObserver((list) => callback(list.getEntries()));
      observer.observe({ type, buffered: true });
      observers.push(observer);
    } catch (e) {}
  };
  observe('largest-contentful-paint', (entries) => {
    const last = entries[entries.length - 1];
    if (last) metrics.largestContentfulPaint = last.renderTime || last.loadTime || last.startTime || 0;
  });
  observe('layout-shift', (entries) => {
    for (const entry of entries) {
      if (!entry.hadRecentInput) metrics.cumulativeLayoutShift += entry.value;
    }
  });
  observe('longtask', (entries) => {
    for (const entry of entries) {
      metrics.totalBlockingTime += Math.max(0, entry.duration - 50);
    }
  });
  observe('first-input', () => {});

  setTimeout(() => {
    for (const observer of observers) {
      try { observer.disconnect(); } catch (e) {}
    }
    resolve(metrics);
  }, __WINDOW_MS__);
})
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub first_paint: f64,
    pub first_contentful_paint: f64,
    pub largest_contentful_paint: f64,
    pub time_to_interactive: f64,
    pub total_blocking_time: f64,
    pub cumulative_layout_shift: f64,
    pub dom_content_loaded: f64,
    pub load_complete: f64,
}

impl PerformanceMetrics {
    /// Build metrics from whatever the page returned.
    ///
    /// Missing, null, negative or non-numeric fields read as `0`.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_f64())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(0.0)
        };
        Self {
            first_paint: field("firstPaint"),
            first_contentful_paint: field("firstContentfulPaint"),
            largest_contentful_paint: field("largestContentfulPaint"),
            time_to_interactive: field("timeToInteractive"),
            total_blocking_time: field("totalBlockingTime"),
            cumulative_layout_shift: field("cumulativeLayoutShift"),
            dom_content_loaded: field("domContentLoaded"),
            load_complete: field("loadComplete"),
        }
    }
}

/// Collect metrics from a live page. Never fails; returns zeros on error.
pub async fn collect(page: &dyn Page) -> PerformanceMetrics {
    let script = COLLECT_SCRIPT.replace("__WINDOW_MS__", &OBSERVER_WINDOW_MS.to_string());
    match page.evaluate(&script).await {
        Ok(value) => PerformanceMetrics::from_value(&value),
        Err(e) => {
            tracing::warn!(error = %e, "Performance collection failed, using zeroed metrics");
            PerformanceMetrics::default()
        }
    }
}

/// `(bad, poor)` thresholds; exceeding `bad` costs more than exceeding `poor`.
struct Band {
    bad: f64,
    bad_penalty: i32,
    poor: f64,
    poor_penalty: i32,
}

impl Band {
    fn penalty(&self, value: f64) -> i32 {
        if value > self.bad {
            self.bad_penalty
        } else if value > self.poor {
            self.poor_penalty
        } else {
            0
        }
    }
}

const LCP: Band = Band { bad: 4000.0, bad_penalty: 30, poor: 2500.0, poor_penalty: 15 };
const FCP: Band = Band { bad: 3000.0, bad_penalty: 20, poor: 1800.0, poor_penalty: 10 };
const TTI: Band = Band { bad: 7300.0, bad_penalty: 20, poor: 3800.0, poor_penalty: 10 };
const TBT: Band = Band { bad: 600.0, bad_penalty: 15, poor: 200.0, poor_penalty: 7 };
const CLS: Band = Band { bad: 0.25, bad_penalty: 15, poor: 0.1, poor_penalty: 7 };

/// Score in `0..=100`.
pub fn calculate_performance_score(metrics: &PerformanceMetrics) -> u8 {
    let deductions = LCP.penalty(metrics.largest_contentful_paint)
        + FCP.penalty(metrics.first_contentful_paint)
        + TTI.penalty(metrics.time_to_interactive)
        + TBT.penalty(metrics.total_blocking_time)
        + CLS.penalty(metrics.cumulative_layout_shift);
    (100 - deductions).clamp(0, 100) as u8
}

pub fn performance_grade(score: u8) -> char {
    match score {
        90.. => 'A',
        80..=89 => 'B',
        70..=79 => 'C',
        60..=69 => 'D',
        _ => 'F',
    }
}

pub fn get_performance_recommendations(metrics: &PerformanceMetrics) -> Vec<String> {
    let mut recommendations = Vec::new();

    if metrics.first_contentful_paint > FCP.poor {
        recommendations.push(
            "Reduce First Contentful Paint: minimize render-blocking resources and inline critical CSS."
                .to_string(),
        );
    }
    if metrics.largest_contentful_paint > LCP.poor {
        recommendations.push(
            "Improve Largest Contentful Paint: optimize images, preload key resources and reduce server response time."
                .to_string(),
        );
    }
    if metrics.time_to_interactive > TTI.poor {
        recommendations.push(
            "Reduce Time to Interactive: split JavaScript bundles and defer non-critical scripts."
                .to_string(),
        );
    }
    if metrics.total_blocking_time > TBT.poor {
        recommendations.push(
            "Reduce Total Blocking Time: break up long tasks and move heavy work off the main thread."
                .to_string(),
        );
    }
    if metrics.cumulative_layout_shift > CLS.poor {
        recommendations.push(
            "Reduce Cumulative Layout Shift: reserve space for images and embeds, avoid inserting content above existing content."
                .to_string(),
        );
    }

    if recommendations.is_empty() {
        recommendations
            .push("Performance looks good. Keep monitoring to catch regressions.".to_string());
    }
    recommendations
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub score: u8,
    pub grade: char,
    pub metrics: PerformanceMetrics,
    pub recommendations: Vec<String>,
}

pub fn create_performance_summary(metrics: &PerformanceMetrics) -> PerformanceSummary {
    let score = calculate_performance_score(metrics);
    PerformanceSummary {
        score,
        grade: performance_grade(score),
        metrics: *metrics,
        recommendations: get_performance_recommendations(metrics),
    }
}
