use chrono::{DateTime, Duration, Utc};

/// Hard ceiling on any computed delay: the host kills a hook at 360 s, so
/// 350 s leaves a 10 s safety margin.
pub const MAX_DELAY_SECONDS: u64 = 350;

/// Deviation step that doubles the delay (percent points).
const DELAY_STEP_PCT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    FiveHour,
    SevenDay,
}

impl WindowKind {
    pub fn duration_hours(&self) -> f64 {
        match self {
            WindowKind::FiveHour => 5.0,
            WindowKind::SevenDay => 168.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::FiveHour => "five_hour",
            WindowKind::SevenDay => "seven_day",
        }
    }
}

/// Current reading for one quota window.
#[derive(Debug, Clone, Copy)]
pub struct WindowInput {
    /// Utilization percent, 0-100.
    pub utilization: f64,
    /// When the window resets. `None` means the window is inactive and it
    /// never constrains pacing.
    pub resets_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// Tunables for the target-pace model.
#[derive(Debug, Clone, Copy)]
pub struct PacingParams {
    /// Percent of the window treated as the full allowance (default 95).
    pub safety_buffer_pct: f64,
    /// Prefix of each window that is freely consumable (default 12 h).
    pub preload_hours: f64,
    pub base_delay: u64,
    pub max_delay: u64,
    /// Deviation (percent points over pace) where throttling starts.
    pub threshold_percent: f64,
}

impl Default for PacingParams {
    fn default() -> Self {
        Self {
            safety_buffer_pct: 95.0,
            preload_hours: 12.0,
            base_delay: 5,
            max_delay: MAX_DELAY_SECONDS,
            threshold_percent: 0.0,
        }
    }
}

/// Observability fields for one window.
#[derive(Debug, Clone, Copy)]
pub struct WindowProjection {
    pub kind: WindowKind,
    pub utilization: f64,
    /// Where utilization should be at this instant to finish on pace.
    pub target: f64,
    /// `utilization - target`; positive means over pace.
    pub deviation: f64,
    pub safe_allowance: f64,
    pub buffer_remaining: f64,
}

#[derive(Debug, Clone)]
pub struct PacingDecision {
    pub should_throttle: bool,
    pub delay_seconds: u64,
    pub constrained_window: Option<WindowKind>,
    pub five_hour: Option<WindowProjection>,
    pub seven_day: Option<WindowProjection>,
}

impl PacingDecision {
    pub fn allow() -> Self {
        Self {
            should_throttle: false,
            delay_seconds: 0,
            constrained_window: None,
            five_hour: None,
            seven_day: None,
        }
    }
}

/// Project one window against its pace target.
///
/// Returns `None` for inactive windows (no reset instant). The target is the
/// elapsed fraction of the window scaled by the safety buffer, with the first
/// `preload_hours` treated as freely consumable.
pub fn project(kind: WindowKind, input: &WindowInput, now: DateTime<Utc>, params: &PacingParams) -> Option<WindowProjection> {
    let resets_at = input.resets_at?;

    let duration_hours = kind.duration_hours();
    let duration = Duration::seconds((duration_hours * 3600.0) as i64);
    let start = resets_at - duration;

    let elapsed_secs = (now - start).num_seconds().clamp(0, duration.num_seconds()) as f64;
    let elapsed_frac = elapsed_secs / duration.num_seconds() as f64;

    let preload_frac = (params.preload_hours / duration_hours).clamp(0.0, 1.0);
    let effective_frac = if preload_frac >= 1.0 || elapsed_frac <= preload_frac {
        0.0
    } else {
        (elapsed_frac - preload_frac) / (1.0 - preload_frac)
    };

    let target = effective_frac * params.safety_buffer_pct;
    let safe_allowance = params.safety_buffer_pct;

    Some(WindowProjection {
        kind,
        utilization: input.utilization,
        target,
        deviation: input.utilization - target,
        safe_allowance,
        buffer_remaining: safe_allowance - input.utilization,
    })
}

/// Deterministic monotone schedule: `base_delay` where the deviation first
/// crosses the threshold, doubling per percent point, capped at `max_delay`
/// and at the invocation-safety ceiling.
pub fn delay_for(deviation: f64, params: &PacingParams) -> u64 {
    if deviation <= params.threshold_percent {
        return 0;
    }

    let steps = ((deviation - params.threshold_percent) / DELAY_STEP_PCT).floor() as u32;
    let delay = params
        .base_delay
        .checked_shl(steps)
        .unwrap_or(u64::MAX)
        .min(params.max_delay);

    delay.min(MAX_DELAY_SECONDS)
}

/// Pick the constrained window and compute the throttle decision.
pub fn decide(
    five_hour: &WindowInput,
    seven_day: &WindowInput,
    now: DateTime<Utc>,
    params: &PacingParams,
) -> PacingDecision {
    let five = five_hour
        .enabled
        .then(|| project(WindowKind::FiveHour, five_hour, now, params))
        .flatten();
    let seven = seven_day
        .enabled
        .then(|| project(WindowKind::SevenDay, seven_day, now, params))
        .flatten();

    let constrained = [five.as_ref(), seven.as_ref()]
        .into_iter()
        .flatten()
        .filter(|p| p.deviation > 0.0)
        .max_by(|a, b| a.deviation.total_cmp(&b.deviation))
        .copied();

    let (should_throttle, delay_seconds, constrained_window) = match constrained {
        Some(projection) => {
            let delay = delay_for(projection.deviation, params);
            (delay > 0, delay, Some(projection.kind))
        }
        None => (false, 0, None),
    };

    PacingDecision {
        should_throttle,
        delay_seconds,
        constrained_window,
        five_hour: five,
        seven_day: seven,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PacingParams {
        PacingParams {
            safety_buffer_pct: 95.0,
            preload_hours: 0.0,
            base_delay: 5,
            max_delay: 350,
            threshold_percent: 0.0,
        }
    }

    fn window(utilization: f64, elapsed_frac: f64, kind: WindowKind, now: DateTime<Utc>) -> WindowInput {
        let duration = kind.duration_hours() * 3600.0;
        let remaining = duration * (1.0 - elapsed_frac);
        WindowInput {
            utilization,
            resets_at: Some(now + Duration::seconds(remaining as i64)),
            enabled: true,
        }
    }

    const INACTIVE: WindowInput = WindowInput {
        utilization: 0.0,
        resets_at: None,
        enabled: true,
    };

    #[test]
    fn test_throttle_at_five_hour_pace_overrun() {
        // 75% used with 60% of the window elapsed: target 57, deviation +18.
        let now = Utc::now();
        let five = window(75.0, 0.60, WindowKind::FiveHour, now);

        let decision = decide(&five, &INACTIVE, now, &params());
        assert!(decision.should_throttle);
        assert_eq!(decision.constrained_window, Some(WindowKind::FiveHour));
        assert!(decision.delay_seconds >= 5);
        assert!(decision.delay_seconds <= 350);

        let projection = decision.five_hour.unwrap();
        assert!((projection.target - 57.0).abs() < 0.5);
        assert!((projection.deviation - 18.0).abs() < 0.5);
        assert!((projection.safe_allowance - 95.0).abs() < f64::EPSILON);
        assert!((projection.buffer_remaining - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_under_pace_means_no_throttle() {
        let now = Utc::now();
        let five = window(20.0, 0.60, WindowKind::FiveHour, now);

        let decision = decide(&five, &INACTIVE, now, &params());
        assert!(!decision.should_throttle);
        assert_eq!(decision.delay_seconds, 0);
        assert!(decision.constrained_window.is_none());
    }

    #[test]
    fn test_inactive_windows_never_constrain() {
        let now = Utc::now();
        let decision = decide(&INACTIVE, &INACTIVE, now, &params());
        assert!(!decision.should_throttle);
        assert!(decision.five_hour.is_none());
        assert!(decision.seven_day.is_none());
    }

    #[test]
    fn test_disabled_window_is_skipped() {
        let now = Utc::now();
        let mut seven = window(90.0, 0.9, WindowKind::SevenDay, now);
        seven.enabled = false;
        let five = window(10.0, 0.5, WindowKind::FiveHour, now);

        let decision = decide(&five, &seven, now, &params());
        assert!(!decision.should_throttle);
        assert!(decision.seven_day.is_none());
    }

    #[test]
    fn test_most_deviant_window_wins() {
        let now = Utc::now();
        let five = window(60.0, 0.5, WindowKind::FiveHour, now); // deviation +12.5
        let seven = window(90.0, 0.5, WindowKind::SevenDay, now); // deviation +42.5

        let decision = decide(&five, &seven, now, &params());
        assert_eq!(decision.constrained_window, Some(WindowKind::SevenDay));
    }

    #[test]
    fn test_preload_prefix_is_freely_consumable() {
        let now = Utc::now();
        let p = PacingParams {
            preload_hours: 12.0,
            ..params()
        };

        // 5% into the week is inside the 12h preload: target stays 0.
        let seven = window(40.0, 0.05, WindowKind::SevenDay, now);
        let projection = project(WindowKind::SevenDay, &seven, now, &p).unwrap();
        assert_eq!(projection.target, 0.0);
        assert!(projection.deviation > 0.0);

        // Preload longer than the whole window clamps the target to 0.
        let five = window(40.0, 0.9, WindowKind::FiveHour, now);
        let projection = project(WindowKind::FiveHour, &five, now, &p).unwrap();
        assert_eq!(projection.target, 0.0);
    }

    #[test]
    fn test_delay_schedule_boundaries() {
        let p = params();
        assert_eq!(delay_for(0.0, &p), 0);
        assert_eq!(delay_for(-5.0, &p), 0);
        // Just over the threshold: base delay.
        assert_eq!(delay_for(0.5, &p), 5);
        assert_eq!(delay_for(1.5, &p), 10);
        assert_eq!(delay_for(3.5, &p), 40);
        // Large deviations saturate at the cap.
        assert_eq!(delay_for(18.0, &p), 350);
        assert_eq!(delay_for(95.0, &p), 350);
    }

    #[test]
    fn test_delay_is_monotone_in_deviation() {
        let p = params();
        let mut last = 0;
        for tenths in 0..600 {
            let delay = delay_for(tenths as f64 / 10.0, &p);
            assert!(delay >= last, "delay decreased at deviation {}", tenths);
            assert!(delay <= MAX_DELAY_SECONDS);
            last = delay;
        }
    }

    #[test]
    fn test_delay_respects_configured_max_below_cap() {
        let p = PacingParams {
            max_delay: 120,
            ..params()
        };
        assert_eq!(delay_for(50.0, &p), 120);
    }
}
