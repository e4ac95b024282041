//! Human-pacing helpers used between navigation and extraction.
//!
//! All of these are best-effort stealth, not correctness-critical: they
//! swallow every internal failure and never return an error. Do not "fix"
//! them into hard dependencies of the attempt state machine.

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// Sleep a randomized interval inside `[min_ms, max_ms]`.
pub async fn human_delay(min_ms: u64, max_ms: u64) {
    let upper = max_ms.max(min_ms);
    let ms = {
        let mut rng = rand::rng();
        rng.random_range(min_ms..=upper)
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Scroll down a small random distance in a few uneven steps.
pub async fn human_scroll(page: &Page) {
    let steps: Vec<(i64, u64)> = {
        let mut rng = rand::rng();
        let count = rng.random_range(2..=4);
        (0..count)
            .map(|_| (rng.random_range(120..450), rng.random_range(90..260)))
            .collect()
    };

    for (distance, pause_ms) in steps {
        let script = format!("window.scrollBy(0, {distance});");
        if let Err(e) = page.evaluate(script).await {
            trace!("human_scroll evaluate failed (ignored): {e}");
            return;
        }
        tokio::time::sleep(Duration::from_millis(pause_ms)).await;
    }
}

/// Move the pointer along an interpolated path between two random points.
pub async fn human_mouse(page: &Page) {
    let points: Vec<(f64, f64, u64)> = {
        let mut rng = rand::rng();
        let start = (rng.random_range(80.0..600.0), rng.random_range(80.0..400.0));
        let end = (rng.random_range(200.0..1000.0), rng.random_range(150.0..600.0));
        let steps = rng.random_range(6..=14);
        (0..=steps)
            .map(|i| {
                let t = f64::from(i) / f64::from(steps);
                let jitter_x: f64 = rng.random_range(-3.0..3.0);
                let jitter_y: f64 = rng.random_range(-3.0..3.0);
                (
                    start.0 + (end.0 - start.0) * t + jitter_x,
                    start.1 + (end.1 - start.1) * t + jitter_y,
                    rng.random_range(10..35),
                )
            })
            .collect()
    };

    for (x, y, pause_ms) in points {
        let event = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .button(MouseButton::None)
            .build();
        match event {
            Ok(event) => {
                if page.execute(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                trace!("human_mouse event build failed (ignored): {e}");
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(pause_ms)).await;
    }
}
