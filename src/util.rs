// src/util.rs
//
// Shared utilities for the Tarn toolchain.

use std::time::Duration;

/// Format a duration with appropriate units (ns, us, ms, s)
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        format!("{}ns", nanos)
    } else if nanos < 1_000_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_the_right_unit() {
        assert_eq!(format_duration(Duration::from_nanos(120)), "120ns");
        assert_eq!(format_duration(Duration::from_micros(5)), "5.00us");
        assert_eq!(format_duration(Duration::from_millis(12)), "12.00ms");
        assert_eq!(format_duration(Duration::from_secs(3)), "3.00s");
    }
}
