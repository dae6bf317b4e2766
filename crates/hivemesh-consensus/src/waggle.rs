//! Waggle-dance derivation: a proposal's content is condensed into a
//! deterministic `(intensity, duration, angle, repetitions)` descriptor that
//! voters can interpret as signal strength.

use hivemesh_schema::WaggleDance;

/// Derives a waggle descriptor from proposal content. `intensity_floor`
/// keeps even lukewarm proposals visible on the dance floor.
pub fn derive_waggle(content: &serde_json::Value, intensity_floor: f64) -> WaggleDance {
    let intensity = calculate_intensity(content).max(intensity_floor).min(1.0);
    let duration_ms = (intensity * 1000.0) as u64;
    let angle = calculate_angle(content);
    let repetitions = ((intensity * 10.0) as u32).max(1);

    WaggleDance {
        intensity,
        duration_ms,
        angle,
        repetitions,
    }
}

fn calculate_intensity(content: &serde_json::Value) -> f64 {
    let mut intensity: f64 = 0.5;

    if let Some(priority) = content.get("priority").and_then(|v| v.as_str()) {
        intensity = match priority {
            "high" | "critical" => 0.9,
            "medium" => 0.6,
            "low" => 0.3,
            _ => intensity,
        };
    }

    if content.get("urgent").and_then(|v| v.as_bool()) == Some(true) {
        intensity = (intensity + 0.2).min(1.0);
    }

    if let Some(confidence) = content.get("confidence").and_then(|v| v.as_f64()) {
        intensity = (intensity + confidence) / 2.0;
    }

    if let Some(amount) = content.get("amount").and_then(|v| v.as_f64()) {
        let amount_intensity = ((amount + 1.0).log10() / 10.0).min(1.0);
        intensity = (intensity + amount_intensity) / 2.0;
    }

    intensity.clamp(0.0, 1.0)
}

fn calculate_angle(content: &serde_json::Value) -> f64 {
    let mut angle = match content.get("type").and_then(|v| v.as_str()) {
        Some("approval") => 90.0,
        Some("rejection") => 270.0,
        Some("action") => 180.0,
        Some("topology") => 0.0,
        _ => 180.0,
    };

    if let Some(quality) = content.get("quality").and_then(|v| v.as_f64()) {
        angle += (quality - 0.5) * 90.0;
    }

    angle.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_drives_intensity() {
        let high = derive_waggle(&serde_json::json!({"priority": "high"}), 0.0);
        let medium = derive_waggle(&serde_json::json!({"priority": "medium"}), 0.0);
        let low = derive_waggle(&serde_json::json!({"priority": "low"}), 0.0);
        assert!((high.intensity - 0.9).abs() < 1e-9);
        assert!((medium.intensity - 0.6).abs() < 1e-9);
        assert!((low.intensity - 0.3).abs() < 1e-9);
    }

    #[test]
    fn empty_content_yields_medium_signal() {
        let waggle = derive_waggle(&serde_json::json!({}), 0.0);
        assert!((waggle.intensity - 0.5).abs() < 1e-9);
        assert_eq!(waggle.duration_ms, 500);
        assert_eq!(waggle.repetitions, 5);
        assert!((waggle.angle - 180.0).abs() < 1e-9);
    }

    #[test]
    fn urgency_bumps_and_clamps() {
        let waggle = derive_waggle(
            &serde_json::json!({"priority": "critical", "urgent": true}),
            0.0,
        );
        assert!(waggle.intensity <= 1.0);
        assert!(waggle.intensity > 0.9);
    }

    #[test]
    fn confidence_is_averaged_in() {
        let waggle = derive_waggle(&serde_json::json!({"confidence": 0.9}), 0.0);
        assert!((waggle.intensity - 0.7).abs() < 1e-9);
    }

    #[test]
    fn amount_contributes_logarithmically() {
        let small = derive_waggle(&serde_json::json!({"amount": 10.0}), 0.0);
        let large = derive_waggle(&serde_json::json!({"amount": 1_000_000.0}), 0.0);
        assert!(large.intensity > small.intensity);
        assert!(large.intensity <= 1.0);
    }

    #[test]
    fn floor_lifts_weak_signals() {
        let waggle = derive_waggle(&serde_json::json!({"priority": "low"}), 0.45);
        assert!((waggle.intensity - 0.45).abs() < 1e-9);
        assert_eq!(waggle.repetitions, 4);
    }

    #[test]
    fn angle_encodes_type_and_stays_in_range() {
        assert!((derive_waggle(&serde_json::json!({"type": "approval"}), 0.0).angle - 90.0).abs() < 1e-9);
        assert!((derive_waggle(&serde_json::json!({"type": "topology"}), 0.0).angle - 0.0).abs() < 1e-9);

        let wobbled = derive_waggle(
            &serde_json::json!({"type": "topology", "quality": 0.0}),
            0.0,
        );
        assert!(wobbled.angle >= 0.0 && wobbled.angle < 360.0);
        assert!((wobbled.angle - 315.0).abs() < 1e-9);
    }

    #[test]
    fn repetitions_never_drop_below_one() {
        let waggle = derive_waggle(&serde_json::json!({"priority": "low", "amount": 0.0}), 0.0);
        assert!(waggle.repetitions >= 1);
    }
}
