use sleuth_core::mutation::RiskLevel;

/// Classify a mutation purely lexically from its operation and resource.
pub fn classify_risk(operation: &str, resource: &str) -> RiskLevel {
    let op = operation.to_lowercase();
    let res = resource.to_lowercase();

    const CRITICAL: &[&str] = &["delete", "terminate", "destroy", "truncate", "drop"];
    if CRITICAL.iter().any(|kw| op.contains(kw)) {
        return RiskLevel::Critical;
    }

    const HIGH: &[&str] = &["restart", "reboot", "stop"];
    if HIGH.iter().any(|kw| op.contains(kw)) {
        return RiskLevel::High;
    }
    const SCALE_DOWN: &[&str] = &["scale-down", "scale_down", "scale-in", "scale_in", "scaledown"];
    if SCALE_DOWN.iter().any(|kw| op.contains(kw)) {
        return RiskLevel::High;
    }
    if op.contains("deploy") || op.contains("update-service") || op.contains("update_service") {
        return RiskLevel::High;
    }
    if (op.contains("update") || op.contains("modify"))
        && (res.contains("prod") || res.contains("production"))
    {
        return RiskLevel::High;
    }

    if op.contains("update") || op.contains("modify") || op.contains("scale") {
        return RiskLevel::Medium;
    }

    RiskLevel::Low
}
