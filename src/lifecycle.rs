//! Narration printed before and after the run. Neither hook touches the
//! test itself.

use crate::config::Config;
use std::fmt::Write;

const RULE_WIDTH: usize = 70;

pub fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Banner describing the load profile about to be applied
pub fn setup(config: &Config) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "AGGRESSIVE KUBERNETES LOAD TEST");
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(out, "\nThis test will PUSH YOUR CLUSTER HARD!");
    let _ = writeln!(out, "Target: {}", config.endpoint());

    let _ = writeln!(out, "\nLoad progression:");
    for phase in config.schedule.phases() {
        let window = format!("{}:", phase.window());
        let _ = writeln!(
            out,
            "  • {:<11} {} users ({})",
            window,
            phase.target,
            phase.label
        );
    }

    let _ = writeln!(out, "\nExpected outcomes:");
    let _ = writeln!(out, "  • CPU will spike to 70%+");
    let _ = writeln!(out, "  • HPA will scale pods up");
    let _ = writeln!(out, "  • Response times will increase");
    let _ = writeln!(out, "  • Some requests may timeout (normal under extreme load)");

    let _ = writeln!(out, "\nWATCH:");
    let _ = writeln!(out, "  Terminal 2: kubectl get hpa,pods -n {}", config.namespace);
    let _ = writeln!(out, "  Terminal 3: kubectl top pods -n {}", config.namespace);
    let _ = writeln!(out, "\n{}", rule());
    out
}

pub fn teardown() -> String {
    format!("\n{}\nAGGRESSIVE LOAD TEST COMPLETED!\n{}\n", rule(), rule())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_describes_default_profile() {
        let banner = setup(&Config::default());
        assert!(banner.contains("0-30s:"));
        assert!(banner.contains("50 users (warm up)"));
        assert!(banner.contains("100 users (pushing hard)"));
        assert!(banner.contains("2.5m-5.5m:"));
        assert!(banner.contains("125 users (MAXIMUM LOAD!)"));
        assert!(banner.contains("0 users (finish)"));
        assert!(banner.contains("kubectl top pods -n fraud-buster"));
    }

    #[test]
    fn test_setup_uses_namespace() {
        let config = Config {
            namespace: "staging".to_string(),
            ..Config::default()
        };
        assert!(setup(&config).contains("kubectl get hpa,pods -n staging"));
    }

    #[test]
    fn test_teardown_banner() {
        let banner = teardown();
        assert!(banner.contains("AGGRESSIVE LOAD TEST COMPLETED!"));
        assert_eq!(banner.matches(&rule()).count(), 2);
    }
}
