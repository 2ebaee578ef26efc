//! Prometheus text exposition of the decision state.

use std::collections::{BTreeSet, HashMap};

use rlscale_core::AppName;

/// Render current instance counts and last executed deltas as gauges with
/// an `app` label, apps sorted by name.
pub fn render_prometheus(
    instances: &HashMap<AppName, u32>,
    last_actions: &HashMap<AppName, i64>,
) -> String {
    let mut out = String::new();

    let mut apps: Vec<&AppName> = instances.keys().collect();
    apps.sort();
    out.push_str("# HELP rlscale_instances Current instance count per app.\n");
    out.push_str("# TYPE rlscale_instances gauge\n");
    for app in apps {
        out.push_str(&format!(
            "rlscale_instances{{app=\"{}\"}} {}\n",
            escape_label(app),
            instances[app]
        ));
    }

    let apps: BTreeSet<&AppName> = last_actions.keys().collect();
    out.push_str("# HELP rlscale_last_action Instance delta executed in the last scaling interval.\n");
    out.push_str("# TYPE rlscale_last_action gauge\n");
    for app in apps {
        out.push_str(&format!(
            "rlscale_last_action{{app=\"{}\"}} {}\n",
            escape_label(app),
            last_actions[app]
        ));
    }

    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
