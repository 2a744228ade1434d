use crate::alert::{CanonicalAlert, MitreTag};

// Static MITRE ATT&CK mapping, keyed by lowercased alert category.
const MITRE_MAPPING: &[(&str, (&str, &str, &str))] = &[
    // Authentication & Access
    ("authentication_failed", ("Credential Access", "T1110", "Brute Force")),
    ("invalid_login", ("Credential Access", "T1110", "Brute Force")),
    ("sshd", ("Initial Access", "T1078", "Valid Accounts")),
    ("sudo", ("Privilege Escalation", "T1078", "Valid Accounts")),
    // Execution & Scripting
    ("shell", ("Execution", "T1059", "Command and Scripting Interpreter")),
    ("script", ("Execution", "T1059", "Command and Scripting Interpreter")),
    ("process_creation", ("Execution", "T1204", "User Execution")),
    // Internal correlation rule
    ("correlation", ("Defense Evasion", "T1562", "Impair Defenses")),
    // Common fallback groups
    ("syslog", ("Discovery", "T1082", "System Information Discovery")),
    ("web", ("Initial Access", "T1190", "Exploit Public-Facing Application")),
];

pub fn lookup(category: &str) -> Option<MitreTag> {
    let needle = category.to_ascii_lowercase();
    MITRE_MAPPING
        .iter()
        .find(|(key, _)| *key == needle)
        .map(|(_, (tactic, technique_id, technique_name))| MitreTag {
            tactic: tactic.to_string(),
            technique_id: technique_id.to_string(),
            technique_name: technique_name.to_string(),
        })
}

/// Attaches a MITRE tag when the category (or, failing that, the alert
/// text) matches. Alerts that arrive already tagged are left alone.
pub fn enrich(alert: &mut CanonicalAlert) {
    if alert.mitre.is_some() {
        return;
    }

    if let Some(tag) = lookup(&alert.category) {
        alert.mitre = Some(tag);
        return;
    }

    let text = format!("{} {}", alert.title, alert.description).to_ascii_lowercase();
    if text.contains("ssh") && (text.contains("fail") || text.contains("password")) {
        alert.mitre = lookup("authentication_failed");
    } else if text.contains("powershell") || text.contains("cmd.exe") {
        alert.mitre = lookup("shell");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::normalize;
    use serde_json::json;

    #[test]
    fn category_match_attaches_tag() {
        let mut alert = normalize(json!({"rule": {"groups": ["sshd"]}}));
        enrich(&mut alert);
        let tag = alert.mitre.expect("sshd should map");
        assert_eq!(tag.tactic, "Initial Access");
        assert_eq!(tag.technique_id, "T1078");
        assert_eq!(tag.technique_name, "Valid Accounts");
    }

    #[test]
    fn category_match_is_case_insensitive() {
        let mut alert = normalize(json!({"rule": {"groups": ["SSHD"]}}));
        enrich(&mut alert);
        assert_eq!(alert.mitre.unwrap().technique_id, "T1078");
    }

    #[test]
    fn ssh_failure_keywords_map_to_brute_force() {
        let mut alert = normalize(json!({
            "rule": {"groups": ["other"], "description": "sshd: authentication fail"},
        }));
        enrich(&mut alert);
        assert_eq!(alert.mitre.unwrap().technique_id, "T1110");
    }

    #[test]
    fn powershell_keyword_maps_to_shell() {
        let mut alert = normalize(json!({
            "rule": {"groups": ["other"]},
            "full_log": "C:\\Windows\\powershell.exe executed"
        }));
        enrich(&mut alert);
        let tag = alert.mitre.unwrap();
        assert_eq!(tag.tactic, "Execution");
        assert_eq!(tag.technique_id, "T1059");
    }

    #[test]
    fn ssh_without_failure_keyword_does_not_match() {
        let mut alert = normalize(json!({
            "rule": {"groups": ["other"], "description": "ssh session opened"},
        }));
        enrich(&mut alert);
        assert!(alert.mitre.is_none());
    }

    #[test]
    fn unknown_alert_stays_untagged() {
        let mut alert = normalize(json!({}));
        // title defaults to "Unknown Alert"; must not trip the heuristics
        enrich(&mut alert);
        assert!(alert.mitre.is_none());
    }

    #[test]
    fn pre_tagged_alert_is_untouched() {
        let mut alert = normalize(json!({"rule": {"groups": ["sshd"]}}));
        alert.mitre = lookup("correlation");
        enrich(&mut alert);
        assert_eq!(alert.mitre.unwrap().technique_id, "T1562");
    }

    #[test]
    fn enrichment_is_deterministic() {
        let raw = json!({"rule": {"groups": ["sudo"]}});
        let mut a = normalize(raw.clone());
        let mut b = normalize(raw);
        enrich(&mut a);
        enrich(&mut b);
        assert_eq!(a.mitre, b.mitre);
    }
}
