use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::alert::{severity_level, AgentInfo, CanonicalAlert};
use crate::enrich;

struct CorrelationEvent {
    ts: i64,
    ip: String,
    agent_name: String,
}

/// Sliding-window threshold detector. Counts recent events per source IP
/// and per agent name; when a key crosses the threshold inside the window
/// it emits one synthetic alert and puts that key on cooldown for a full
/// window. State is in-memory only and starts empty on restart.
pub struct CorrelationEngine {
    window_seconds: i64,
    threshold: usize,
    history: VecDeque<CorrelationEvent>,
    cooldowns: HashMap<String, i64>,
}

impl CorrelationEngine {
    pub fn new(window_seconds: i64, threshold: usize) -> Self {
        CorrelationEngine {
            window_seconds,
            threshold,
            history: VecDeque::new(),
            cooldowns: HashMap::new(),
        }
    }

    pub fn process(&mut self, alert: &CanonicalAlert) -> Option<CanonicalAlert> {
        self.process_at(Utc::now().timestamp(), alert)
    }

    // Clock passed in so window and cooldown edges are testable.
    fn process_at(&mut self, now: i64, alert: &CanonicalAlert) -> Option<CanonicalAlert> {
        // Synthetic alerts never feed back into detection.
        if alert.source == "correlation" {
            return None;
        }

        self.history.push_back(CorrelationEvent {
            ts: now,
            ip: alert.agent.ip.clone(),
            agent_name: alert.agent.name.clone(),
        });

        // History is appended in arrival order, so expired events sit at the front.
        while let Some(front) = self.history.front() {
            if front.ts <= now - self.window_seconds {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let ip_count = self.history.iter().filter(|e| e.ip == alert.agent.ip).count();
        let agent_count = self
            .history
            .iter()
            .filter(|e| e.agent_name == alert.agent.name)
            .count();

        // IP key wins ties; at most one synthetic per input alert. A burst
        // whose leading key is cooling down emits nothing this round.
        let candidates = [
            ("IP Address", &alert.agent.ip, ip_count),
            ("Agent Name", &alert.agent.name, agent_count),
        ];
        for (label, key, count) in candidates {
            if count < self.threshold {
                continue;
            }
            let ready = self
                .cooldowns
                .get(key.as_str())
                .map_or(true, |last| *last < now - self.window_seconds);
            if ready {
                self.cooldowns.insert(key.clone(), now);
                return Some(self.synthetic(now, label, key, count));
            }
            break;
        }
        None
    }

    fn synthetic(&self, now: i64, label: &str, key: &str, count: usize) -> CanonicalAlert {
        let timestamp = chrono::DateTime::from_timestamp(now, 0)
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        CanonicalAlert {
            id: Uuid::new_v4().to_string(),
            timestamp,
            source: "correlation".to_string(),
            agent: AgentInfo {
                name: "SIEM Engine".to_string(),
                ip: "127.0.0.1".to_string(),
            },
            severity: 10,
            level: severity_level(10).to_string(),
            category: "correlation".to_string(),
            title: format!("Suspicious Activity Detected: {}", label),
            description: format!(
                "{} alerts observed for {} '{}' within {} seconds",
                count, label, key, self.window_seconds
            ),
            raw: json!({
                "type": "threshold",
                "correlation_key": key,
                "count": count,
                "window": self.window_seconds,
            }),
            mitre: enrich::lookup("correlation"),
        }
    }
}
