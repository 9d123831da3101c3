use serde::{Deserialize, Serialize};

use crate::{
    domain::{FlagKey, ToggleKind},
    error::ErrorReport,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ToggleEvent {
    Started {
        target: FlagKey,
        kind: ToggleKind,
    },
    Committed {
        target: FlagKey,
        kind: ToggleKind,
        shown: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cascaded: Vec<FlagKey>,
    },
    Failed {
        target: FlagKey,
        kind: ToggleKind,
        error: ErrorReport,
    },
}

impl ToggleEvent {
    pub fn target(&self) -> &FlagKey {
        match self {
            Self::Started { target, .. }
            | Self::Committed { target, .. }
            | Self::Failed { target, .. } => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_event_uses_tagged_layout() {
        let event = ToggleEvent::Committed {
            target: "section1".into(),
            kind: ToggleKind::Group,
            shown: true,
            cascaded: vec!["box1".into(), "box2".into()],
        };

        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "type": "committed",
                "payload": {
                    "target": "section1",
                    "kind": "group",
                    "shown": true,
                    "cascaded": ["box1", "box2"],
                }
            })
        );
    }
}
